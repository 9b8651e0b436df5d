//! # Layers Module
//!
//! Building blocks of the value network. Every layer is a plain value holding
//! its weights; forward passes take `&self` and hand activations needed for
//! backpropagation back to the caller as a cache.
//!
//! - [`Conv2DLayer`] - strided 2D convolution without padding
//! - [`DenseLayer`] - fully connected layer
//! - [`WeightInit`] - initialization strategies
//! - [`LayerTrait`] - ordered access to a layer's trainable tensors

pub mod traits;
pub mod conv;
pub mod dense;
pub mod initialization;

pub use traits::Layer as LayerTrait;
pub use conv::{Conv2DLayer, ConvCache};
pub use dense::{DenseLayer, DenseCache};
pub use initialization::WeightInit;
