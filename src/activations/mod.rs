//! # Activation Functions Module
//!
//! Nonlinearities applied after each layer of the value network.
//!
//! - **ReLU** (Rectified Linear Unit): `max(0, x)` after every convolution and
//!   the hidden dense layer
//! - **Linear**: Identity function for the action-value head, which must be
//!   able to output negative values
//!
//! Both work on arrays of any rank, so the same enum serves the 4-D feature
//! maps of the convolutional stage and the 2-D activations of the head.

pub mod functions;

pub use functions::Activation;
