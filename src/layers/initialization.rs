use ndarray::{Array, Dimension, ShapeBuilder};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rand::Rng;

use crate::activations::Activation;

/// Weight initialization strategies
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightInit {
    /// Xavier/Glorot uniform initialization
    XavierUniform,

    /// He/Kaiming uniform initialization (for ReLU)
    HeUniform,

    /// All zeros
    Zeros,
}

impl WeightInit {
    /// Draw a weight tensor of any rank.
    ///
    /// `fan_in` and `fan_out` count the connections feeding into and out of one
    /// unit; for a convolution that includes the kernel area.
    pub fn initialize<Sh, D, R>(&self, shape: Sh, fan_in: usize, fan_out: usize, rng: &mut R) -> Array<f32, D>
    where
        Sh: ShapeBuilder<Dim = D>,
        D: Dimension,
        R: Rng + ?Sized,
    {
        match self {
            WeightInit::XavierUniform => {
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                Array::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
            }

            WeightInit::HeUniform => {
                let limit = (6.0 / fan_in.max(1) as f32).sqrt();
                Array::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
            }

            WeightInit::Zeros => Array::zeros(shape),
        }
    }

    /// Get the recommended initialization for an activation function
    pub fn for_activation(activation: &Activation) -> Self {
        match activation {
            Activation::Relu => WeightInit::HeUniform,
            Activation::Linear => WeightInit::XavierUniform,
        }
    }
}
