use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::error::{DeepQError, Result};
use crate::grad;
use crate::layers::initialization::WeightInit;
use super::traits::Layer as LayerTrait;

/// A fully connected (dense) layer in a neural network
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DenseLayer {
    /// Weight matrix [input_size, output_size]
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
}

/// Values a recorded forward pass keeps for backpropagation
#[derive(Clone, Debug)]
pub struct DenseCache {
    inputs: Array2<f32>,
    pre_activation: Array2<f32>,
}

impl DenseLayer {
    /// Create a new dense layer with the given input size, output size, and activation function.
    /// Weights follow the activation's recommended initialization; biases start at zero.
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        Self::with_rng(input_size, output_size, activation, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let weights = WeightInit::for_activation(&activation)
            .initialize((input_size, output_size), input_size, output_size, rng);
        let biases = WeightInit::Zeros.initialize(output_size, input_size, output_size, rng);
        DenseLayer { weights, biases, activation }
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Result<Self> {
        if weights.dim() != self.weights.dim() {
            return Err(DeepQError::dimension_mismatch(
                format!("{:?}", self.weights.dim()),
                format!("{:?}", weights.dim()),
            ));
        }
        self.weights = weights;
        Ok(self)
    }

    pub fn with_biases(mut self, biases: Array1<f32>) -> Result<Self> {
        if biases.dim() != self.biases.dim() {
            return Err(DeepQError::dimension_mismatch(
                format!("{:?}", self.biases.dim()),
                format!("{:?}", biases.dim()),
            ));
        }
        self.biases = biases;
        Ok(self)
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    fn affine(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        if inputs.ncols() != self.input_size() {
            return Err(DeepQError::dimension_mismatch(
                format!("[batch, {}]", self.input_size()),
                format!("{:?}", inputs.shape()),
            ));
        }
        Ok(inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0)))
    }

    /// Forward pass for a batch of inputs [batch, input_size].
    ///
    /// The cache is only produced while gradient recording is enabled.
    pub fn forward_batch(&self, inputs: ArrayView2<f32>) -> Result<(Array2<f32>, Option<DenseCache>)> {
        let pre_activation = self.affine(inputs)?;
        let mut outputs = pre_activation.clone();
        self.activation.apply(&mut outputs);

        let cache = grad::is_enabled().then(|| DenseCache {
            inputs: inputs.to_owned(),
            pre_activation,
        });
        Ok((outputs, cache))
    }

    /// Backward pass.
    ///
    /// Returns the gradient with respect to the layer input (when requested),
    /// the weight gradient and the bias gradient.
    pub fn backward_batch(
        &self,
        cache: &DenseCache,
        output_errors: ArrayView2<f32>,
        need_input_grad: bool,
    ) -> Result<(Option<Array2<f32>>, Array2<f32>, Array1<f32>)> {
        if output_errors.dim() != cache.pre_activation.dim() {
            return Err(DeepQError::dimension_mismatch(
                format!("{:?}", cache.pre_activation.dim()),
                format!("{:?}", output_errors.dim()),
            ));
        }

        let activation_deriv = self.activation.derivative(cache.pre_activation.view());
        let adjusted_error = &output_errors * &activation_deriv;
        let weight_gradients = cache.inputs.t().dot(&adjusted_error);
        let bias_gradients = adjusted_error.sum_axis(Axis(0));
        let input_gradients = need_input_grad.then(|| adjusted_error.dot(&self.weights.t()));

        Ok((input_gradients, weight_gradients, bias_gradients))
    }
}

impl LayerTrait for DenseLayer {
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.weights.view().into_dyn(), self.biases.view().into_dyn()]
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.weights.view_mut().into_dyn(), self.biases.view_mut().into_dyn()]
    }
}
