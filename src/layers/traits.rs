use ndarray::{ArrayViewD, ArrayViewMutD};

/// Trait exposing a layer's trainable tensors.
///
/// Layers list their tensors in a fixed order, weights before biases. Networks
/// concatenate these lists, and the optimizer, gradient buffers and target
/// soft updates all pair tensors by position in that order.
pub trait Layer: Send + Sync {
    /// Trainable tensors, read-only
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>>;

    /// Trainable tensors, writable in place
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>>;

    /// Number of scalar parameters in the layer
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }
}
