use ndarray::{Array1, ArrayView1};

/// Trait defining the interface for loss functions over a batch of scalar predictions
pub trait Loss: Send + Sync {
    /// Mean loss over the batch
    fn compute(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>) -> f32;

    /// Gradient of the mean loss with respect to each prediction
    fn gradient(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>) -> Array1<f32>;
}

/// Huber loss (smooth L1)
///
/// Quadratic for errors up to `delta`, linear beyond, so a single large TD
/// error cannot dominate the update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HuberLoss {
    pub delta: f32,
}

impl HuberLoss {
    pub fn new(delta: f32) -> Self {
        HuberLoss { delta }
    }
}

impl Default for HuberLoss {
    fn default() -> Self {
        HuberLoss::new(1.0)
    }
}

impl Loss for HuberLoss {
    fn compute(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>) -> f32 {
        let diff = &predictions - &targets;
        let batch_size = predictions.len().max(1) as f32;
        diff.mapv(|x| {
            let abs_x = x.abs();
            if abs_x <= self.delta {
                0.5 * x * x
            } else {
                self.delta * abs_x - 0.5 * self.delta * self.delta
            }
        }).sum() / batch_size
    }

    fn gradient(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>) -> Array1<f32> {
        let diff = &predictions - &targets;
        let batch_size = predictions.len().max(1) as f32;
        diff.mapv(|x| {
            if x.abs() <= self.delta {
                x
            } else {
                self.delta * x.signum()
            }
        }) / batch_size
    }
}
