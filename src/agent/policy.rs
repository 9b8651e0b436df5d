//! Epsilon-greedy action selection.

use ndarray::ArrayView1;
use rand::{Rng, RngCore};

use crate::error::{DeepQError, Result};

/// Index of the largest value.
///
/// Ties go to the lowest index. NaN never beats a number, so a row that is
/// entirely NaN selects action 0.
pub fn argmax(values: ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NAN;
    for (index, &value) in values.iter().enumerate() {
        if (best_value.is_nan() && !value.is_nan()) || value > best_value {
            best = index;
            best_value = value;
        }
    }
    best
}

/// Reject exploration probabilities outside [0, 1] (including NaN).
pub fn check_epsilon(epsilon: f32) -> Result<()> {
    if (0.0..=1.0).contains(&epsilon) {
        Ok(())
    } else {
        Err(DeepQError::InvalidParameter {
            name: "epsilon".to_string(),
            reason: format!("exploration probability must lie in [0, 1], got {}", epsilon),
        })
    }
}

/// With probability `epsilon` pick a uniformly random action, otherwise the
/// greedy one. `greedy` is only evaluated when exploiting.
pub fn epsilon_greedy<F>(epsilon: f32, n_actions: usize, rng: &mut dyn RngCore, greedy: F) -> Result<usize>
where
    F: FnOnce() -> Result<usize>,
{
    check_epsilon(epsilon)?;
    if n_actions == 0 {
        return Err(DeepQError::invalid_parameter("n_actions", "must be at least 1"));
    }

    if rng.gen::<f32>() < epsilon {
        let action = rng.gen_range(0..n_actions);
        tracing::trace!(action, epsilon, "exploring");
        Ok(action)
    } else {
        let action = greedy()?;
        tracing::trace!(action, epsilon, "exploiting");
        Ok(action)
    }
}
