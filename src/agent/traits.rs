use ndarray::{Array1, ArrayView3};
use rand::RngCore;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::transition::Transition;

/// Capability shared by every agent variant.
///
/// The trait is object safe, so a training loop can hold a `Box<dyn Agent>`
/// and swap variants without changing.
pub trait Agent {
    /// Construction parameters the agent was built with
    fn config(&self) -> &AgentConfig;

    /// Pick an action for one `[height, width, channels]` observation.
    ///
    /// Explores uniformly with probability `epsilon`, which must lie in
    /// [0, 1]. Never records gradients and never changes parameters.
    fn act(&self, observation: ArrayView3<f32>, epsilon: f32, rng: &mut dyn RngCore) -> Result<usize>;

    /// Learn from one batch of transitions.
    ///
    /// Parameter mutation is the only effect; on error no parameter changes.
    fn update(&mut self, batch: &[Transition]) -> Result<()>;

    fn n_actions(&self) -> usize {
        self.config().n_actions
    }
}

/// Trait for agents that learn action values
pub trait ValueBasedAgent: Agent {
    /// Get Q-values for a single observation
    fn q_values(&self, observation: ArrayView3<f32>) -> Result<Array1<f32>>;

    /// Get the value of a state (max Q-value)
    fn state_value(&self, observation: ArrayView3<f32>) -> Result<f32> {
        let q_values = self.q_values(observation)?;
        Ok(q_values.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b)))
    }
}
