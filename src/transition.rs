//! Transitions exchanged with the replay collaborator, and their stacking into
//! aligned batch tensors.

use ndarray::{stack, Array1, Array3, Array4, ArrayView1, ArrayView3, ArrayView4, Axis};
use serde::{Serialize, Deserialize};

use crate::config::ObservationShape;
use crate::error::{DeepQError, Result};

/// One environment step: (state, action, reward, next state, done).
///
/// States are channel-last `[height, width, channels]` frames with raw
/// intensities in [0, 255].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Array3<f32>,
    pub action: usize,
    pub reward: f32,
    pub next_state: Array3<f32>,
    pub done: bool,
}

impl Transition {
    pub fn new(state: Array3<f32>, action: usize, reward: f32, next_state: Array3<f32>, done: bool) -> Self {
        Transition { state, action, reward, next_state, done }
    }
}

/// A batch of transitions stacked field by field.
///
/// Only [`TransitionBatch::stack`] builds one, so every field has the same
/// number of rows.
#[derive(Clone, Debug)]
pub struct TransitionBatch {
    states: Array4<f32>,
    actions: Vec<usize>,
    rewards: Array1<f32>,
    next_states: Array4<f32>,
    dones: Array1<f32>,
}

impl TransitionBatch {
    /// Validate every transition against the agent's shape and action count,
    /// then stack the fields.
    pub fn stack(batch: &[Transition], in_shape: &ObservationShape, n_actions: usize) -> Result<Self> {
        if batch.is_empty() {
            return Err(DeepQError::EmptyBatch("no transitions to learn from".to_string()));
        }

        let expected = in_shape.hwc();
        for (i, transition) in batch.iter().enumerate() {
            for (field, frame) in [("state", &transition.state), ("next_state", &transition.next_state)] {
                if frame.dim() != expected {
                    return Err(DeepQError::DimensionMismatch {
                        expected: format!("{:?}", expected),
                        actual: format!("{:?} for {} of transition {}", frame.dim(), field, i),
                    });
                }
            }
            if transition.action >= n_actions {
                return Err(DeepQError::InvalidAction {
                    action: transition.action,
                    max_actions: n_actions,
                });
            }
        }

        let states: Vec<ArrayView3<f32>> = batch.iter().map(|t| t.state.view()).collect();
        let next_states: Vec<ArrayView3<f32>> = batch.iter().map(|t| t.next_state.view()).collect();

        Ok(TransitionBatch {
            states: stack(Axis(0), &states)?,
            actions: batch.iter().map(|t| t.action).collect(),
            rewards: batch.iter().map(|t| t.reward).collect(),
            next_states: stack(Axis(0), &next_states)?,
            dones: batch.iter().map(|t| if t.done { 1.0 } else { 0.0 }).collect(),
        })
    }

    /// [batch, height, width, channels]
    pub fn states(&self) -> ArrayView4<'_, f32> {
        self.states.view()
    }

    pub fn actions(&self) -> &[usize] {
        &self.actions
    }

    pub fn rewards(&self) -> ArrayView1<'_, f32> {
        self.rewards.view()
    }

    pub fn next_states(&self) -> ArrayView4<'_, f32> {
        self.next_states.view()
    }

    /// 1.0 for terminal transitions, 0.0 otherwise
    pub fn dones(&self) -> ArrayView1<'_, f32> {
        self.dones.view()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
