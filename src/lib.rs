//! # deepq - Deep Q-Network Agent
//!
//! deepq learns action values from pixel observations. A convolutional
//! network estimates one value per discrete action, an epsilon-greedy policy
//! picks actions from those estimates, and each update regresses the taken
//! action's value toward a one-step temporal-difference target computed by a
//! slowly tracking copy of the network.
//!
//! ## Key Features
//!
//! - **Value Network**: three convolutional stages and a two-layer dense head
//!   over `[height, width, channels]` frames
//! - **Learning Step**: Huber loss on TD errors, Adam or SGD, and Polyak
//!   averaging of the target network after every step
//! - **Gradient Recording Mode**: forward passes keep activations only when
//!   asked to, so acting never pays for backpropagation
//! - **Parallel Device**: per-item convolution work can run on the rayon pool
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deepq::agent::{Agent, DqnAgent};
//! use deepq::config::{AgentConfig, ObservationShape};
//! use deepq::transition::Transition;
//! use ndarray::Array3;
//!
//! let config = AgentConfig::new(ObservationShape::new(4, 84, 84), 6).with_tau(0.01);
//! let mut agent = DqnAgent::new(config).unwrap();
//! let mut rng = rand::thread_rng();
//!
//! let state = Array3::<f32>::zeros((84, 84, 4));
//! let action = agent.act(state.view(), 1.0, &mut rng).unwrap();
//!
//! let next_state = Array3::<f32>::from_elem((84, 84, 4), 128.0);
//! let batch = vec![Transition::new(state, action, 1.0, next_state, false); 32];
//! agent.update(&batch).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Activation functions (ReLU, linear)
//! - [`agent`] - The agent capability and the DQN implementation
//! - [`config`] - Construction parameters and their validation
//! - [`error`] - Error types and result handling
//! - [`grad`] - Gradient recording mode
//! - [`layers`] - Convolutional and dense layers
//! - [`loss`] - Loss functions for training
//! - [`network`] - The convolutional action-value network
//! - [`optimizer`] - Optimization algorithms
//! - [`transition`] - Transitions and batch stacking

pub mod activations;
pub mod agent;
pub mod config;
pub mod error;
pub mod grad;
pub mod layers;
pub mod loss;
pub mod network;
pub mod optimizer;
pub mod transition;

#[cfg(test)]
mod tests;
