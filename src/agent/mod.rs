//! # Reinforcement Learning Agents Module
//!
//! Agents turn observations into actions and learn from batches of
//! transitions. The implementation provided here is DQN (Deep Q-Network) with
//! a softly tracking target network.
//!
//! ## Core Concepts
//!
//! - **Agent**: capability every variant offers (`act` and `update`)
//! - **Online network θ**: chooses actions and is trained by gradient descent
//! - **Target network θ′**: supplies bootstrap values and trails θ through
//!   Polyak averaging, `θ′ ← (1 − τ)·θ′ + τ·θ`
//! - **Exploration**: epsilon-greedy, with epsilon chosen by the caller on
//!   every call
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use deepq::agent::{Agent, DqnAgentBuilder};
//! use ndarray::Array3;
//!
//! let agent = DqnAgentBuilder::new()
//!     .in_shape((4, 84, 84))
//!     .n_actions(6)
//!     .gamma(0.99)
//!     .tau(0.01)
//!     .seed(7)
//!     .build()
//!     .unwrap();
//!
//! let frame = Array3::<f32>::zeros((84, 84, 4));
//! let action = agent.act(frame.view(), 0.05, &mut rand::thread_rng()).unwrap();
//! assert!(action < 6);
//! ```
//!
//! Replay storage, epsilon schedules and the environment loop belong to the
//! caller.

pub mod policy;
pub mod traits;

mod dqn;

pub use dqn::{DqnAgent, DqnAgentBuilder, UpdateReport};
pub use traits::{Agent, ValueBasedAgent};
