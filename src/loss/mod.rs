//! Regression losses between predicted action values and TD targets.

pub mod functions;

pub use functions::{HuberLoss, Loss};
