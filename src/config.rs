//! # Agent Configuration
//!
//! Construction parameters shared by every agent variant. A configuration is
//! validated once when an agent is built and stays fixed for the agent's
//! lifetime.
//!
//! ```rust
//! use deepq::config::{AgentConfig, ObservationShape};
//!
//! let config = AgentConfig::new(ObservationShape::new(4, 84, 84), 6)
//!     .with_gamma(0.99)
//!     .with_learning_rate(1e-4)
//!     .with_tau(0.01);
//! assert!(config.validate().is_ok());
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeepQError, Result};
use crate::network;

/// Where tensors live and how the numeric work is scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Every batch item is processed on the calling thread
    #[default]
    Cpu,
    /// Independent batch items of the convolutional stage run on the rayon pool
    Parallel,
}

impl Device {
    pub fn is_parallel(&self) -> bool {
        matches!(self, Device::Parallel)
    }
}

/// Observation shape in (channels, height, width) order.
///
/// Observations themselves arrive channel-last (height × width × channels).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ObservationShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        ObservationShape { channels, height, width }
    }

    /// Shape of one observation as the environment delivers it
    pub fn hwc(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }
}

impl From<(usize, usize, usize)> for ObservationShape {
    fn from((channels, height, width): (usize, usize, usize)) -> Self {
        ObservationShape::new(channels, height, width)
    }
}

/// Construction parameters for an agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub device: Device,

    pub in_shape: ObservationShape,

    pub n_actions: usize,

    /// Discount factor, in [0, 1]
    pub gamma: f32,

    pub learning_rate: f32,

    /// Soft-update coefficient for the target network, in (0, 1]
    pub tau: f32,
}

impl AgentConfig {
    pub const DEFAULT_GAMMA: f32 = 0.99;
    pub const DEFAULT_LEARNING_RATE: f32 = 1e-4;
    pub const DEFAULT_TAU: f32 = 0.005;

    pub fn new(in_shape: ObservationShape, n_actions: usize) -> Self {
        AgentConfig {
            device: Device::Cpu,
            in_shape,
            n_actions,
            gamma: Self::DEFAULT_GAMMA,
            learning_rate: Self::DEFAULT_LEARNING_RATE,
            tau: Self::DEFAULT_TAU,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_tau(mut self, tau: f32) -> Self {
        self.tau = tau;
        self
    }

    /// Check every invariant the agent relies on.
    pub fn validate(&self) -> Result<()> {
        if self.n_actions == 0 {
            return Err(DeepQError::invalid_parameter("n_actions", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(DeepQError::InvalidParameter {
                name: "gamma".to_string(),
                reason: format!("must lie in [0, 1], got {}", self.gamma),
            });
        }
        if !(self.tau > 0.0 && self.tau <= 1.0) {
            return Err(DeepQError::InvalidParameter {
                name: "tau".to_string(),
                reason: format!("must lie in (0, 1], got {}", self.tau),
            });
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(DeepQError::InvalidParameter {
                name: "learning_rate".to_string(),
                reason: format!("must be finite and positive, got {}", self.learning_rate),
            });
        }
        network::feature_map_shape(&self.in_shape)?;
        Ok(())
    }

    /// Parse a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AgentConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
