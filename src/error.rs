use thiserror::Error;

/// Result type for deepq operations
pub type Result<T> = std::result::Result<T, DeepQError>;

/// Main error type for the deepq library
#[derive(Error, Debug)]
pub enum DeepQError {
    /// Invalid dimensions for operations
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// Invalid action
    #[error("Invalid action {action}: must be less than {max_actions}")]
    InvalidAction {
        action: usize,
        max_actions: usize,
    },

    /// Empty batch handed to an update
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// Training error
    #[error("Training error: {0}")]
    Training(String),

    /// Array reshaping failed
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper functions for common error patterns
impl DeepQError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        DeepQError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        DeepQError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
