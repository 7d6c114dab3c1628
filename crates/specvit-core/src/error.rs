//! Error types for SpecViT.

use thiserror::Error;

/// Main error type for model construction and inference.
#[derive(Error, Debug)]
pub enum VitError {
    /// Invalid construction-time configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Input tensor does not match the configured layout.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Audio processing errors.
    #[error("Audio error: {0}")]
    Audio(String),

    /// Weight loading errors.
    #[error("Model error: {0}")]
    Model(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VitError {
    /// Shorthand for [`VitError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for [`VitError::Shape`].
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }
}

/// Result type alias for SpecViT operations.
pub type VitResult<T> = Result<T, VitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VitError::config("hidden_size must be divisible by num_heads");
        assert_eq!(
            err.to_string(),
            "Config error: hidden_size must be divisible by num_heads"
        );
    }

    #[test]
    fn test_candle_error_converts() {
        let err: VitError = candle_core::Error::Msg("boom".to_string()).into();
        assert!(matches!(err, VitError::Candle(_)));
    }
}
