use thiserror::Error;

use crate::config::ConfigError;

/// Common error types for the jump service
#[derive(Debug, Error)]
pub enum JumpError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for jump service operations
pub type Result<T> = std::result::Result<T, JumpError>;

impl JumpError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure is scoped to a single peer and worth retrying on
    /// the next refresh cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::NotFound(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(JumpError::transport("dial failed").is_transient());
        assert!(JumpError::Timeout(30).is_transient());
        assert!(!JumpError::Cancelled.is_transient());
        assert!(!JumpError::from(ConfigError::InvalidPeerSpec("x".into())).is_transient());
    }

    #[test]
    fn test_io_conversion() {
        let err: JumpError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, JumpError::Io(_)));
        assert_eq!(err.to_string(), "disk");
    }
}
