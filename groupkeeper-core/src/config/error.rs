//! Configuration error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    FileReadError(String),

    #[error("Failed to write configuration file: {0}")]
    FileWriteError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Failed to serialize configuration: {0}")]
    SerializeError(String),

    /// Environment override present but unparsable
    #[error("Invalid value for {key}: {reason}")]
    InvalidEnv { key: &'static str, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_env_display() {
        let err = ConfigError::InvalidEnv {
            key: "GROUPKEEPER_RECONCILE_JOIN_TIMEOUT",
            reason: "expected duration".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for GROUPKEEPER_RECONCILE_JOIN_TIMEOUT: expected duration"
        );
    }
}
