//! Error types shared across TableSync crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, TableSyncError>;

/// Main error type for shared TableSync functionality
#[derive(Error, Debug)]
pub enum TableSyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid SQL identifier '{0}': expected letters, digits or '_', not starting with a digit, at most 63 bytes")]
    InvalidIdentifier(String),
}

impl TableSyncError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = TableSyncError::config("batch_size must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: batch_size must be greater than 0"
        );
    }

    #[test]
    fn test_invalid_identifier_message() {
        let err = TableSyncError::InvalidIdentifier("l21s-users".to_string());
        assert!(err.to_string().starts_with("Invalid SQL identifier 'l21s-users'"));
    }
}
