//! Error types for a sync run
//!
//! Every variant aborts the entity type it occurred in. The coordinator
//! catches them at the entity boundary and keeps going with the next one.

use tablesync_common::TableSyncError;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The row source could not be opened, or failed while streaming
    #[error("Source unavailable at '{location}': {reason}")]
    SourceUnavailable { location: String, reason: String },

    /// A row names a label the reference table does not contain
    #[error("Unknown reference label '{label}' on line {line} (not present in {table})")]
    UnknownReferenceLabel {
        line: u64,
        label: String,
        table: String,
    },

    /// The reference table maps the same label to more than one id
    #[error("Reference table {table} maps label '{label}' to more than one id")]
    AmbiguousReferenceLabel { table: String, label: String },

    /// A row does not have the shape the mapping requires
    #[error("Malformed row on line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    /// Two rows derive the same primary key with different payloads
    #[error("Duplicate key '{key}' on lines {first_line} and {line} with different payloads")]
    DuplicateKey {
        key: String,
        first_line: u64,
        line: u64,
    },

    /// Any database failure while reading references or writing the target table
    #[error("Database write failed: {0}")]
    WriteFailure(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] TableSyncError),
}

impl SyncError {
    pub fn source_unavailable(location: &str, reason: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(line: u64, reason: impl Into<String>) -> Self {
        Self::MalformedRow {
            line,
            reason: reason.into(),
        }
    }

    /// Stable short name used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::SourceUnavailable { .. } => "source_unavailable",
            SyncError::UnknownReferenceLabel { .. } => "unknown_reference_label",
            SyncError::AmbiguousReferenceLabel { .. } => "ambiguous_reference_label",
            SyncError::MalformedRow { .. } => "malformed_row",
            SyncError::DuplicateKey { .. } => "duplicate_key",
            SyncError::WriteFailure(_) => "write_failure",
            SyncError::Common(_) => "config",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(
            SyncError::source_unavailable("users.csv", "404").kind(),
            "source_unavailable"
        );
        assert_eq!(SyncError::malformed(3, "short").kind(), "malformed_row");
        assert_eq!(
            SyncError::from(sqlx::Error::RowNotFound).kind(),
            "write_failure"
        );
        assert_eq!(
            SyncError::from(TableSyncError::config("bad")).kind(),
            "config"
        );
    }

    #[test]
    fn test_messages_carry_context() {
        let err = SyncError::UnknownReferenceLabel {
            line: 7,
            label: "superuser".to_string(),
            table: "l21s_permission_types".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("superuser"));
        assert!(message.contains("line 7"));
        assert!(message.contains("l21s_permission_types"));
    }
}
