//! Error types for TideKV

use thiserror::Error;

/// Result type alias for TideKV operations
pub type Result<T> = std::result::Result<T, TideError>;

/// TideKV error types
///
/// Validation variants carry the operation that was attempted (`op`) and
/// the partition it targeted so the rendered message names both.
#[derive(Error, Debug)]
pub enum TideError {
    /// Partition name is taken, or reserved
    #[error("{op}: partition '{name}' already exists")]
    AlreadyExists { op: &'static str, name: String },

    /// Partition is not on disk, or not tracked open
    #[error("{op}: partition '{name}' not found")]
    NotFound { op: &'static str, name: String },

    /// Destructive operation called without confirmation
    #[error("{op}: dropping partition '{name}' requires confirmation")]
    ConfirmationRequired { op: &'static str, name: String },

    /// Mutating call on a read-only handle
    #[error("{op}: partition '{name}' was opened read-only")]
    ReadOnlyViolation { op: &'static str, name: String },

    /// Malformed range bounds
    #[error("{op}: invalid range on partition '{name}': {reason}")]
    InvalidRange {
        op: &'static str,
        name: String,
        reason: String,
    },

    /// Timestamp falls in a day bucket after today
    #[error("{op}: timestamp {timestamp} maps to future partition '{name}'")]
    FutureTimestamp {
        op: &'static str,
        name: String,
        timestamp: i64,
    },

    /// Timestamp falls in a day bucket outside the retention window
    #[error("{op}: timestamp {timestamp} maps to partition '{name}' outside the {max_days}-day retention window")]
    OutOfRetention {
        op: &'static str,
        name: String,
        timestamp: i64,
        max_days: u32,
    },

    /// Retention must be a positive number of days
    #[error("invalid retention: {value} (expected a positive number of days)")]
    InvalidRetention { value: i64 },

    /// Timestamp cannot be rendered as a calendar day
    #[error("timestamp {timestamp} is outside the supported calendar range")]
    InvalidTimestamp { timestamp: i64 },

    /// Partition name rejected before reaching the engine
    #[error("{op}: invalid partition name '{name}': {reason}")]
    InvalidName {
        op: &'static str,
        name: String,
        reason: String,
    },

    /// Handle used after close, drop or shutdown
    #[error("{op}: partition '{name}' is closed")]
    PartitionClosed { op: &'static str, name: String },

    /// Registry used after shutdown
    #[error("{op}: environment is closed")]
    EnvironmentClosed { op: &'static str },

    /// Underlying storage engine failure
    #[error("Engine error: {0}")]
    Engine(#[from] heed::Error),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Value serialization error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Background blocking task failed to complete
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl TideError {
    /// Check if error reports a caller mistake rather than an engine failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TideError::AlreadyExists { .. }
                | TideError::NotFound { .. }
                | TideError::ConfirmationRequired { .. }
                | TideError::ReadOnlyViolation { .. }
                | TideError::InvalidRange { .. }
                | TideError::FutureTimestamp { .. }
                | TideError::OutOfRetention { .. }
                | TideError::InvalidRetention { .. }
                | TideError::InvalidTimestamp { .. }
                | TideError::InvalidName { .. }
        )
    }

    /// Check if error is a missing partition
    pub fn is_not_found(&self) -> bool {
        matches!(self, TideError::NotFound { .. })
    }

    pub(crate) fn not_found(op: &'static str, name: &str) -> Self {
        TideError::NotFound {
            op,
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(op: &'static str, name: &str) -> Self {
        TideError::AlreadyExists {
            op,
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_operation_and_partition() {
        let err = TideError::not_found("open", "users");
        assert_eq!(err.to_string(), "open: partition 'users' not found");

        let err = TideError::ReadOnlyViolation {
            op: "put",
            name: "audit".into(),
        };
        assert!(err.to_string().contains("put"));
        assert!(err.to_string().contains("audit"));
    }

    #[test]
    fn test_classification() {
        assert!(TideError::already_exists("create", "a").is_validation());
        assert!(TideError::not_found("close", "a").is_not_found());
        assert!(!TideError::EnvironmentClosed { op: "list" }.is_validation());
        assert!(!TideError::Encoding("bad".into()).is_not_found());
    }
}
