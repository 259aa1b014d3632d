// ABOUTME: Error taxonomy for transfer operations
// ABOUTME: Separates fatal failures from recoverable per-statement skips

use crate::progress::Stats;
use thiserror::Error;

/// Errors produced by the transfer engine.
///
/// Fatal variants abort the running operation; `Execution` is recoverable
/// when the error policy is [`Continue`](crate::options::ErrorPolicy::Continue),
/// in which case the offending statement is skipped and counted instead.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Cannot reach or authenticate to a database server.
    #[error("connection failed: {0}")]
    Connectivity(String),

    /// Malformed SQL in a dump stream (unterminated quote, comment, etc.).
    #[error("parse error in statement {index}: {message}")]
    Parse { index: u64, message: String },

    /// Disk or compression failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A statement was rejected by the destination server.
    #[error("statement rejected by server: {message}")]
    Execution { statement: String, message: String },

    /// Structural mismatch between an existing table and an incoming one.
    #[error("schema mismatch for table '{table}': {message}")]
    SchemaMismatch { table: String, message: String },

    /// A native restore tool exited with a non-zero status.
    #[error("{tool} exited with status {status}")]
    ExternalTool { tool: String, status: i32 },

    /// Invalid caller-supplied options (zero batch size, bad identifier, ...).
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// The operation was cancelled between batches.
    #[error("operation cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn connectivity(message: impl Into<String>) -> Self {
        TransferError::Connectivity(message.into())
    }

    pub fn parse(index: u64, message: impl Into<String>) -> Self {
        TransferError::Parse {
            index,
            message: message.into(),
        }
    }

    pub fn execution(statement: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Execution {
            statement: statement.into(),
            message: message.into(),
        }
    }

    /// Whether this error may be skipped under the `Continue` policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransferError::Execution { .. })
    }
}

/// A failed operation together with the statistics accumulated before the
/// failure, so callers can report partial progress.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct TransferFailure {
    #[source]
    pub error: TransferError,
    pub stats: Stats,
}

impl TransferFailure {
    pub fn new(error: TransferError, stats: Stats) -> Self {
        TransferFailure { error, stats }
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_is_recoverable() {
        let err = TransferError::execution("INSERT INTO t VALUES (1)", "duplicate key");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_fatal_variants_are_not_recoverable() {
        assert!(!TransferError::Cancelled.is_recoverable());
        assert!(!TransferError::connectivity("refused").is_recoverable());
        assert!(!TransferError::parse(3, "unterminated quote").is_recoverable());
    }

    #[test]
    fn test_failure_carries_stats() {
        let mut stats = Stats::default();
        stats.rows_transferred = 42;
        let failure = TransferFailure::new(TransferError::Cancelled, stats);
        assert_eq!(failure.stats.rows_transferred, 42);
        assert_eq!(failure.to_string(), "operation cancelled");
    }
}
