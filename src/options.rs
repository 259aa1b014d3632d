// ABOUTME: Immutable option values passed to each transfer operation
// ABOUTME: One value per call, no process-wide state survives between operations

use crate::codec::Codec;
use crate::connect::ConnectionConfig;
use crate::error::TransferError;
use crate::filters::TableFilter;
use crate::progress::EventSink;
use crate::transfer::merge::ConflictDecider;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What to do when the destination server rejects a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Roll back the current batch and abort the operation.
    Stop,
    /// Skip the failing statement, retry the rest of the batch, keep going.
    Continue,
}

/// Cooperative cancellation handle, checked between batches and between
/// statements — never mid-transaction.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Settings shared by every operation's pipeline.
#[derive(Clone)]
pub struct PipelineOptions {
    /// Statements (or rows, for data copies) per transaction. Always >= 1.
    pub batch_size: usize,
    pub error_policy: ErrorPolicy,
    pub events: EventSink,
    pub cancel: CancelFlag,
}

impl PipelineOptions {
    /// Default batch size, matching common dump tooling.
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    pub fn new(batch_size: usize) -> Result<Self, TransferError> {
        if batch_size == 0 {
            return Err(TransferError::InvalidOptions(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(PipelineOptions {
            batch_size,
            error_policy: ErrorPolicy::Stop,
            events: EventSink::disabled(),
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            error_policy: ErrorPolicy::Stop,
            events: EventSink::disabled(),
            cancel: CancelFlag::new(),
        }
    }
}

/// Options for `export`: live database -> dump file.
pub struct ExportOptions {
    pub source: ConnectionConfig,
    pub path: PathBuf,
    /// Explicit codec; when `None` the file suffix decides.
    pub codec: Option<Codec>,
    pub include_data: bool,
    /// Omit CREATE TABLE statements (data-only dump).
    pub no_create: bool,
    /// Emit DROP TABLE IF EXISTS before each CREATE.
    pub drop_if_exists: bool,
    /// Emit session SET statements at the top of the dump.
    pub include_vars: bool,
    pub filter: TableFilter,
    pub pipeline: PipelineOptions,
}

/// Options for `import`: dump file -> live database.
pub struct ImportOptions {
    pub destination: ConnectionConfig,
    pub path: PathBuf,
    pub codec: Option<Codec>,
    /// Create the destination database when it does not exist.
    pub create_db: bool,
    /// Import into this database instead of the one named in the config,
    /// overriding any database referenced by the dump itself.
    pub rename_to: Option<String>,
    /// Parallel jobs for native-format restores (PostgreSQL only).
    pub jobs: u32,
    pub pipeline: PipelineOptions,
}

/// Options for `clone_database`: live source -> live destination.
pub struct CloneOptions {
    pub source: ConnectionConfig,
    pub destination: ConnectionConfig,
    /// Copy schema only, skip the data phase entirely.
    pub structure_only: bool,
    pub drop_if_exists: bool,
    pub filter: TableFilter,
    pub pipeline: PipelineOptions,
}

/// Options for `copy_table`: one table, optionally row-filtered.
pub struct CopyOptions {
    pub source: ConnectionConfig,
    pub destination: ConnectionConfig,
    pub table: String,
    /// Optional WHERE clause (without the keyword) applied at the source.
    pub where_clause: Option<String>,
    pub drop_if_exists: bool,
    pub pipeline: PipelineOptions,
}

/// Options for `merge`: several sources folded into one destination.
pub struct MergeOptions {
    /// Sources are merged in the order given here.
    pub sources: Vec<ConnectionConfig>,
    pub destination: ConnectionConfig,
    /// Decides what to do per colliding (table, source) pair. Called at
    /// most once per pair; the result is cached for the whole merge.
    pub decide: ConflictDecider,
    pub pipeline: PipelineOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(PipelineOptions::new(0).is_err());
        assert!(PipelineOptions::new(1).is_ok());
    }

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
