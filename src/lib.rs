// ABOUTME: Library root for the dbferry transfer engine
// ABOUTME: Exports the five public operations and their supporting types

pub mod codec;
pub mod connect;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod filters;
pub mod interactive;
pub mod options;
pub mod progress;
pub mod restore;
pub mod schema;
pub mod stream;
pub mod transfer;
pub mod utils;

pub use codec::Codec;
pub use connect::{ConnectionConfig, DbConn};
pub use dialect::{Dialect, DialectKind, SqlValue};
pub use error::{TransferError, TransferFailure};
pub use options::{
    CancelFlag, CloneOptions, CopyOptions, ErrorPolicy, ExportOptions, ImportOptions, MergeOptions,
    PipelineOptions,
};
pub use progress::{EventSink, ProgressEvent, Stats, TransferEvent};
pub use transfer::merge::{ConflictAction, ConflictDecider};
pub use transfer::{clone_database, copy_table, export, import, merge};
