// ABOUTME: Progress event stream and transfer statistics
// ABOUTME: Rate-limits progress emission so sinks are never flooded

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Minimum spacing between two progress events for the same unit label.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// A single progress sample for one unit of work (usually a table).
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Unit label, e.g. the table currently being copied.
    pub label: String,
    /// Units completed so far.
    pub current: u64,
    /// Total units, if known up front.
    pub total: Option<u64>,
    /// When the sample was taken.
    pub at: Instant,
}

/// Events an operation emits while running.
///
/// Progress is rate-limited per label; warnings, skipped statements and
/// external tool output are always delivered.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Progress(ProgressEvent),
    /// Non-fatal schema translation warning (dropped dialect feature, ...).
    Warning(String),
    /// A statement skipped under the `Continue` error policy.
    StatementSkipped { statement: String, error: String },
    /// One line of stderr from a supervised native tool.
    ToolOutput(String),
}

/// Sending half of the event stream handed to an operation.
///
/// The engine produces events; the caller consumes the paired receiver.
/// A disabled sink drops everything, so library users who don't care about
/// progress pay nothing.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<UnboundedSender<TransferEvent>>,
    last_emit: Arc<Mutex<HashMap<String, Instant>>>,
}

impl EventSink {
    /// Create a connected sink/receiver pair.
    pub fn channel() -> (EventSink, UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink {
            tx: Some(tx),
            last_emit: Arc::new(Mutex::new(HashMap::new())),
        };
        (sink, rx)
    }

    /// A sink that discards all events.
    pub fn disabled() -> EventSink {
        EventSink {
            tx: None,
            last_emit: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Emit a progress sample, rate-limited to one per label per 100ms.
    ///
    /// A terminal sample (`current == total`) always goes through so bars
    /// can finish cleanly.
    pub fn progress(&self, label: &str, current: u64, total: Option<u64>) {
        if self.tx.is_none() {
            return;
        }
        let now = Instant::now();
        let finished = total.is_some_and(|t| current >= t);
        if !finished {
            let mut last = match self.last_emit.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match last.get(label) {
                Some(prev) if now.duration_since(*prev) < PROGRESS_INTERVAL => return,
                _ => {
                    last.insert(label.to_string(), now);
                }
            }
        }
        self.send(TransferEvent::Progress(ProgressEvent {
            label: label.to_string(),
            current,
            total,
            at: now,
        }));
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.send(TransferEvent::Warning(message));
    }

    pub fn statement_skipped(&self, statement: &str, error: &str) {
        self.send(TransferEvent::StatementSkipped {
            statement: statement.to_string(),
            error: error.to_string(),
        });
    }

    pub fn tool_output(&self, line: String) {
        self.send(TransferEvent::ToolOutput(line));
    }

    fn send(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            // The receiver hanging up is not an engine error.
            let _ = tx.send(event);
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        EventSink::disabled()
    }
}

/// Counters accumulated by one operation.
///
/// Monotonic while the operation runs; the returned value is a final
/// snapshot. Counters are only ever mutated on the pipeline task.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats {
    pub tables_transferred: u64,
    pub rows_transferred: u64,
    pub bytes_written: u64,
    pub statements_executed: u64,
    pub errors_skipped: u64,
    pub duration: Duration,
}
