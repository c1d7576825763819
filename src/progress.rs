//! Sync progress reporting.
//!
//! Every sync pass emits an ordered sequence of [`SyncEvent`]s. The CLI
//! renders them as human lines or JSON lines on **stderr** so stdout remains
//! parseable for scripts; the streaming API forwards them over a channel.

use std::io::Write;

use serde::Serialize;

use crate::models::{SyncReason, SyncReport};

/// One stage of a sync pass, in emission order.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Sync is starting for this collection.
    Init { db_key: String, collection: String },
    /// No work required.
    Skipped { reason: SyncReason },
    /// Existing points are being deleted ahead of a full resync.
    Clearing,
    /// Existing points are gone.
    Cleared { deleted: u64 },
    /// Documents fetched from the source.
    Loaded { count: u64, limited: bool },
    /// Mid-pass progress, emitted every few documents.
    Processing {
        progress: u8,
        current: u64,
        total: u64,
        chunks: u64,
    },
    /// A full batch was upserted to the index.
    BatchUploaded { size: u64 },
    /// The final partial batch was upserted.
    FinalBatch { size: u64 },
    /// Recomputing the fingerprint and writing the state record.
    SavingState,
    /// Sync finished; the report carries the aggregate counts.
    Complete { report: SyncReport },
    /// Sync aborted; the feed halts after this event.
    Error { message: String },
}

/// Reports sync progress. Implementations write to stderr (human or JSON) or
/// forward events to a channel.
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the sync pipeline.
    fn report(&self, event: &SyncEvent);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: &SyncEvent) {
        let line = match event {
            SyncEvent::Init { db_key, collection } => {
                format!("sync {}.{}  starting...\n", db_key, collection)
            }
            SyncEvent::Skipped { reason } => format!("  skipped ({})\n", reason.as_str()),
            SyncEvent::Clearing => "  clearing existing vectors...\n".to_string(),
            SyncEvent::Cleared { deleted } => format!("  cleared {} points\n", deleted),
            SyncEvent::Loaded { count, limited } => {
                if *limited {
                    format!("  loaded {} documents (limited)\n", count)
                } else {
                    format!("  loaded {} documents\n", count)
                }
            }
            SyncEvent::Processing {
                progress,
                current,
                total,
                chunks,
            } => format!(
                "  processing {}/{} documents ({}%), {} chunks\n",
                current, total, progress, chunks
            ),
            SyncEvent::BatchUploaded { size } => format!("  uploaded batch of {} vectors\n", size),
            SyncEvent::FinalBatch { size } => {
                format!("  uploaded final batch of {} vectors\n", size)
            }
            SyncEvent::SavingState => "  saving state...\n".to_string(),
            SyncEvent::Complete { report } => format!(
                "  done: {} documents, {} chunks\n",
                report.documents_processed, report.chunks_written
            ),
            SyncEvent::Error { message } => format!("  error: {}\n", message),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: &SyncEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: &SyncEvent) {}
}

/// Forwards events to a channel — the streaming sync variant. Send failures
/// (receiver dropped) are ignored; the sync keeps running to completion.
pub struct ChannelProgress {
    sender: tokio::sync::mpsc::UnboundedSender<SyncEvent>,
}

impl ChannelProgress {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self { sender }
    }
}

impl SyncProgressReporter for ChannelProgress {
    fn report(&self, event: &SyncEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller can pass it to sync.
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
