//! Records exchanged with the data source.

use serde::Serialize;

use crate::link::Link;

/// Transfer identifier (row id).
pub type TransferId = i64;

/// Lifecycle of a transfer row, stored as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Queued, waiting for admission.
    Submitted,
    /// Admitted by a node and handed to the dispatcher.
    Active,
    Finished,
    Failed,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Submitted => "submitted",
            TransferState::Active => "active",
            TransferState::Finished => "finished",
            TransferState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(TransferState::Submitted),
            "active" => Some(TransferState::Active),
            "finished" => Some(TransferState::Finished),
            "failed" => Some(TransferState::Failed),
            _ => None,
        }
    }
}

/// A queued transfer as the scheduler sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub id: TransferId,
    pub job_id: String,
    pub vo: String,
    pub activity: String,
    pub link: Link,
    pub source_url: String,
    pub dest_url: String,
    pub file_size: i64,
    pub priority: i32,
    pub submitted_at: i64,
}

/// Input for [`SqliteStore::submit`](super::SqliteStore::submit).
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub job_id: String,
    pub vo: String,
    pub activity: String,
    pub source_url: String,
    pub dest_url: String,
    pub file_size: i64,
    pub priority: i32,
}

/// Completion report for an active transfer.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub success: bool,
    /// Failure reason; ignored on success.
    pub reason: Option<String>,
    /// Retries the transfer agent performed.
    pub retries: u32,
}

/// Running/queued counts for one (link, organization, activity) queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueActivity {
    pub link: Link,
    pub vo: String,
    pub activity: String,
    pub active: u64,
    pub submitted: u64,
}

/// A node's position among live nodes after a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Membership {
    /// Zero-based position ordered by node id.
    pub index: usize,
    /// Number of live, non-draining nodes.
    pub count: usize,
}

/// Stored heartbeat row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub node: String,
    pub beat_at: i64,
    pub drain: bool,
}

/// Per-link view used by the `status` command.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSummary {
    pub link: Link,
    pub submitted: u64,
    pub active: u64,
    pub streams: u32,
    pub ema: f64,
}
