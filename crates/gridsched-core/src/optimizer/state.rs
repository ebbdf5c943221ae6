//! Per-link observation and decision records.

use serde::Serialize;

use crate::link::Link;

/// Snapshot of one link over the telemetry window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairState {
    /// Observation time (Unix seconds).
    pub timestamp: i64,
    /// Bytes per second delivered by successful transfers in the window.
    pub throughput: f64,
    /// Mean duration of successful transfers, seconds.
    pub avg_duration: f64,
    /// Successful / completed transfers in the window (0 when none completed).
    pub success_rate: f64,
    pub retry_count: u64,
    pub active: u64,
    pub queue_size: u64,
    /// EMA throughput stored by the previous pass. Meaningless while
    /// `last_decision_at` is `None`.
    pub ema: f64,
    pub filesize_avg: f64,
    pub filesize_stddev: f64,
    /// Stream count currently in effect.
    pub streams: u32,
    /// Transfers that finished or failed inside the window.
    pub completions: u64,
    /// When the current hold started, or the last non-hold decision was made.
    /// `None` until the link is first evaluated.
    pub last_decision_at: Option<i64>,
    /// Whether the last decision was a hold.
    pub stable: bool,
}

impl PairState {
    /// No transfers running. Queued work alone says nothing about the link.
    pub fn is_idle(&self) -> bool {
        self.active == 0
    }
}

/// Which branch of the controller produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    /// Previous hold is still within the steady interval.
    Steady,
    NoCompletions,
    AggressiveIncrease,
    Increase,
    Decrease,
    Hold,
}

impl DecisionReason {
    pub fn is_hold(self) -> bool {
        matches!(
            self,
            DecisionReason::Steady | DecisionReason::NoCompletions | DecisionReason::Hold
        )
    }
}

/// Outcome of one optimizer evaluation for one link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizerDecision {
    pub link: Link,
    pub timestamp: i64,
    pub previous_streams: u32,
    pub streams: u32,
    pub reason: DecisionReason,
    pub rationale: String,
    /// EMA throughput after this pass.
    pub ema: f64,
    pub state: PairState,
}
