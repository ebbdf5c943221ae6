//! Stall detection for the node's critical loops.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::LivenessConfig;

/// Loops whose progress the heartbeat watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CriticalLoop {
    /// Scheduler record retrieval.
    Scheduler,
    /// Optimizer record update.
    Optimizer,
    /// Stalled-transfer detection.
    Reaper,
}

impl CriticalLoop {
    pub const ALL: [CriticalLoop; 3] = [
        CriticalLoop::Scheduler,
        CriticalLoop::Optimizer,
        CriticalLoop::Reaper,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CriticalLoop::Scheduler => "scheduler",
            CriticalLoop::Optimizer => "optimizer",
            CriticalLoop::Reaper => "reaper",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == s)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CriticalLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loop that has not reported a pass within its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stall {
    pub which: CriticalLoop,
    pub idle_secs: i64,
    pub threshold_secs: i64,
}

impl fmt::Display for Stall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} loop idle for {}s (threshold {}s)",
            self.which, self.idle_secs, self.threshold_secs
        )
    }
}

/// Last pass time (Unix seconds) per critical loop. Shared by the loops
/// (writers) and the heartbeat (reader).
#[derive(Debug)]
pub struct LivenessTracker {
    last_pass: [AtomicI64; 3],
    thresholds: [i64; 3],
}

impl LivenessTracker {
    /// Every loop starts as having passed at `now`.
    pub fn new(cfg: &LivenessConfig, now: i64) -> Self {
        let secs = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        Self {
            last_pass: [AtomicI64::new(now), AtomicI64::new(now), AtomicI64::new(now)],
            thresholds: [
                secs(cfg.scheduler_stall_secs),
                secs(cfg.optimizer_stall_secs),
                secs(cfg.reaper_stall_secs),
            ],
        }
    }

    pub fn record(&self, which: CriticalLoop, now: i64) {
        self.last_pass[which.slot()].fetch_max(now, Ordering::Relaxed);
    }

    pub fn last_pass(&self, which: CriticalLoop) -> i64 {
        self.last_pass[which.slot()].load(Ordering::Relaxed)
    }

    /// First loop (in declaration order) idle longer than its threshold.
    pub fn stalled(&self, now: i64) -> Option<Stall> {
        CriticalLoop::ALL.into_iter().find_map(|which| {
            let idle = now - self.last_pass(which);
            let threshold = self.thresholds[which.slot()];
            (idle > threshold).then_some(Stall {
                which,
                idle_secs: idle,
                threshold_secs: threshold,
            })
        })
    }
}
