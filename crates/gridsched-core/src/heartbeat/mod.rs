//! Node liveness, membership and leader election.
//!
//! Every node beats into the shared store. The store answers with the node's
//! position among live, non-draining nodes ordered by node id; position 0 is
//! the lead. A node only considers itself lead while its own last successful
//! beat is younger than the grace interval, which is exactly when its peers
//! stop counting it as alive.

mod control;
mod liveness;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{GridConfig, HeartbeatConfig};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{unix_timestamp, DataSource, Membership};

pub use control::{NodeControl, NodeState};
pub use liveness::{CriticalLoop, LivenessTracker, Stall};

/// What one heartbeat pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatResult {
    Beat(Membership),
    Draining,
    Failed,
}

/// Why the heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Cancelled,
    /// A critical loop stopped making progress; the node must shut down.
    Stalled(Stall),
}

pub struct HeartbeatCoordinator {
    node: String,
    source: Arc<dyn DataSource>,
    control: Arc<NodeControl>,
    liveness: Arc<LivenessTracker>,
    cfg: HeartbeatConfig,
    config_drain: bool,
    retry: RetryPolicy,
    membership: Option<Membership>,
    last_success: Option<i64>,
}

impl HeartbeatCoordinator {
    pub fn new(
        node: impl Into<String>,
        source: Arc<dyn DataSource>,
        control: Arc<NodeControl>,
        liveness: Arc<LivenessTracker>,
        cfg: &GridConfig,
    ) -> Self {
        Self {
            node: node.into(),
            source,
            control,
            liveness,
            cfg: cfg.heartbeat.clone(),
            config_drain: cfg.drain,
            retry: RetryPolicy::from(&cfg.retry),
            membership: None,
            last_success: None,
        }
    }

    /// Last membership learned from a successful beat.
    pub fn membership(&self) -> Option<Membership> {
        self.membership
    }

    /// Whether this node is lead at `now` given what it last learned.
    pub fn is_lead_at(&self, now: i64) -> bool {
        let grace = self.cfg.grace_secs as i64;
        !self.control.is_draining()
            && self.membership.is_some_and(|m| m.index == 0)
            && self.last_success.is_some_and(|t| now - t < grace)
    }

    /// One pass: poll drain, beat unless draining, re-evaluate leadership.
    pub async fn beat_once(&mut self, now: i64) -> BeatResult {
        let drain = self.config_drain || self.poll_drain().await;
        let was_draining = self.control.set_draining(drain);

        let result = if drain {
            if !was_draining {
                tracing::info!(node = %self.node, "entering drain mode");
            }
            self.control.set_state(NodeState::Draining);
            BeatResult::Draining
        } else {
            if was_draining {
                tracing::info!(node = %self.node, "leaving drain mode");
            }
            let (source, node, grace) = (&self.source, self.node.as_str(), self.cfg.grace_secs as i64);
            let beat = with_retry(&self.retry, "refresh_heartbeat", || {
                source.refresh_heartbeat(node, now, grace)
            })
            .await;
            match beat {
                Ok(Some(membership)) => {
                    if self.membership != Some(membership) {
                        tracing::debug!(
                            node = %self.node,
                            index = membership.index,
                            count = membership.count,
                            "membership changed"
                        );
                    }
                    self.membership = Some(membership);
                    self.last_success = Some(now);
                    self.control.set_state(NodeState::Active);
                    BeatResult::Beat(membership)
                }
                Ok(None) => {
                    tracing::warn!(node = %self.node, "heartbeat stored but node not listed as live");
                    BeatResult::Failed
                }
                Err(e) => {
                    tracing::warn!(node = %self.node, "heartbeat failed: {:#}", e);
                    BeatResult::Failed
                }
            }
        };

        let lead = self.is_lead_at(now);
        let was_lead = self.control.set_lead(lead);
        if lead != was_lead {
            if lead {
                tracing::info!(node = %self.node, "acquired leadership");
            } else {
                tracing::info!(node = %self.node, "relinquished leadership");
            }
        }
        result
    }

    async fn poll_drain(&self) -> bool {
        let (source, node) = (&self.source, self.node.as_str());
        match with_retry(&self.retry, "drain_requested", || source.drain_requested(node)).await {
            Ok(drain) => drain,
            Err(e) => {
                tracing::warn!(node = %self.node, "drain flag unreadable, keeping previous: {:#}", e);
                self.control.is_draining()
            }
        }
    }

    fn sleep_after(&self, result: BeatResult) -> Duration {
        match result {
            BeatResult::Beat(_) => self.cfg.interval(),
            BeatResult::Draining => self.cfg.drain_interval(),
            BeatResult::Failed => self.cfg.retry(),
        }
    }

    /// Beat until cancelled or until a critical loop stalls.
    pub async fn run(mut self, cancel: CancellationToken) -> HeartbeatOutcome {
        tracing::info!(node = %self.node, "heartbeat started");
        let outcome = loop {
            if cancel.is_cancelled() {
                break HeartbeatOutcome::Cancelled;
            }
            let now = unix_timestamp();
            if let Some(stall) = self.liveness.stalled(now) {
                tracing::error!(node = %self.node, "critical loop stalled: {}", stall);
                break HeartbeatOutcome::Stalled(stall);
            }
            let result = self.beat_once(now).await;
            let pause = self.sleep_after(result);
            tokio::select! {
                _ = cancel.cancelled() => break HeartbeatOutcome::Cancelled,
                _ = tokio::time::sleep(pause) => {}
            }
        };
        self.control.set_lead(false);
        self.control.set_state(NodeState::Stopped);
        tracing::info!(node = %self.node, ?outcome, "heartbeat stopped");
        outcome
    }
}

#[cfg(test)]
mod tests;
