//! Stall detection for transfers: requeues work owned by nodes that stopped
//! beating. Runs on every node; the requeue is idempotent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::GridConfig;
use crate::heartbeat::{CriticalLoop, LivenessTracker};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{unix_timestamp, DataSource};

pub struct Reaper {
    node: String,
    source: Arc<dyn DataSource>,
    liveness: Arc<LivenessTracker>,
    interval: Duration,
    grace_secs: i64,
    retry: RetryPolicy,
}

impl Reaper {
    pub fn new(
        node: impl Into<String>,
        source: Arc<dyn DataSource>,
        liveness: Arc<LivenessTracker>,
        cfg: &GridConfig,
    ) -> Self {
        Self {
            node: node.into(),
            source,
            liveness,
            interval: Duration::from_secs(cfg.reaper.interval_secs),
            grace_secs: cfg.heartbeat.grace_secs as i64,
            retry: RetryPolicy::from(&cfg.retry),
        }
    }

    /// Requeue orphaned transfers once. Returns how many were requeued.
    pub async fn sweep_once(&self, now: i64) -> Result<u64> {
        let (source, grace) = (&self.source, self.grace_secs);
        let requeued =
            with_retry(&self.retry, "requeue_orphans", || source.requeue_orphans(now, grace)).await?;
        if requeued > 0 {
            tracing::warn!(node = %self.node, requeued, "requeued transfers of dead nodes");
        }
        Ok(requeued)
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(node = %self.node, "reaper started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let now = unix_timestamp();
            if let Err(e) = self.sweep_once(now).await {
                tracing::warn!("reaper pass skipped: {:#}", e);
            }
            self.liveness.record(CriticalLoop::Reaper, now);
            let (source, node) = (&self.source, self.node.as_str());
            if let Err(e) = with_retry(&self.retry, "record_pass", || {
                source.record_pass(node, CriticalLoop::Reaper, now)
            })
            .await
            {
                tracing::warn!("could not record reaper pass: {:#}", e);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!(node = %self.node, "reaper stopped");
    }
}
