//! Periodic optimizer pass over every active link on a bounded worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::OptimizerConfig;
use crate::heartbeat::{CriticalLoop, LivenessTracker, NodeControl};
use crate::link::Link;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{unix_timestamp, DataSource};
use crate::telemetry::TelemetrySink;

use super::decide::decide;
use super::state::OptimizerDecision;

/// Summary of one optimizer pass.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Links fetched from the data source.
    pub links: usize,
    /// Decisions produced, in link order.
    pub decisions: Vec<OptimizerDecision>,
    /// Links skipped because they had no active transfers.
    pub idle: usize,
    /// Links whose evaluation failed.
    pub failed: usize,
    /// Links never started because the pass was cancelled.
    pub not_started: usize,
    pub elapsed: Duration,
}

pub struct OptimizerDriver {
    node: String,
    source: Arc<dyn DataSource>,
    telemetry: Arc<dyn TelemetrySink>,
    control: Arc<NodeControl>,
    liveness: Arc<LivenessTracker>,
    cfg: OptimizerConfig,
    retry: RetryPolicy,
}

/// Evaluate one link: read state, decide, persist. `None` when the link is idle.
async fn optimize_link(
    source: Arc<dyn DataSource>,
    cfg: OptimizerConfig,
    retry: RetryPolicy,
    link: Link,
    now: i64,
) -> Result<Option<OptimizerDecision>> {
    let window = cfg.window_secs as i64;
    let state = with_retry(&retry, "pair_state", || source.pair_state(&link, now, window)).await?;
    if state.is_idle() {
        return Ok(None);
    }
    let decision = decide(&link, &state, &cfg);
    with_retry(&retry, "store_decision", || source.store_decision(&decision)).await?;
    Ok(Some(decision))
}

impl OptimizerDriver {
    pub fn new(
        node: impl Into<String>,
        source: Arc<dyn DataSource>,
        telemetry: Arc<dyn TelemetrySink>,
        control: Arc<NodeControl>,
        liveness: Arc<LivenessTracker>,
        cfg: OptimizerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            node: node.into(),
            source,
            telemetry,
            control,
            liveness,
            cfg,
            retry,
        }
    }

    /// Optimize every active link once. Links run concurrently, at most
    /// `pool_size` at a time, and are started in link order. A failing link
    /// is logged and does not affect the others. On cancellation no further
    /// links are started; links already running are awaited.
    pub async fn run_pass(&self, now: i64, cancel: &CancellationToken) -> Result<PassReport> {
        let started = Instant::now();
        let since = now - self.cfg.window_secs as i64;
        let source = &self.source;
        let mut links = with_retry(&self.retry, "active_pairs", || source.active_pairs(since)).await?;
        links.sort();
        links.dedup();

        let mut report = PassReport {
            links: links.len(),
            ..PassReport::default()
        };
        let pool_size = self.cfg.pool_size.max(1);
        let completed = Arc::new(AtomicUsize::new(0));
        let mut pending = links.into_iter();
        let mut join_set = tokio::task::JoinSet::new();

        loop {
            while join_set.len() < pool_size && !cancel.is_cancelled() {
                let Some(link) = pending.next() else {
                    break;
                };
                let source = Arc::clone(&self.source);
                let cfg = self.cfg.clone();
                let retry = self.retry;
                let completed = Arc::clone(&completed);
                join_set.spawn(async move {
                    let out = optimize_link(source, cfg, retry, link.clone(), now).await;
                    completed.fetch_add(1, Ordering::Relaxed);
                    (link, out)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((_, Ok(Some(decision)))) => report.decisions.push(decision),
                Ok((_, Ok(None))) => report.idle += 1,
                Ok((link, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(link = %link, "optimizer failed for link: {:#}", e);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("optimizer worker panicked or was aborted: {}", e);
                }
            }
        }
        report.not_started = pending.count();

        report.decisions.sort_by(|a, b| a.link.cmp(&b.link));
        for decision in &report.decisions {
            tracing::debug!(
                link = %decision.link,
                streams = decision.streams,
                previous = decision.previous_streams,
                reason = ?decision.reason,
                "{}",
                decision.rationale
            );
            self.telemetry.publish(decision);
        }
        report.elapsed = started.elapsed();
        tracing::info!(
            links = report.links,
            processed = completed.load(Ordering::Relaxed),
            decisions = report.decisions.len(),
            idle = report.idle,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "optimizer pass finished"
        );
        Ok(report)
    }

    /// Run passes every `interval_secs` while this node leads, until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.cfg.interval_secs);
        tracing::info!(node = %self.node, "optimizer started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let now = unix_timestamp();
            if self.control.may_schedule() {
                if let Err(e) = self.run_pass(now, &cancel).await {
                    tracing::warn!("optimizer pass skipped: {:#}", e);
                }
            }
            self.liveness.record(CriticalLoop::Optimizer, now);
            let (source, node) = (&self.source, self.node.as_str());
            if let Err(e) = with_retry(&self.retry, "record_pass", || {
                source.record_pass(node, CriticalLoop::Optimizer, now)
            })
            .await
            {
                tracing::warn!("could not record optimizer pass: {:#}", e);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!(node = %self.node, "optimizer stopped");
    }
}
