//! Scheduler task: one cycle per interval while this node may schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::allocator::CapacityAllocator;
use crate::config::SchedulerConfig;
use crate::dispatch::Dispatcher;
use crate::fairshare::FairShareScheduler;
use crate::heartbeat::{CriticalLoop, LivenessTracker, NodeControl};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{unix_timestamp, DataSource};

use super::budget::ProcessSlotBudget;

pub struct Scheduler {
    pub(super) node: String,
    pub(super) source: Arc<dyn DataSource>,
    pub(super) dispatcher: Arc<dyn Dispatcher>,
    pub(super) control: Arc<NodeControl>,
    pub(super) liveness: Arc<LivenessTracker>,
    pub(super) cfg: SchedulerConfig,
    pub(super) retry: RetryPolicy,
    pub(super) allocator: CapacityAllocator,
    pub(super) fairshare: FairShareScheduler,
    pub(super) budget: ProcessSlotBudget,
}

impl Scheduler {
    pub fn new(
        node: impl Into<String>,
        source: Arc<dyn DataSource>,
        dispatcher: Arc<dyn Dispatcher>,
        control: Arc<NodeControl>,
        liveness: Arc<LivenessTracker>,
        cfg: SchedulerConfig,
        retry: RetryPolicy,
    ) -> Self {
        let allocator = CapacityAllocator::new(cfg.default_endpoint_limit);
        let fairshare = FairShareScheduler::new(cfg.algorithm.build(cfg.cap_by_demand));
        let budget = ProcessSlotBudget::new(cfg.max_url_copy_processes);
        Self {
            node: node.into(),
            source,
            dispatcher,
            control,
            liveness,
            cfg,
            retry,
            allocator,
            fairshare,
            budget,
        }
    }

    /// Replace the admission strategy (tests use a seeded one).
    pub fn with_fairshare(mut self, fairshare: FairShareScheduler) -> Self {
        self.fairshare = fairshare;
        self
    }

    pub fn budget(&self) -> &ProcessSlotBudget {
        &self.budget
    }

    /// Run cycles until cancelled. Non-lead and draining nodes skip the cycle
    /// but still report the pass.
    pub async fn run(self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.cfg.interval_secs);
        tracing::info!(
            node = %self.node,
            algorithm = self.fairshare.algorithm_name(),
            max_processes = self.budget.max_total(),
            "scheduler started"
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let now = unix_timestamp();
            if self.control.may_schedule() {
                if let Err(e) = self.run_cycle(&cancel).await {
                    tracing::warn!("scheduling cycle skipped: {:#}", e);
                }
            }
            self.liveness.record(CriticalLoop::Scheduler, now);
            let (source, node) = (&self.source, self.node.as_str());
            if let Err(e) = with_retry(&self.retry, "record_pass", || {
                source.record_pass(node, CriticalLoop::Scheduler, now)
            })
            .await
            {
                tracing::warn!("could not record scheduler pass: {:#}", e);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!(node = %self.node, "scheduler stopped");
    }
}
