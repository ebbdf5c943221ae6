//! One dispatcher node: heartbeat, scheduler, optimizer and reaper tasks
//! wired to a shared store.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::GridConfig;
use crate::dispatch::Dispatcher;
use crate::heartbeat::{HeartbeatCoordinator, HeartbeatOutcome, LivenessTracker, NodeControl, Stall};
use crate::optimizer::OptimizerDriver;
use crate::reaper::Reaper;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::store::{unix_timestamp, DataSource};
use crate::telemetry::TelemetrySink;

/// Why a node stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExit {
    /// Shutdown was requested; every loop finished.
    Cancelled,
    /// A critical loop stopped making progress.
    Stalled(Stall),
    /// The heartbeat task died.
    HeartbeatLost,
}

impl NodeExit {
    pub fn is_failure(self) -> bool {
        !matches!(self, NodeExit::Cancelled)
    }
}

pub struct Node {
    id: String,
    cfg: GridConfig,
    source: Arc<dyn DataSource>,
    dispatcher: Arc<dyn Dispatcher>,
    telemetry: Arc<dyn TelemetrySink>,
    control: Arc<NodeControl>,
}

impl Node {
    pub fn new(
        cfg: GridConfig,
        source: Arc<dyn DataSource>,
        dispatcher: Arc<dyn Dispatcher>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            id: cfg.node_id(),
            cfg,
            source,
            dispatcher,
            telemetry,
            control: Arc::new(NodeControl::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> Arc<NodeControl> {
        Arc::clone(&self.control)
    }

    /// Run until `cancel` fires or a critical loop stalls. On a stall the
    /// other loops get `heartbeat.shutdown_grace_secs` to stop before they
    /// are aborted.
    pub async fn run(self, cancel: CancellationToken) -> NodeExit {
        let cfg = &self.cfg;
        let retry = RetryPolicy::from(&cfg.retry);
        let liveness = Arc::new(LivenessTracker::new(&cfg.liveness, unix_timestamp()));
        tracing::info!(
            node = %self.id,
            algorithm = %cfg.scheduler.algorithm,
            drain = cfg.drain,
            "node starting"
        );

        let workers = cancel.child_token();
        let mut loops = JoinSet::new();
        loops.spawn(
            Scheduler::new(
                self.id.clone(),
                Arc::clone(&self.source),
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.control),
                Arc::clone(&liveness),
                cfg.scheduler.clone(),
                retry,
            )
            .run(workers.child_token()),
        );
        loops.spawn(
            OptimizerDriver::new(
                self.id.clone(),
                Arc::clone(&self.source),
                Arc::clone(&self.telemetry),
                Arc::clone(&self.control),
                Arc::clone(&liveness),
                cfg.optimizer.clone(),
                retry,
            )
            .run(workers.child_token()),
        );
        loops.spawn(
            Reaper::new(self.id.clone(), Arc::clone(&self.source), Arc::clone(&liveness), cfg)
                .run(workers.child_token()),
        );

        let heartbeat = HeartbeatCoordinator::new(
            self.id.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.control),
            liveness,
            cfg,
        );
        let exit = match tokio::spawn(heartbeat.run(cancel.child_token())).await {
            Ok(HeartbeatOutcome::Cancelled) => NodeExit::Cancelled,
            Ok(HeartbeatOutcome::Stalled(stall)) => NodeExit::Stalled(stall),
            Err(e) => {
                tracing::error!(node = %self.id, "heartbeat task failed: {}", e);
                NodeExit::HeartbeatLost
            }
        };

        workers.cancel();
        if exit.is_failure() {
            let grace = cfg.heartbeat.shutdown_grace();
            tracing::warn!(node = %self.id, ?grace, "ordered shutdown");
            let drained = tokio::time::timeout(grace, join_all(&mut loops)).await;
            if drained.is_err() {
                tracing::error!(
                    node = %self.id,
                    remaining = loops.len(),
                    "loops did not stop within the shutdown grace; aborting"
                );
                loops.abort_all();
            }
        } else {
            join_all(&mut loops).await;
        }
        tracing::info!(node = %self.id, ?exit, "node stopped");
        exit
    }
}

async fn join_all(loops: &mut JoinSet<()>) {
    while let Some(res) = loops.join_next().await {
        if let Err(e) = res {
            tracing::warn!("node loop ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatch::LogDispatcher;
    use crate::heartbeat::NodeState;
    use crate::store::{open_memory, NewTransfer};
    use crate::telemetry::NullSink;

    #[tokio::test]
    async fn lead_node_admits_and_stops_on_cancel() {
        let store = open_memory().await.unwrap();
        for i in 0..2 {
            store
                .submit(&NewTransfer {
                    job_id: "job-1".to_string(),
                    vo: "atlas".to_string(),
                    activity: "default".to_string(),
                    source_url: format!("gsiftp://a.example.org/f{i}"),
                    dest_url: format!("gsiftp://b.example.org/f{i}"),
                    file_size: 10,
                    priority: 3,
                })
                .await
                .unwrap();
        }
        let mut cfg = GridConfig::default();
        cfg.node_id = Some("node-a".to_string());
        cfg.scheduler.interval_secs = 1;

        let node = Node::new(
            cfg,
            Arc::new(store.clone()),
            Arc::new(LogDispatcher),
            Arc::new(NullSink),
        );
        assert_eq!(node.id(), "node-a");
        let control = node.control();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(node.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(control.is_lead());
        cancel.cancel();
        assert_eq!(task.await.unwrap(), NodeExit::Cancelled);

        assert_eq!(store.active_count("node-a").await.unwrap(), 2);
        assert!(!control.is_lead());
        assert_eq!(control.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn draining_node_never_leads() {
        let store = open_memory().await.unwrap();
        let mut cfg = GridConfig::default();
        cfg.node_id = Some("node-a".to_string());
        cfg.drain = true;

        let node = Node::new(
            cfg,
            Arc::new(store.clone()),
            Arc::new(LogDispatcher),
            Arc::new(NullSink),
        );
        let control = node.control();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(node.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(control.is_draining());
        assert!(!control.is_lead());
        cancel.cancel();
        assert_eq!(task.await.unwrap(), NodeExit::Cancelled);
        assert!(store.heartbeats().await.unwrap().is_empty());
    }
}
