//! `gridsched run`: host this node's loops until Ctrl-C or a stall.

use anyhow::{bail, Result};
use gridsched_core::config::GridConfig;
use gridsched_core::dispatch::LogDispatcher;
use gridsched_core::node::{Node, NodeExit};
use gridsched_core::store::SqliteStore;
use gridsched_core::telemetry::{JsonLinesSink, NullSink, TelemetrySink};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn telemetry_sink(cfg: &GridConfig) -> Result<Arc<dyn TelemetrySink>> {
    if !cfg.telemetry.enabled {
        return Ok(Arc::new(NullSink));
    }
    let sink = JsonLinesSink::open(cfg.telemetry_path()?)?;
    tracing::info!(path = %sink.path().display(), "publishing optimizer decisions");
    Ok(Arc::new(sink))
}

/// Cancel `cancel` once `signal` fires. A signal that cannot be listened for
/// leaves the node running; it can still stop on a stall.
pub(crate) async fn cancel_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("interrupt received, shutting down");
            cancel.cancel();
        }
        Err(e) => tracing::warn!("cannot listen for Ctrl-C: {}", e),
    }
}

pub async fn run_node(store: SqliteStore, cfg: GridConfig) -> Result<()> {
    let telemetry = telemetry_sink(&cfg)?;
    let node = Node::new(cfg, Arc::new(store), Arc::new(LogDispatcher), telemetry);
    println!("node {} running (Ctrl-C to stop)", node.id());

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), cancel.clone()));

    match node.run(cancel).await {
        NodeExit::Cancelled => Ok(()),
        NodeExit::Stalled(stall) => bail!("shut down: {stall}"),
        NodeExit::HeartbeatLost => bail!("shut down: heartbeat task failed"),
    }
}
