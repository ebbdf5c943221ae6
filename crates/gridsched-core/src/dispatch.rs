//! Hand-off of admitted transfers to whatever runs them.

use anyhow::Result;
use async_trait::async_trait;

use crate::link::Link;
use crate::store::TransferRequest;

/// Transfers admitted on one link in one cycle, with the stream count the
/// optimizer currently wants for that link.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    pub link: Link,
    pub streams: u32,
    pub requests: Vec<TransferRequest>,
}

/// Launches admitted transfers. Completion is reported back to the store by
/// the launcher (see `SqliteStore::record_outcome`).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, plan: DispatchPlan) -> Result<()>;
}

/// Logs every plan and launches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, plan: DispatchPlan) -> Result<()> {
        tracing::info!(
            link = %plan.link,
            streams = plan.streams,
            transfers = plan.requests.len(),
            "dispatching transfers"
        );
        for r in &plan.requests {
            tracing::debug!(
                id = r.id,
                job = %r.job_id,
                vo = %r.vo,
                activity = %r.activity,
                source = %r.source_url,
                destination = %r.dest_url,
                "transfer admitted"
            );
        }
        Ok(())
    }
}
