//! Shared state of the grid: transfers, shares, limits, optimizer state and
//! node heartbeats.
//!
//! Nodes coordinate only through this store. The engine talks to it through
//! the [`DataSource`] trait; [`SqliteStore`] is the bundled implementation.

mod db;
mod heartbeat;
mod optimizer;
mod shares;
mod source;
mod transfers;
pub mod types;

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;

use crate::allocator::EndpointLimit;
use crate::heartbeat::CriticalLoop;
use crate::link::{Endpoint, Link};
use crate::optimizer::{OptimizerDecision, PairState};

pub use db::{default_db_path, unix_timestamp, SqliteStore};
#[cfg(test)]
pub(crate) use db::open_memory;
pub use types::*;

/// Everything the engine reads from and writes to shared storage.
///
/// All timestamps are Unix seconds. Implementations must make [`admit`]
/// at-most-once per request across nodes.
///
/// [`admit`]: DataSource::admit
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Links with at least one submitted transfer.
    async fn queued_links(&self) -> Result<Vec<Link>>;

    /// Submitted transfers on `links`, highest priority then oldest first,
    /// at most `per_link` per link.
    async fn queued_requests(&self, links: &[Link], per_link: usize)
        -> Result<Vec<TransferRequest>>;

    /// Configured maximum of concurrent transfers per link.
    async fn link_configs(&self) -> Result<BTreeMap<Link, i64>>;

    async fn endpoint_limits(&self) -> Result<HashMap<Endpoint, EndpointLimit>>;

    /// Organization weights configured for `link` (empty when unconfigured).
    async fn share_weights(&self, link: &Link) -> Result<HashMap<String, f64>>;

    /// Activity weights keyed by organization then activity.
    async fn activity_weights(&self) -> Result<HashMap<String, HashMap<String, f64>>>;

    /// Active and submitted counts per queue on `links`.
    async fn queue_activity(&self, links: &[Link]) -> Result<Vec<QueueActivity>>;

    /// Move `ids` from submitted to active on `node`. Returns the ids this call
    /// actually admitted; ids already taken elsewhere are left out.
    async fn admit(&self, ids: &[TransferId], node: &str) -> Result<Vec<TransferId>>;

    /// Transfers currently active on `node`.
    async fn active_count(&self, node: &str) -> Result<u64>;

    /// Fail submitted transfers with `reason`. Returns the number failed.
    async fn fail_requests(&self, ids: &[TransferId], reason: &str) -> Result<u64>;

    /// Links with active or submitted transfers, or completions since `since`.
    async fn active_pairs(&self, since: i64) -> Result<Vec<Link>>;

    /// Observation of `link` over the window `[now - window, now]`.
    async fn pair_state(&self, link: &Link, now: i64, window: i64) -> Result<PairState>;

    /// Persist the new stream count and EMA of a decision.
    async fn store_decision(&self, decision: &OptimizerDecision) -> Result<()>;

    /// Current stream count per link (links without optimizer state are absent).
    async fn stream_counts(&self) -> Result<HashMap<Link, u32>>;

    /// Record a beat for `node` and return its position among the nodes that
    /// beat within `grace` seconds and are not draining, ordered by node id.
    async fn refresh_heartbeat(&self, node: &str, now: i64, grace: i64)
        -> Result<Option<Membership>>;

    async fn drain_requested(&self, node: &str) -> Result<bool>;

    async fn set_drain(&self, node: &str, drain: bool) -> Result<()>;

    async fn record_pass(&self, node: &str, which: CriticalLoop, now: i64) -> Result<()>;

    async fn last_pass_timestamps(&self, node: &str) -> Result<HashMap<CriticalLoop, i64>>;

    /// Return active transfers owned by nodes whose last beat is older than
    /// `now - grace` to the queue. Returns the number requeued.
    async fn requeue_orphans(&self, now: i64, grace: i64) -> Result<u64>;
}
