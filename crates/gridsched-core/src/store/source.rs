use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;

use crate::allocator::EndpointLimit;
use crate::heartbeat::CriticalLoop;
use crate::link::{Endpoint, Link};
use crate::optimizer::{OptimizerDecision, PairState};

use super::db::SqliteStore;
use super::types::{Membership, QueueActivity, TransferId, TransferRequest};
use super::DataSource;

#[async_trait]
impl DataSource for SqliteStore {
    async fn queued_links(&self) -> Result<Vec<Link>> {
        self.load_queued_links().await
    }

    async fn queued_requests(
        &self,
        links: &[Link],
        per_link: usize,
    ) -> Result<Vec<TransferRequest>> {
        self.load_queued_requests(links, per_link).await
    }

    async fn link_configs(&self) -> Result<BTreeMap<Link, i64>> {
        self.load_link_configs().await
    }

    async fn endpoint_limits(&self) -> Result<HashMap<Endpoint, EndpointLimit>> {
        self.load_endpoint_limits().await
    }

    async fn share_weights(&self, link: &Link) -> Result<HashMap<String, f64>> {
        self.load_share_weights(link).await
    }

    async fn activity_weights(&self) -> Result<HashMap<String, HashMap<String, f64>>> {
        self.load_activity_weights().await
    }

    async fn queue_activity(&self, links: &[Link]) -> Result<Vec<QueueActivity>> {
        self.load_queue_activity(links).await
    }

    async fn admit(&self, ids: &[TransferId], node: &str) -> Result<Vec<TransferId>> {
        self.admit_transfers(ids, node).await
    }

    async fn active_count(&self, node: &str) -> Result<u64> {
        self.count_active(node).await
    }

    async fn fail_requests(&self, ids: &[TransferId], reason: &str) -> Result<u64> {
        self.fail_transfers(ids, reason).await
    }

    async fn active_pairs(&self, since: i64) -> Result<Vec<Link>> {
        self.load_active_pairs(since).await
    }

    async fn pair_state(&self, link: &Link, now: i64, window: i64) -> Result<PairState> {
        self.load_pair_state(link, now, window).await
    }

    async fn store_decision(&self, decision: &OptimizerDecision) -> Result<()> {
        self.save_decision(decision).await
    }

    async fn stream_counts(&self) -> Result<HashMap<Link, u32>> {
        self.load_stream_counts().await
    }

    async fn refresh_heartbeat(
        &self,
        node: &str,
        now: i64,
        grace: i64,
    ) -> Result<Option<Membership>> {
        self.beat(node, now, grace).await
    }

    async fn drain_requested(&self, node: &str) -> Result<bool> {
        self.load_drain(node).await
    }

    async fn set_drain(&self, node: &str, drain: bool) -> Result<()> {
        self.set_drain_flag(node, drain).await
    }

    async fn record_pass(&self, node: &str, which: CriticalLoop, now: i64) -> Result<()> {
        self.save_pass(node, which, now).await
    }

    async fn last_pass_timestamps(&self, node: &str) -> Result<HashMap<CriticalLoop, i64>> {
        self.load_passes(node).await
    }

    async fn requeue_orphans(&self, now: i64, grace: i64) -> Result<u64> {
        self.requeue_orphaned(now, grace).await
    }
}
