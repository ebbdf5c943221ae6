//! One scheduling cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::dispatch::DispatchPlan;
use crate::fairshare::{LinkBudget, LinkWorkload, Queue, QueueKey, ShareTable, NO_SHARE_REASON};
use crate::link::{Endpoint, Link};
use crate::retry::with_retry;
use crate::store::{QueueActivity, TransferRequest};

use super::service::Scheduler;

/// Summary of one cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    /// Links with queued work.
    pub links: usize,
    /// Links left out because their configured maximum is not positive.
    pub skipped_links: usize,
    pub admitted: usize,
    /// Requests failed because their organization has no share.
    pub unschedulable: u64,
    /// Links whose scheduling failed; the others still ran.
    pub link_errors: usize,
    pub elapsed: Duration,
}

/// Group active counts and queued requests into per-link fair-share queues.
///
/// Queues with running transfers but nothing pending are kept so their
/// running count is charged against the organization's share. Requests keep
/// the order they were fetched in.
pub fn build_workloads(
    links: &[Link],
    activity: Vec<QueueActivity>,
    requests: Vec<TransferRequest>,
    mut shares: HashMap<Link, ShareTable>,
) -> Vec<LinkWorkload> {
    let mut queues: BTreeMap<Link, BTreeMap<QueueKey, Queue>> =
        links.iter().map(|l| (l.clone(), BTreeMap::new())).collect();

    for a in activity {
        let Some(by_key) = queues.get_mut(&a.link) else {
            continue;
        };
        let key = QueueKey {
            link: a.link,
            vo: a.vo,
            activity: a.activity,
        };
        by_key.entry(key.clone()).or_insert_with(|| Queue::new(key)).active = a.active;
    }
    for r in requests {
        let Some(by_key) = queues.get_mut(&r.link) else {
            continue;
        };
        let key = QueueKey {
            link: r.link.clone(),
            vo: r.vo.clone(),
            activity: r.activity.clone(),
        };
        by_key
            .entry(key.clone())
            .or_insert_with(|| Queue::new(key))
            .pending
            .push_back(r);
    }

    queues
        .into_iter()
        .map(|(link, by_key)| LinkWorkload {
            shares: shares.remove(&link).unwrap_or_default(),
            queues: by_key.into_values().collect(),
            link,
        })
        .collect()
}

/// What scheduling one link did.
#[derive(Debug, Default)]
struct LinkOutcome {
    admitted: usize,
    unschedulable: u64,
}

impl Scheduler {
    /// Run one cycle. Storage failures before the per-link phase abort the
    /// cycle; a failure on one link is logged and the next link proceeds.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let (source, retry, node) = (&self.source, &self.retry, self.node.as_str());

        let links = with_retry(retry, "queued_links", || source.queued_links()).await?;
        report.links = links.len();
        if links.is_empty() {
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        let configs = with_retry(retry, "link_configs", || source.link_configs()).await?;
        let limits = with_retry(retry, "endpoint_limits", || source.endpoint_limits()).await?;

        let mut capacities = BTreeMap::new();
        for link in &links {
            let max = configs
                .get(link)
                .copied()
                .unwrap_or(self.cfg.default_link_max_active);
            if max <= 0 {
                tracing::warn!(link = %link, max, "link maximum is not positive; link skipped");
                report.skipped_links += 1;
                continue;
            }
            capacities.insert(link.clone(), max);
        }
        let links: Vec<Link> = capacities.keys().cloned().collect();
        if links.is_empty() {
            report.elapsed = started.elapsed();
            return Ok(report);
        }
        let endpoints: BTreeSet<Endpoint> = links
            .iter()
            .flat_map(|l| [l.source.clone(), l.destination.clone()])
            .collect();
        let allocation = self
            .allocator
            .allocate(&endpoints, &capacities, &limits)
            .context("capacity allocation")?;
        tracing::debug!(
            links = links.len(),
            total = allocation.total,
            "capacity allocated"
        );

        let running = with_retry(retry, "active_count", || source.active_count(node)).await?;
        self.budget.sync(running);

        let per_link = self.cfg.max_url_copy_processes.max(1);
        let activity = with_retry(retry, "queue_activity", || source.queue_activity(&links)).await?;
        let requests = with_retry(retry, "queued_requests", || {
            source.queued_requests(&links, per_link)
        })
        .await?;
        let activity_weights =
            with_retry(retry, "activity_weights", || source.activity_weights()).await?;
        let mut shares = HashMap::with_capacity(links.len());
        for link in &links {
            let vo_weights = with_retry(retry, "share_weights", || source.share_weights(link)).await?;
            shares.insert(
                link.clone(),
                ShareTable {
                    vo_weights,
                    activity_weights: activity_weights.clone(),
                },
            );
        }
        let streams = with_retry(retry, "stream_counts", || source.stream_counts()).await?;

        for workload in build_workloads(&links, activity, requests, shares) {
            if cancel.is_cancelled() {
                tracing::debug!("cycle cancelled; remaining links not scheduled");
                break;
            }
            let link = workload.link.clone();
            let allocated = usize::try_from(allocation.slots_for(&link)).unwrap_or(0);
            let link_streams = streams.get(&link).copied().unwrap_or(1);
            match self.schedule_link(workload, allocated, link_streams).await {
                Ok(outcome) => {
                    report.admitted += outcome.admitted;
                    report.unschedulable += outcome.unschedulable;
                }
                Err(e) => {
                    report.link_errors += 1;
                    tracing::warn!(link = %link, "scheduling failed for link: {:#}", e);
                }
            }
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            links = report.links,
            admitted = report.admitted,
            unschedulable = report.unschedulable,
            link_errors = report.link_errors,
            free_processes = self.budget.available(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "scheduling cycle finished"
        );
        Ok(report)
    }

    async fn schedule_link(
        &self,
        workload: LinkWorkload,
        allocated: usize,
        streams: u32,
    ) -> Result<LinkOutcome> {
        let (source, retry, node) = (&self.source, &self.retry, self.node.as_str());
        let mut outcome = LinkOutcome::default();
        let link = workload.link.clone();

        let running = usize::try_from(workload.active()).unwrap_or(usize::MAX);
        let mut reservation = self.budget.reservation(allocated.saturating_sub(running));
        let budget = LinkBudget {
            allocated,
            available: reservation.slots(),
        };
        let admission = self.fairshare.schedule_link(workload, budget);

        if !admission.unschedulable.is_empty() {
            let ids: Vec<_> = admission.unschedulable.iter().map(|r| r.id).collect();
            outcome.unschedulable = with_retry(retry, "fail_requests", || {
                source.fail_requests(&ids, NO_SHARE_REASON)
            })
            .await?;
        }
        if admission.admitted.is_empty() {
            return Ok(outcome);
        }

        let ids: Vec<_> = admission.admitted.iter().map(|r| r.id).collect();
        let admitted: HashSet<_> = with_retry(retry, "admit", || source.admit(&ids, node))
            .await?
            .into_iter()
            .collect();
        reservation.commit(admitted.len());
        drop(reservation);
        if admitted.len() < ids.len() {
            tracing::debug!(
                link = %link,
                lost = ids.len() - admitted.len(),
                "requests already admitted elsewhere"
            );
        }
        let requests: Vec<_> = admission
            .admitted
            .into_iter()
            .filter(|r| admitted.contains(&r.id))
            .collect();
        outcome.admitted = requests.len();
        if requests.is_empty() {
            return Ok(outcome);
        }

        self.dispatcher
            .dispatch(DispatchPlan {
                link,
                streams,
                requests,
            })
            .await
            .context("dispatch admitted transfers")?;
        Ok(outcome)
    }
}
