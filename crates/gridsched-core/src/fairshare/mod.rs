//! Two-level (organization → activity) fair-share admission.
//!
//! Each link's queued requests are grouped into queues keyed by
//! (link, organization, activity). Share weights decide how a link's slot
//! budget is split; the split itself is delegated to a [`FairShare`]
//! strategy chosen by [`SchedulingAlgorithm`].

mod deficit;
mod random;
mod shares;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::link::Link;
use crate::store::TransferRequest;

pub use deficit::Deficit;
pub use random::WeightedRandom;
pub use shares::{ShareTable, DEFAULT_ACTIVITY, PUBLIC_SHARE};

/// Failure reason recorded for requests whose organization has no share on the link.
pub const NO_SHARE_REASON: &str = "No share configured for this VO";

/// Identity of one fair-share queue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub link: Link,
    pub vo: String,
    pub activity: String,
}

/// Requests waiting in one queue plus the number already running from it.
#[derive(Debug, Clone)]
pub struct Queue {
    pub key: QueueKey,
    pub pending: VecDeque<TransferRequest>,
    pub active: u64,
}

impl Queue {
    pub fn new(key: QueueKey) -> Self {
        Self {
            key,
            pending: VecDeque::new(),
            active: 0,
        }
    }

    /// Work this queue could use: running plus waiting.
    pub fn demand(&self) -> u64 {
        self.active + self.pending.len() as u64
    }
}

/// A queue annotated with its resolved organization and activity weights.
#[derive(Debug, Clone)]
pub struct WeightedQueue {
    pub queue: Queue,
    pub vo_weight: f64,
    pub activity_weight: f64,
}

/// Everything the scheduler needs to know about one link this cycle.
#[derive(Debug, Clone)]
pub struct LinkWorkload {
    pub link: Link,
    pub queues: Vec<Queue>,
    pub shares: ShareTable,
}

impl LinkWorkload {
    pub fn active(&self) -> u64 {
        self.queues.iter().map(|q| q.active).sum()
    }
}

/// Slots for one link in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkBudget {
    /// Slots assigned to the link by the capacity allocator.
    pub allocated: usize,
    /// Slots that may be filled now (allocated minus running, further capped
    /// by the node-wide process budget).
    pub available: usize,
}

/// Outcome of scheduling one link.
#[derive(Debug, Clone)]
pub struct LinkAdmission {
    pub link: Link,
    pub admitted: Vec<TransferRequest>,
    /// Requests whose organization has no share on this link; callers fail
    /// them with [`NO_SHARE_REASON`].
    pub unschedulable: Vec<TransferRequest>,
}

/// Strategy contract shared by the admission algorithms.
///
/// Implementations pop admitted requests from the front of the queues' pending
/// lists and must never return more than `budget.available` requests.
pub trait FairShare: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, queues: &mut [WeightedQueue], budget: LinkBudget) -> Vec<TransferRequest>;
}

/// Configured admission algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingAlgorithm {
    WeightedRandom,
    #[default]
    Deficit,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown scheduling algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for SchedulingAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted-random" | "random" => Ok(Self::WeightedRandom),
            "deficit" => Ok(Self::Deficit),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for SchedulingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WeightedRandom => "weighted-random",
            Self::Deficit => "deficit",
        })
    }
}

impl SchedulingAlgorithm {
    /// Build the strategy. `cap_by_demand` only affects the deficit variant.
    pub fn build(self, cap_by_demand: bool) -> Box<dyn FairShare> {
        match self {
            Self::WeightedRandom => Box::new(WeightedRandom::new()),
            Self::Deficit => Box::new(Deficit::new(cap_by_demand)),
        }
    }
}

/// Applies share resolution and a [`FairShare`] strategy link by link.
pub struct FairShareScheduler {
    strategy: Box<dyn FairShare>,
}

impl FairShareScheduler {
    pub fn new(strategy: Box<dyn FairShare>) -> Self {
        Self { strategy }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Schedule every workload against its budget. Links missing from
    /// `budgets` get no slots (their unschedulable requests are still reported).
    pub fn schedule(
        &self,
        workloads: Vec<LinkWorkload>,
        budgets: &BTreeMap<Link, LinkBudget>,
    ) -> Vec<LinkAdmission> {
        let mut workloads = workloads;
        workloads.sort_by(|a, b| a.link.cmp(&b.link));
        workloads
            .into_iter()
            .map(|w| {
                let budget = budgets.get(&w.link).copied().unwrap_or_default();
                self.schedule_link(w, budget)
            })
            .collect()
    }

    /// Schedule a single link.
    pub fn schedule_link(&self, workload: LinkWorkload, budget: LinkBudget) -> LinkAdmission {
        let LinkWorkload {
            link,
            mut queues,
            shares,
        } = workload;
        queues.sort_by(|a, b| a.key.cmp(&b.key));

        let mut unschedulable = Vec::new();
        let mut weighted = Vec::with_capacity(queues.len());
        for queue in queues {
            match shares.vo_weight(&queue.key.vo) {
                Some(vo_weight) => {
                    let activity_weight = shares.activity_weight(&queue.key.vo, &queue.key.activity);
                    weighted.push(WeightedQueue {
                        queue,
                        vo_weight,
                        activity_weight,
                    });
                }
                None => {
                    if !queue.pending.is_empty() {
                        tracing::warn!(
                            link = %link,
                            vo = %queue.key.vo,
                            activity = %queue.key.activity,
                            requests = queue.pending.len(),
                            "queue has no share configured; failing its requests"
                        );
                    }
                    unschedulable.extend(queue.pending);
                }
            }
        }

        let admitted = if budget.available == 0 {
            Vec::new()
        } else {
            self.strategy.select(&mut weighted, budget)
        };
        debug_assert!(admitted.len() <= budget.available);

        tracing::debug!(
            link = %link,
            algorithm = self.strategy.name(),
            allocated = budget.allocated,
            available = budget.available,
            admitted = admitted.len(),
            unschedulable = unschedulable.len(),
            "link scheduled"
        );
        LinkAdmission {
            link,
            admitted,
            unschedulable,
        }
    }
}
