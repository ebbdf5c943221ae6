//! Deficit admission (two-level weighted fair queueing).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use crate::store::TransferRequest;

use super::shares::{apportion, Claim};
use super::{FairShare, LinkBudget, WeightedQueue};

/// Computes should-be-allocated slots per queue (organization share of the
/// link's allocation, then activity share of the organization's slots),
/// derives each queue's deficit against its running transfers and admits from
/// the largest deficit first.
///
/// Deficits are rebuilt every cycle; nothing carries over.
#[derive(Debug, Clone)]
pub struct Deficit {
    cap_by_demand: bool,
}

impl Deficit {
    pub fn new(cap_by_demand: bool) -> Self {
        Self { cap_by_demand }
    }

    /// Should-be-allocated slots per queue index.
    pub(crate) fn should_be_allocated(
        &self,
        queues: &[WeightedQueue],
        allocated: usize,
    ) -> Vec<usize> {
        let mut orgs: BTreeMap<&str, Claim<String>> = BTreeMap::new();
        for q in queues {
            let vo = q.queue.key.vo.as_str();
            let claim = orgs.entry(vo).or_insert_with(|| Claim {
                key: vo.to_string(),
                weight: q.vo_weight,
                demand: 0,
            });
            claim.demand += q.queue.demand();
        }
        let claims: Vec<Claim<String>> = orgs.into_values().collect();
        let org_slots = apportion(allocated, &claims, self.cap_by_demand);

        let mut should = vec![0usize; queues.len()];
        for (vo, slots) in org_slots {
            if slots == 0 {
                continue;
            }
            let members: Vec<usize> = queues
                .iter()
                .enumerate()
                .filter(|(_, q)| q.queue.key.vo == vo)
                .map(|(i, _)| i)
                .collect();
            let all_zero = members.iter().all(|&i| queues[i].activity_weight <= 0.0);
            let claims: Vec<Claim<usize>> = members
                .iter()
                .map(|&i| Claim {
                    key: i,
                    weight: if all_zero { 1.0 } else { queues[i].activity_weight },
                    demand: queues[i].queue.demand(),
                })
                .collect();
            for (i, n) in apportion(slots, &claims, self.cap_by_demand) {
                should[i] = n;
            }
        }
        should
    }
}

impl FairShare for Deficit {
    fn name(&self) -> &'static str {
        "deficit"
    }

    fn select(&self, queues: &mut [WeightedQueue], budget: LinkBudget) -> Vec<TransferRequest> {
        let should = self.should_be_allocated(queues, budget.allocated);

        // Max-heap on deficit; equal deficits go to the lower queue index,
        // i.e. queue key order.
        let mut heap: BinaryHeap<(i64, Reverse<usize>)> = BinaryHeap::new();
        for (i, q) in queues.iter().enumerate() {
            let deficit = should[i] as i64 - q.queue.active as i64;
            tracing::trace!(
                vo = %q.queue.key.vo,
                activity = %q.queue.key.activity,
                should_be = should[i],
                active = q.queue.active,
                deficit,
                "queue deficit"
            );
            if deficit > 0 && !q.queue.pending.is_empty() {
                heap.push((deficit, Reverse(i)));
            }
        }

        let mut admitted = Vec::new();
        while admitted.len() < budget.available {
            let Some((deficit, Reverse(i))) = heap.pop() else {
                break;
            };
            let Some(request) = queues[i].queue.pending.pop_front() else {
                continue;
            };
            admitted.push(request);
            let deficit = deficit - 1;
            if deficit > 0 && !queues[i].queue.pending.is_empty() {
                heap.push((deficit, Reverse(i)));
            }
        }
        admitted
    }
}
