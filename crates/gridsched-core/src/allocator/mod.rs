//! Global slot allocation across links.
//!
//! Every endpoint appears twice in the flow network: once as a sender (fed
//! from the virtual source through its egress limit) and once as a receiver
//! (draining into the virtual sink through its ingress limit). Links connect a
//! sender vertex to a receiver vertex with the link's configured maximum of
//! concurrent transfers. The maximum flow is then the largest number of
//! transfers the grid can run at once, and the flow on each link edge is that
//! link's slot budget for the cycle.

mod network;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::link::{Endpoint, Link};

pub use network::{EdgeId, FlowNetwork, VertexId};

/// Rejected allocator input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("link {link} has non-positive capacity {capacity}")]
    NonPositiveLinkCapacity { link: Link, capacity: i64 },
    #[error("endpoint {endpoint} has negative limit {limit}")]
    NegativeEndpointLimit { endpoint: Endpoint, limit: i64 },
}

/// Per-endpoint concurrency limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimit {
    /// Maximum concurrent transfers reading from this endpoint.
    pub egress: i64,
    /// Maximum concurrent transfers writing to this endpoint.
    pub ingress: i64,
}

impl EndpointLimit {
    pub fn symmetric(limit: i64) -> Self {
        Self {
            egress: limit,
            ingress: limit,
        }
    }
}

/// Result of one allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    pub total: i64,
    pub slots: BTreeMap<Link, i64>,
}

impl Allocation {
    /// Slots assigned to `link` (0 if the link was not part of the network).
    pub fn slots_for(&self, link: &Link) -> i64 {
        self.slots.get(link).copied().unwrap_or(0)
    }
}

/// Computes per-link slot budgets via maximum flow.
#[derive(Debug, Clone)]
pub struct CapacityAllocator {
    default_endpoint_limit: i64,
}

impl CapacityAllocator {
    /// `default_endpoint_limit` applies to endpoints with no configured limit.
    pub fn new(default_endpoint_limit: i64) -> Self {
        Self {
            default_endpoint_limit: default_endpoint_limit.max(0),
        }
    }

    /// Allocate slots to `link_capacities` under the endpoint limits.
    ///
    /// Endpoints referenced by a link are added to `endpoints` implicitly.
    pub fn allocate(
        &self,
        endpoints: &BTreeSet<Endpoint>,
        link_capacities: &BTreeMap<Link, i64>,
        endpoint_limits: &HashMap<Endpoint, EndpointLimit>,
    ) -> Result<Allocation, AllocError> {
        for (link, &capacity) in link_capacities {
            if capacity <= 0 {
                return Err(AllocError::NonPositiveLinkCapacity {
                    link: link.clone(),
                    capacity,
                });
            }
        }
        for (endpoint, limit) in endpoint_limits {
            let worst = limit.egress.min(limit.ingress);
            if worst < 0 {
                return Err(AllocError::NegativeEndpointLimit {
                    endpoint: endpoint.clone(),
                    limit: worst,
                });
            }
        }

        let mut all: BTreeSet<&Endpoint> = endpoints.iter().collect();
        for link in link_capacities.keys() {
            all.insert(&link.source);
            all.insert(&link.destination);
        }
        if all.is_empty() || link_capacities.is_empty() {
            return Ok(Allocation::default());
        }

        // Vertex layout: 0 = source, 1 = sink, then (sender, receiver) per endpoint.
        let index: HashMap<&Endpoint, usize> =
            all.iter().enumerate().map(|(i, e)| (*e, i)).collect();
        let sender = |i: usize| 2 + 2 * i;
        let receiver = |i: usize| 3 + 2 * i;
        let (source, sink) = (0, 1);
        let mut net = FlowNetwork::with_vertices(2 + 2 * all.len());

        for (i, endpoint) in all.iter().enumerate() {
            let limit = endpoint_limits
                .get(*endpoint)
                .copied()
                .unwrap_or_else(|| EndpointLimit::symmetric(self.default_endpoint_limit));
            if limit.egress > 0 {
                net.add_edge(source, sender(i), limit.egress);
            }
            if limit.ingress > 0 {
                net.add_edge(receiver(i), sink, limit.ingress);
            }
        }

        let mut link_edges: Vec<(&Link, EdgeId)> = Vec::with_capacity(link_capacities.len());
        for (link, &capacity) in link_capacities {
            let from = sender(index[&link.source]);
            let to = receiver(index[&link.destination]);
            link_edges.push((link, net.add_edge(from, to, capacity)));
        }

        let total = net.max_flow(source, sink);
        debug_assert!(!net.has_augmenting_path(source, sink));

        let slots = link_edges
            .into_iter()
            .map(|(link, edge)| (link.clone(), net.flow(edge)))
            .collect();
        tracing::debug!(
            endpoints = all.len(),
            links = link_capacities.len(),
            total,
            "capacity allocation solved"
        );
        Ok(Allocation { total, slots })
    }
}

#[cfg(test)]
mod tests;
