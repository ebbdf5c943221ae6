//! Arena-backed flow network and Dinic's blocking-flow solver.
//!
//! Edges live in one `Vec`; each forward edge at index `i` has its residual
//! twin at `i ^ 1`, so augmentation touches both without back-pointers.

use std::collections::VecDeque;

/// Handle to a vertex in a [`FlowNetwork`].
pub type VertexId = usize;

/// Handle to an edge in a [`FlowNetwork`].
pub type EdgeId = usize;

#[derive(Debug, Clone)]
struct Edge {
    to: VertexId,
    capacity: i64,
    flow: i64,
}

impl Edge {
    fn remaining(&self) -> i64 {
        self.capacity - self.flow
    }
}

/// Directed graph with residual edges, solved in O(V²·E).
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    edges: Vec<Edge>,
    adjacency: Vec<Vec<EdgeId>>,
    level: Vec<i32>,
    cursor: Vec<usize>,
}

impl FlowNetwork {
    pub fn with_vertices(vertices: usize) -> Self {
        Self {
            edges: Vec::new(),
            adjacency: vec![Vec::new(); vertices],
            level: vec![-1; vertices],
            cursor: vec![0; vertices],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Add `from → to` with `capacity` plus its zero-capacity residual edge.
    /// Returns the forward edge handle. Capacity must be positive; callers
    /// validate inputs before building the network.
    pub fn add_edge(&mut self, from: VertexId, to: VertexId, capacity: i64) -> EdgeId {
        debug_assert!(capacity > 0, "forward edge capacity must be positive");
        let id = self.edges.len();
        self.edges.push(Edge {
            to,
            capacity,
            flow: 0,
        });
        self.edges.push(Edge {
            to: from,
            capacity: 0,
            flow: 0,
        });
        self.adjacency[from].push(id);
        self.adjacency[to].push(id ^ 1);
        id
    }

    /// Flow currently carried by a forward edge.
    pub fn flow(&self, edge: EdgeId) -> i64 {
        self.edges[edge].flow
    }

    pub fn capacity(&self, edge: EdgeId) -> i64 {
        self.edges[edge].capacity
    }

    /// Compute the maximum flow from `source` to `sink`.
    pub fn max_flow(&mut self, source: VertexId, sink: VertexId) -> i64 {
        if source == sink {
            return 0;
        }
        let mut total = 0;
        while self.build_levels(source, sink) {
            self.cursor.iter_mut().for_each(|c| *c = 0);
            loop {
                let pushed = self.augment(source, sink, i64::MAX);
                if pushed == 0 {
                    break;
                }
                total += pushed;
            }
        }
        total
    }

    /// BFS over edges with remaining capacity. Returns whether `sink` is reachable.
    fn build_levels(&mut self, source: VertexId, sink: VertexId) -> bool {
        self.level.iter_mut().for_each(|l| *l = -1);
        self.level[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            for &e in &self.adjacency[v] {
                let edge = &self.edges[e];
                if edge.remaining() > 0 && self.level[edge.to] < 0 {
                    self.level[edge.to] = self.level[v] + 1;
                    queue.push_back(edge.to);
                }
            }
        }
        self.level[sink] >= 0
    }

    /// DFS restricted to the level graph. The per-vertex cursor only moves
    /// forward, so an edge that cannot carry more flow is never retried in
    /// the same phase.
    fn augment(&mut self, v: VertexId, sink: VertexId, limit: i64) -> i64 {
        if v == sink {
            return limit;
        }
        while self.cursor[v] < self.adjacency[v].len() {
            let e = self.adjacency[v][self.cursor[v]];
            let (to, remaining) = {
                let edge = &self.edges[e];
                (edge.to, edge.remaining())
            };
            if remaining > 0 && self.level[to] == self.level[v] + 1 {
                let pushed = self.augment(to, sink, limit.min(remaining));
                if pushed > 0 {
                    self.edges[e].flow += pushed;
                    self.edges[e ^ 1].flow -= pushed;
                    return pushed;
                }
            }
            self.cursor[v] += 1;
        }
        0
    }

    /// True if the residual graph still has a source → sink path.
    /// After [`FlowNetwork::max_flow`] this must be false.
    pub fn has_augmenting_path(&self, source: VertexId, sink: VertexId) -> bool {
        let mut seen = vec![false; self.vertex_count()];
        seen[source] = true;
        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            if v == sink {
                return true;
            }
            for &e in &self.adjacency[v] {
                let edge = &self.edges[e];
                if edge.remaining() > 0 && !seen[edge.to] {
                    seen[edge.to] = true;
                    queue.push_back(edge.to);
                }
            }
        }
        false
    }
}
