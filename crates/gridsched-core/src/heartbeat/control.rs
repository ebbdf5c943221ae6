//! Node-wide switches shared by the loops: lead flag, drain flag, lifecycle state.
//!
//! The heartbeat is the only writer of the lead flag; the scheduler and
//! optimizer read it at the top of every cycle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Node lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Starting,
    Active,
    Draining,
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeState::Starting => "starting",
            NodeState::Active => "active",
            NodeState::Draining => "draining",
            NodeState::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Default)]
pub struct NodeControl {
    lead: AtomicBool,
    draining: AtomicBool,
    state: RwLock<NodeState>,
}

impl NodeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_lead(&self) -> bool {
        self.lead.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub fn set_lead(&self, lead: bool) -> bool {
        self.lead.swap(lead, Ordering::AcqRel)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn set_draining(&self, draining: bool) -> bool {
        self.draining.swap(draining, Ordering::AcqRel)
    }

    /// Lead and not draining: allowed to admit transfers and tune links.
    pub fn may_schedule(&self) -> bool {
        self.is_lead() && !self.is_draining()
    }

    pub fn state(&self) -> NodeState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Stopped is terminal; later transitions are ignored.
    pub fn set_state(&self, next: NodeState) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if *state != NodeState::Stopped {
            *state = next;
        }
    }
}
