//! Node-wide transfer process budget.
//!
//! Every link scheduled in a cycle reserves slots from this budget before
//! admitting, so the node never runs more than `max_url_copy_processes`
//! transfers at once regardless of how many links have room.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared process slot budget. Links reserve slots before admitting and hand
/// back whatever they did not use.
#[derive(Debug)]
pub struct ProcessSlotBudget {
    max_total: usize,
    in_use: AtomicUsize,
}

impl ProcessSlotBudget {
    pub fn new(max_total: usize) -> Self {
        Self {
            max_total,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    /// Slots currently counted as running or reserved.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Free slots (max_total - in_use). 0 when the node is full or over.
    pub fn available(&self) -> usize {
        self.max_total.saturating_sub(self.in_use())
    }

    /// Reset usage to the number of transfers actually running on this node.
    /// Called at the start of every cycle so finished transfers free their slots.
    pub fn sync(&self, running: u64) {
        let running = usize::try_from(running).unwrap_or(usize::MAX);
        self.in_use.store(running, Ordering::Relaxed);
    }

    /// Reserve up to `requested` slots. Returns the number actually reserved
    /// (min(requested, available)).
    pub fn reserve(&self, requested: usize) -> usize {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let take = requested.min(self.max_total.saturating_sub(current));
            match self.in_use.compare_exchange_weak(
                current,
                current + take,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return take,
                Err(actual) => current = actual,
            }
        }
    }

    /// Give back `n` slots. Call with at most the value returned from `reserve`.
    pub fn release(&self, n: usize) {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            match self.in_use.compare_exchange_weak(
                current,
                current.saturating_sub(n),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Reserve up to `requested` slots behind a guard that releases the
    /// unused part when dropped.
    pub fn reservation(&self, requested: usize) -> Reservation<'_> {
        let reserved = self.reserve(requested);
        Reservation {
            budget: self,
            reserved,
        }
    }
}

/// Reserved slots; whatever is not [`commit`](Reservation::commit)ted goes
/// back to the budget on drop.
#[derive(Debug)]
pub struct Reservation<'a> {
    budget: &'a ProcessSlotBudget,
    reserved: usize,
}

impl Reservation<'_> {
    pub fn slots(&self) -> usize {
        self.reserved
    }

    /// Keep `n` slots as running processes.
    pub fn commit(&mut self, n: usize) {
        self.reserved = self.reserved.saturating_sub(n);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.budget.release(self.reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release() {
        let budget = ProcessSlotBudget::new(16);
        assert_eq!(budget.available(), 16);
        assert_eq!(budget.reserve(8), 8);
        assert_eq!(budget.in_use(), 8);
        assert_eq!(budget.reserve(10), 8);
        assert_eq!(budget.available(), 0);
        assert_eq!(budget.reserve(1), 0);
        budget.release(8);
        assert_eq!(budget.available(), 8);
        budget.release(100);
        assert_eq!(budget.in_use(), 0);
    }

    #[test]
    fn sync_tracks_running_processes() {
        let budget = ProcessSlotBudget::new(10);
        budget.sync(4);
        assert_eq!(budget.available(), 6);
        budget.sync(12);
        assert_eq!(budget.available(), 0);
        assert_eq!(budget.reserve(3), 0);
        budget.sync(0);
        assert_eq!(budget.available(), 10);
    }

    #[test]
    fn reservation_returns_unused_slots() {
        let budget = ProcessSlotBudget::new(10);
        {
            let mut r = budget.reservation(6);
            assert_eq!(r.slots(), 6);
            assert_eq!(budget.available(), 4);
            r.commit(2);
        }
        assert_eq!(budget.in_use(), 2);
        assert_eq!(budget.reservation(20).slots(), 8);
        assert_eq!(budget.in_use(), 2);
    }

    #[test]
    fn zero_budget_never_reserves() {
        let budget = ProcessSlotBudget::new(0);
        assert_eq!(budget.reserve(5), 0);
        assert_eq!(budget.available(), 0);
    }
}
