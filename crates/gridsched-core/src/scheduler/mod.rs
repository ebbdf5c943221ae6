//! Admission loop.
//!
//! Each cycle on the lead node: discover links with queued work, size them
//! with the capacity allocator, split each link's slots between its queues
//! with the fair-share scheduler, admit through the store and hand the
//! admitted transfers to the dispatcher.

mod budget;
mod cycle;
mod service;

pub use budget::{ProcessSlotBudget, Reservation};
pub use cycle::{build_workloads, CycleReport};
pub use service::Scheduler;

#[cfg(test)]
mod tests;
