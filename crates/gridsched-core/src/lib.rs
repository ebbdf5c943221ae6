//! Scheduling and congestion-control engine of a distributed transfer broker.
//!
//! Dispatcher nodes share one store ([`store::DataSource`]). On the lead node
//! the [`scheduler`] sizes links with the [`allocator`], admits queued
//! transfers with [`fairshare`] and hands them to a [`dispatch::Dispatcher`];
//! the [`optimizer`] tunes per-link stream counts. Every node runs the
//! [`heartbeat`] and the [`reaper`]. [`node::Node`] wires them together.

pub mod allocator;
pub mod config;
pub mod dispatch;
pub mod fairshare;
pub mod heartbeat;
pub mod link;
pub mod logging;
pub mod node;
pub mod optimizer;
pub mod reaper;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod telemetry;
