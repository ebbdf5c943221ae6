//! Per-link stream-count optimization.
//!
//! [`decide`] is the pure controller; [`OptimizerDriver`] runs it for every
//! active link on the lead node, persists the result and publishes it.

mod decide;
mod driver;
mod state;

pub use decide::{decide, update_ema};
pub use driver::{OptimizerDriver, PassReport};
pub use state::{DecisionReason, OptimizerDecision, PairState};
