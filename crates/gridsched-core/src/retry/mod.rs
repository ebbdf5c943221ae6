//! Retry policy for data-source calls.
//!
//! Storage errors are classified (busy database, pool timeout, I/O) so that
//! the loops can retry transient failures once and skip the cycle otherwise.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_sqlx_error};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::with_retry;
