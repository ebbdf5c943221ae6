//! CLI command handlers. Each command is in its own file.

mod drain;
mod run;
mod share;
mod status;

pub use drain::run_drain;
pub(crate) use run::cancel_on_signal;
pub use run::run_node;
pub use share::run_share;
pub use status::run_status;
