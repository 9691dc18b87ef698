//! Priority scheduler between command producers and an [`Oracle`].
//!
//! Submitted commands are sorted into three queues (high, standard, low) by
//! their numeric priority. Each lane has a cap on commands in flight; a
//! queued command runs in its own lane or, when that lane is full, in a
//! lower one. Results come back through the oracle observable, are unwrapped
//! and re-emitted to the original receiver.
//!
//! Split into focused submodules:
//! - `core`: scheduler struct, construction, submission and cancellation
//! - `spawning`: moving queued commands into free lane slots
//! - `forwarding`: completion handling and delivery to the original receiver
//!
//! [`Oracle`]: stone_oracle::Oracle

mod core;
mod forwarding;
mod metrics;
mod spawning;
mod types;

#[cfg(test)]
mod tests;

pub use self::core::OracleScheduler;
pub use metrics::SchedulerMetrics;
pub use types::{Lane, Statistics};
