//! Shared building blocks for the stone loading stack: the error taxonomy,
//! configuration, and the priority thresholds used by the scheduler.

pub mod config;
pub mod error;

pub use config::StoneConfig;
pub use error::*;

/// Any priority less than or equal to this value is classified as high priority.
pub const PRIORITY_HIGH: i32 = -1;

/// Any priority greater than or equal to this value is classified as low priority.
pub const PRIORITY_LOW: i32 = 100;
