//! Priority scheduling of oracle commands for image loaders.
//!
//! Producers go through a [`LoadersContext`] to reach the shared
//! [`OracleScheduler`], which bounds how many commands run at once in each
//! priority lane. [`LoaderStateMachine`] chains commands into sequences.

pub mod context;
pub mod scheduler;
pub mod state_machine;

pub use context::{CooperativeLoadersContext, GenericLoadersContext, LoadersContext, LoadersLock};
pub use scheduler::{Lane, OracleScheduler, SchedulerMetrics, Statistics};
pub use state_machine::{with_state, LoaderState, LoaderStateMachine, StateHandle};
pub use stone_core::{PRIORITY_HIGH, PRIORITY_LOW};
