//! Facade that producers use to reach the scheduler.
//!
//! Every interaction goes through a scoped [`LoadersLock`]. The threaded
//! context backs it with a reentrant mutex that is also held while oracle
//! results are delivered, so a result handler can schedule follow-up work
//! through a fresh lock on the same thread. The cooperative context has a
//! single logical thread and its lock is a no-op.

mod cooperative;
mod generic;

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use stone_messaging::{Observable, ReceiverHandle};
use stone_oracle::Command;

use crate::scheduler::{OracleScheduler, SchedulerMetrics, Statistics};

pub use cooperative::CooperativeLoadersContext;
pub use generic::GenericLoadersContext;

/// Shared owner of the scheduler, the oracle and the loaders.
pub trait LoadersContext: Send + Sync {
    fn lock(&self) -> Box<dyn LoadersLock + '_>;
}

/// Operations available while the context lock is held.
pub trait LoadersLock {
    /// Queue `command` on behalf of `receiver`. Lower priority values are
    /// more urgent.
    fn schedule(&self, receiver: ReceiverHandle, priority: i32, command: Command);

    fn cancel_requests(&self, receiver: &ReceiverHandle);

    fn cancel_all_requests(&self);

    /// Keep `loader` alive as long as the context.
    fn add_loader(&self, loader: Arc<dyn Any + Send + Sync>);

    /// Observable on which oracle results are published.
    fn oracle_observable(&self) -> &Observable;

    fn statistics(&self) -> Statistics;

    /// Queue and lane occupancy, for diagnostics.
    fn pending(&self) -> SchedulerMetrics;
}

// ── Shared lock implementation ──────────────────────────────────────

/// State common to every context flavour.
pub(crate) struct ContextCore {
    pub observable: Arc<Observable>,
    pub scheduler: Arc<OracleScheduler>,
    loaders: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
}

impl ContextCore {
    pub fn new(observable: Arc<Observable>, scheduler: Arc<OracleScheduler>) -> Self {
        Self {
            observable,
            scheduler,
            loaders: Mutex::new(Vec::new()),
        }
    }

    pub fn loaders_count(&self) -> usize {
        self.loaders.lock().len()
    }
}

/// Lock handle holding `guard` for its lifetime.
pub(crate) struct ContextLock<'a, G> {
    _guard: G,
    core: &'a ContextCore,
}

impl<'a, G> ContextLock<'a, G> {
    pub fn new(guard: G, core: &'a ContextCore) -> Self {
        Self {
            _guard: guard,
            core,
        }
    }
}

impl<G> LoadersLock for ContextLock<'_, G> {
    fn schedule(&self, receiver: ReceiverHandle, priority: i32, command: Command) {
        self.core.scheduler.schedule(receiver, priority, command);
    }

    fn cancel_requests(&self, receiver: &ReceiverHandle) {
        self.core.scheduler.cancel_requests(receiver);
    }

    fn cancel_all_requests(&self) {
        self.core.scheduler.cancel_all_requests();
    }

    fn add_loader(&self, loader: Arc<dyn Any + Send + Sync>) {
        self.core.loaders.lock().push(loader);
    }

    fn oracle_observable(&self) -> &Observable {
        &self.core.observable
    }

    fn statistics(&self) -> Statistics {
        self.core.scheduler.statistics()
    }

    fn pending(&self) -> SchedulerMetrics {
        self.core.scheduler.metrics()
    }
}
