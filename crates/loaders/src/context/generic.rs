//! Loaders context backed by worker threads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;
use stone_core::config::OrthancConfig;
use stone_core::{StoneConfig, StoneError};
use stone_messaging::{Message, MessageEmitter, Observable, ReceiverHandle};
use stone_oracle::{Oracle, ThreadedOracle};
use tracing::{debug, info};

use super::{ContextCore, ContextLock, LoadersContext, LoadersLock};
use crate::scheduler::{OracleScheduler, SchedulerMetrics, Statistics};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delivers oracle results while holding the context lock.
struct LockingEmitter {
    mutex: Arc<ReentrantMutex<()>>,
    observable: Arc<Observable>,
}

impl MessageEmitter for LockingEmitter {
    fn emit_message(&self, receiver: &ReceiverHandle, message: &dyn Message) {
        let _guard = self.mutex.lock();
        self.observable.emit_message(receiver, message);
    }
}

/// Thread-safe loaders context.
///
/// Result handlers run on oracle worker threads with the context lock held.
/// The lock is reentrant, so a handler may call [`LoadersContext::lock`]
/// again to schedule follow-up commands.
pub struct GenericLoadersContext<O: Oracle = ThreadedOracle> {
    mutex: Arc<ReentrantMutex<()>>,
    core: ContextCore,
    oracle: Arc<O>,
}

impl<O: Oracle + 'static> GenericLoadersContext<O> {
    /// Build a context around the oracle returned by `factory`, which
    /// receives the emitter the oracle must publish its results through.
    pub fn with_oracle(
        factory: impl FnOnce(Arc<dyn MessageEmitter>) -> Result<Arc<O>, StoneError>,
        max_high: u32,
        max_standard: u32,
        max_low: u32,
    ) -> Result<Arc<Self>, StoneError> {
        let mutex = Arc::new(ReentrantMutex::new(()));
        let observable = Arc::new(Observable::new());
        let emitter: Arc<dyn MessageEmitter> = Arc::new(LockingEmitter {
            mutex: Arc::clone(&mutex),
            observable: Arc::clone(&observable),
        });

        let oracle = factory(emitter)?;
        let scheduler = OracleScheduler::create(
            oracle.clone(),
            &observable,
            observable.clone(),
            max_high,
            max_standard,
            max_low,
        )?;

        Ok(Arc::new(Self {
            mutex,
            core: ContextCore::new(observable, scheduler),
            oracle,
        }))
    }

    pub fn oracle(&self) -> &Arc<O> {
        &self.oracle
    }

    pub fn loaders_count(&self) -> usize {
        let _guard = self.mutex.lock();
        self.core.loaders_count()
    }

    pub fn statistics(&self) -> Statistics {
        self.lock().statistics()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.lock().pending()
    }

    /// Block until every scheduled command has been processed.
    pub fn wait_until_complete(&self) {
        while !self.statistics().is_drained() {
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Like [`wait_until_complete`](Self::wait_until_complete) but gives up
    /// after `timeout`. Returns whether the scheduler drained.
    pub fn wait_until_complete_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.statistics().is_drained() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl<O: Oracle + 'static> LoadersContext for GenericLoadersContext<O> {
    fn lock(&self) -> Box<dyn LoadersLock + '_> {
        Box::new(ContextLock::new(self.mutex.lock(), &self.core))
    }
}

// ── Threaded oracle ─────────────────────────────────────────────────

impl GenericLoadersContext<ThreadedOracle> {
    pub fn new(max_high: u32, max_standard: u32, max_low: u32) -> Result<Arc<Self>, StoneError> {
        let context = Self::with_oracle(
            |emitter| Ok(Arc::new(ThreadedOracle::new(emitter))),
            max_high,
            max_standard,
            max_low,
        )?;
        info!(max_high, max_standard, max_low, "loaders context created");
        Ok(context)
    }

    pub fn from_config(config: &StoneConfig) -> Result<Arc<Self>, StoneError> {
        let context = Self::with_oracle(
            |emitter| ThreadedOracle::from_config(emitter, &config.oracle).map(Arc::new),
            config.scheduler.max_high,
            config.scheduler.max_standard,
            config.scheduler.max_low,
        )?;
        info!(
            max_high = config.scheduler.max_high,
            max_standard = config.scheduler.max_standard,
            max_low = config.scheduler.max_low,
            threads = config.oracle.threads,
            "loaders context created from configuration"
        );
        Ok(context)
    }

    pub fn set_root_directory(&self, root: impl Into<PathBuf>) -> Result<(), StoneError> {
        self.oracle.set_root_directory(root)
    }

    pub fn set_orthanc_parameters(&self, orthanc: OrthancConfig) -> Result<(), StoneError> {
        self.oracle.set_orthanc_parameters(orthanc)
    }

    pub fn set_dicom_cache_size(&self, bytes: u64) -> Result<(), StoneError> {
        self.oracle.set_dicom_cache_size(bytes)
    }

    pub fn start_oracle(&self) -> Result<(), StoneError> {
        self.oracle.start()
    }

    /// Stop the worker threads. Does not take the context lock: workers
    /// delivering a result need it, and they are joined here.
    pub fn stop_oracle(&self) {
        debug!("stopping loaders context oracle");
        self.oracle.stop();
    }
}
