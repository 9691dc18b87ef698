//! Loaders context for a single-threaded host loop.

use std::sync::Arc;
use std::time::Duration;

use stone_core::{StoneConfig, StoneError};
use stone_messaging::{MessageEmitter, Observable};
use stone_oracle::{CooperativeOracle, RunnerSettings};
use tokio::runtime::Handle;
use tracing::info;

use super::{ContextCore, ContextLock, LoadersContext, LoadersLock};
use crate::scheduler::{OracleScheduler, Statistics};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Loaders context whose oracle runs commands as tasks on a tokio runtime.
///
/// Meant for a current-thread runtime: results are delivered on the host
/// loop, so the lock does not need to exclude anything.
pub struct CooperativeLoadersContext {
    core: ContextCore,
    oracle: Arc<CooperativeOracle>,
}

impl CooperativeLoadersContext {
    pub fn new(
        handle: Handle,
        settings: RunnerSettings,
        max_high: u32,
        max_standard: u32,
        max_low: u32,
    ) -> Result<Arc<Self>, StoneError> {
        let observable = Arc::new(Observable::new());
        let emitter: Arc<dyn MessageEmitter> = observable.clone();
        let oracle = Arc::new(CooperativeOracle::new(handle, Arc::clone(&emitter), settings)?);
        let scheduler = OracleScheduler::create(
            oracle.clone(),
            &observable,
            emitter,
            max_high,
            max_standard,
            max_low,
        )?;

        info!(max_high, max_standard, max_low, "cooperative loaders context created");
        Ok(Arc::new(Self {
            core: ContextCore::new(observable, scheduler),
            oracle,
        }))
    }

    /// Use the runtime the caller is running on.
    pub fn current(
        settings: RunnerSettings,
        max_high: u32,
        max_standard: u32,
        max_low: u32,
    ) -> Result<Arc<Self>, StoneError> {
        let handle = Handle::try_current()
            .map_err(|e| StoneError::BadSequenceOfCalls(format!("no tokio runtime available: {e}")))?;
        Self::new(handle, settings, max_high, max_standard, max_low)
    }

    pub fn from_config(handle: Handle, config: &StoneConfig) -> Result<Arc<Self>, StoneError> {
        Self::new(
            handle,
            RunnerSettings::from_config(&config.oracle),
            config.scheduler.max_high,
            config.scheduler.max_standard,
            config.scheduler.max_low,
        )
    }

    pub fn oracle(&self) -> &Arc<CooperativeOracle> {
        &self.oracle
    }

    pub fn statistics(&self) -> Statistics {
        self.core.scheduler.statistics()
    }

    /// Stop accepting commands. Queued commands are refused as they come up.
    pub fn shutdown(&self) {
        self.oracle.shutdown();
    }

    /// Yield to the runtime until every scheduled command has been processed.
    pub async fn wait_until_complete(&self) {
        while !self.statistics().is_drained() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl LoadersContext for CooperativeLoadersContext {
    fn lock(&self) -> Box<dyn LoadersLock + '_> {
        Box::new(ContextLock::new((), &self.core))
    }
}
