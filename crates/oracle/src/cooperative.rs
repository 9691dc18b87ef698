//! Single-threaded oracle driven by a host tokio runtime.
//!
//! Every command becomes a task on the supplied runtime handle; with a
//! current-thread runtime, completions run on the host loop one at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stone_core::StoneError;
use stone_messaging::{MessageEmitter, ReceiverHandle};
use tokio::runtime::Handle;
use tracing::debug;

use crate::command::Command;
use crate::messages::SleepTimeout;
use crate::oracle::Oracle;
use crate::runner::{GenericOracleRunner, RunnerSettings};

pub struct CooperativeOracle {
    handle: Handle,
    emitter: Arc<dyn MessageEmitter>,
    runner: Arc<GenericOracleRunner>,
    accepting: AtomicBool,
}

impl CooperativeOracle {
    pub fn new(
        handle: Handle,
        emitter: Arc<dyn MessageEmitter>,
        settings: RunnerSettings,
    ) -> Result<Self, StoneError> {
        Ok(Self {
            handle,
            emitter,
            runner: Arc::new(GenericOracleRunner::new(settings)?),
            accepting: AtomicBool::new(true),
        })
    }

    /// Use the runtime the caller is running on.
    pub fn current(emitter: Arc<dyn MessageEmitter>, settings: RunnerSettings) -> Result<Self, StoneError> {
        let handle = Handle::try_current()
            .map_err(|e| StoneError::BadSequenceOfCalls(format!("no tokio runtime available: {e}")))?;
        Self::new(handle, emitter, settings)
    }

    /// Refuse further commands. Tasks already spawned still complete.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

impl Oracle for CooperativeOracle {
    fn schedule(&self, receiver: ReceiverHandle, command: Command) -> bool {
        if !self.is_accepting() {
            debug!(kind = %command.kind(), "cooperative oracle shut down, command dropped");
            return false;
        }

        let emitter = Arc::clone(&self.emitter);
        if let Some(delay) = command.as_sleep().map(|s| s.delay()) {
            self.handle.spawn(async move {
                tokio::time::sleep(delay).await;
                let message = SleepTimeout {
                    origin: Arc::new(command),
                };
                emitter.emit_message(&receiver, &message);
            });
        } else {
            let runner = Arc::clone(&self.runner);
            self.handle.spawn(async move {
                runner.execute(emitter.as_ref(), &receiver, command).await;
            });
        }
        true
    }
}
