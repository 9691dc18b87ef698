//! Worker-pool oracle.
//!
//! Commands are queued on a channel and executed by a fixed set of worker
//! threads, each owning a current-thread tokio runtime. Sleep commands go to
//! a separate list polled by a dedicated timer thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use stone_core::config::{OracleConfig, OrthancConfig};
use stone_core::{ErrorCode, OracleException, StoneError};
use stone_messaging::{MessageEmitter, ReceiverHandle};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::messages::{OracleCommandException, SleepTimeout};
use crate::oracle::Oracle;
use crate::runner::{DicomParser, GenericOracleRunner, RunnerSettings};

/// How long a worker waits on the queue before re-checking for shutdown.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleState {
    Setup,
    Running,
    Stopped,
}

struct Job {
    receiver: ReceiverHandle,
    command: Command,
}

struct SleepingCommand {
    receiver: ReceiverHandle,
    command: Command,
    deadline: Instant,
}

struct Inner {
    state: OracleState,
    threads_count: usize,
    sleeping_resolution: Duration,
    settings: RunnerSettings,
    workers: Vec<JoinHandle<()>>,
}

pub struct ThreadedOracle {
    emitter: Arc<dyn MessageEmitter>,
    inner: Mutex<Inner>,
    sender: Sender<Job>,
    queue: Receiver<Job>,
    sleeping: Arc<Mutex<Vec<SleepingCommand>>>,
    running: Arc<AtomicBool>,
}

impl ThreadedOracle {
    pub fn new(emitter: Arc<dyn MessageEmitter>) -> Self {
        let (sender, queue) = crossbeam_channel::unbounded();
        Self {
            emitter,
            inner: Mutex::new(Inner {
                state: OracleState::Setup,
                threads_count: 4,
                sleeping_resolution: Duration::from_millis(50),
                settings: RunnerSettings::default(),
                workers: Vec::new(),
            }),
            sender,
            queue,
            sleeping: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(emitter: Arc<dyn MessageEmitter>, config: &OracleConfig) -> Result<Self, StoneError> {
        let oracle = Self::new(emitter);
        oracle.set_threads_count(config.threads as usize)?;
        oracle.set_sleeping_time_resolution(Duration::from_millis(config.sleeping_time_resolution_ms))?;
        oracle.inner.lock().settings = RunnerSettings::from_config(config);
        Ok(oracle)
    }

    pub fn state(&self) -> OracleState {
        self.inner.lock().state
    }

    // ── Setup ───────────────────────────────────────────────────────

    fn with_setup<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T, StoneError>) -> Result<T, StoneError> {
        let mut inner = self.inner.lock();
        if inner.state != OracleState::Setup {
            return Err(StoneError::BadSequenceOfCalls(
                "the oracle can only be configured before it is started".into(),
            ));
        }
        f(&mut inner)
    }

    pub fn set_threads_count(&self, count: usize) -> Result<(), StoneError> {
        self.with_setup(|inner| {
            if count == 0 {
                return Err(StoneError::ParameterOutOfRange(
                    "the oracle needs at least one worker thread".into(),
                ));
            }
            inner.threads_count = count;
            Ok(())
        })
    }

    pub fn set_sleeping_time_resolution(&self, resolution: Duration) -> Result<(), StoneError> {
        self.with_setup(|inner| {
            if resolution.is_zero() {
                return Err(StoneError::ParameterOutOfRange(
                    "the sleeping time resolution must be positive".into(),
                ));
            }
            inner.sleeping_resolution = resolution;
            Ok(())
        })
    }

    pub fn set_root_directory(&self, root: impl Into<PathBuf>) -> Result<(), StoneError> {
        let root = root.into();
        self.with_setup(|inner| {
            inner.settings.root_directory = root;
            Ok(())
        })
    }

    pub fn set_orthanc_parameters(&self, orthanc: OrthancConfig) -> Result<(), StoneError> {
        self.with_setup(|inner| {
            inner.settings.orthanc = orthanc;
            Ok(())
        })
    }

    pub fn set_dicom_cache_size(&self, bytes: u64) -> Result<(), StoneError> {
        self.with_setup(|inner| {
            inner.settings.set_dicom_cache_size(bytes);
            Ok(())
        })
    }

    pub fn set_dicom_parser(&self, parser: Arc<dyn DicomParser>) -> Result<(), StoneError> {
        self.with_setup(|inner| {
            inner.settings.dicom_parser = Some(parser);
            Ok(())
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Launch the worker threads and the sleeping-commands thread.
    pub fn start(&self) -> Result<(), StoneError> {
        let mut inner = self.inner.lock();
        match inner.state {
            OracleState::Setup => {}
            OracleState::Running => {
                return Err(StoneError::BadSequenceOfCalls("the oracle is already running".into()))
            }
            OracleState::Stopped => {
                return Err(StoneError::BadSequenceOfCalls("a stopped oracle cannot be restarted".into()))
            }
        }

        let mut prepared = Vec::with_capacity(inner.threads_count);
        for _ in 0..inner.threads_count {
            let runner = GenericOracleRunner::new(inner.settings.clone())?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            prepared.push((runner, runtime));
        }

        self.running.store(true, Ordering::Release);
        inner.state = OracleState::Running;

        for (index, (runner, runtime)) in prepared.into_iter().enumerate() {
            let queue = self.queue.clone();
            let emitter = Arc::clone(&self.emitter);
            let running = Arc::clone(&self.running);
            let handle = thread::Builder::new()
                .name(format!("oracle-worker-{index}"))
                .spawn(move || worker_loop(index, runner, runtime, queue, emitter, running))?;
            inner.workers.push(handle);
        }

        let sleeping = Arc::clone(&self.sleeping);
        let emitter = Arc::clone(&self.emitter);
        let running = Arc::clone(&self.running);
        let resolution = inner.sleeping_resolution;
        let handle = thread::Builder::new()
            .name("oracle-sleeping".into())
            .spawn(move || sleeping_loop(resolution, sleeping, emitter, running))?;
        inner.workers.push(handle);

        info!(
            threads = inner.threads_count,
            resolution_ms = resolution.as_millis() as u64,
            "threaded oracle started"
        );
        Ok(())
    }

    /// Stop and join every thread. Commands accepted but not yet executed
    /// are answered with an `InvalidState` exception.
    pub fn stop(&self) {
        let workers = {
            let mut inner = self.inner.lock();
            let was_running = inner.state == OracleState::Running;
            inner.state = OracleState::Stopped;
            if !was_running {
                return;
            }
            self.running.store(false, Ordering::Release);
            std::mem::take(&mut inner.workers)
        };

        for worker in workers {
            if worker.join().is_err() {
                warn!("oracle thread panicked");
            }
        }

        let mut discarded: Vec<(ReceiverHandle, Command)> = self
            .queue
            .try_iter()
            .map(|job| (job.receiver, job.command))
            .collect();
        discarded.extend(
            std::mem::take(&mut *self.sleeping.lock())
                .into_iter()
                .map(|item| (item.receiver, item.command)),
        );

        let count = discarded.len();
        for (receiver, command) in discarded {
            let message = OracleCommandException {
                origin: Arc::new(command),
                exception: OracleException::new(ErrorCode::InvalidState, "oracle stopped"),
            };
            self.emitter.emit_message(&receiver, &message);
        }
        info!(discarded = count, "threaded oracle stopped");
    }
}

impl Oracle for ThreadedOracle {
    fn schedule(&self, receiver: ReceiverHandle, command: Command) -> bool {
        let inner = self.inner.lock();
        if inner.state != OracleState::Running {
            debug!(kind = %command.kind(), state = ?inner.state, "oracle not running, command dropped");
            return false;
        }

        if let Some(sleep) = command.as_sleep() {
            let deadline = Instant::now() + sleep.delay();
            self.sleeping.lock().push(SleepingCommand {
                receiver,
                command,
                deadline,
            });
            true
        } else {
            self.sender.send(Job { receiver, command }).is_ok()
        }
    }
}

impl Drop for ThreadedOracle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    index: usize,
    runner: GenericOracleRunner,
    runtime: tokio::runtime::Runtime,
    queue: Receiver<Job>,
    emitter: Arc<dyn MessageEmitter>,
    running: Arc<AtomicBool>,
) {
    debug!(worker = index, "oracle worker started");
    while running.load(Ordering::Acquire) {
        match queue.recv_timeout(DEQUEUE_TIMEOUT) {
            Ok(job) => runtime.block_on(runner.execute(emitter.as_ref(), &job.receiver, job.command)),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = index, "oracle worker stopped");
}

fn sleeping_loop(
    resolution: Duration,
    sleeping: Arc<Mutex<Vec<SleepingCommand>>>,
    emitter: Arc<dyn MessageEmitter>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        thread::sleep(resolution);

        let expired: Vec<SleepingCommand> = {
            let mut list = sleeping.lock();
            let now = Instant::now();
            let (expired, pending): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *list).into_iter().partition(|c| c.deadline <= now);
            *list = pending;
            expired
        };

        for item in expired {
            let message = SleepTimeout {
                origin: Arc::new(item.command),
            };
            emitter.emit_message(&item.receiver, &message);
        }
    }
}
