//! End-to-end tests of the threaded loaders context.
//!
//! Commands run on real worker threads against files in a scratch directory.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use stone_core::{ErrorCode, StoneConfig, StoneError};
use stone_loaders::{with_state, GenericLoadersContext, LoaderState, LoaderStateMachine, LoadersContext};
use stone_messaging::ReceiverHandle;
use stone_oracle::command::{ReadFileCommand, SleepCommand};
use stone_oracle::{Command, OracleCommandException, OracleState, ReadFileSuccess, SleepTimeout};

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Collector {
    files: Mutex<Vec<(String, Vec<u8>)>>,
    timeouts: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, ErrorCode)>>,
}

impl Collector {
    fn attach(context: &GenericLoadersContext) -> Arc<Self> {
        let collector = Arc::new(Self::default());
        let lock = context.lock();
        let observable = lock.oracle_observable();
        observable.register(&collector, Self::on_file);
        observable.register(&collector, Self::on_timeout);
        observable.register(&collector, Self::on_failure);
        collector
    }

    fn on_file(&self, message: &ReadFileSuccess) -> Result<(), StoneError> {
        self.files
            .lock()
            .push((message.origin.caller_name().to_string(), message.content.to_vec()));
        Ok(())
    }

    fn on_timeout(&self, message: &SleepTimeout) -> Result<(), StoneError> {
        self.timeouts.lock().push(message.origin.caller_name().to_string());
        Ok(())
    }

    fn on_failure(&self, message: &OracleCommandException) -> Result<(), StoneError> {
        self.failures
            .lock()
            .push((message.origin.caller_name().to_string(), message.exception.code));
        Ok(())
    }
}

fn read(path: &str) -> Command {
    Command::new(ReadFileCommand::new(path)).with_caller_name(path)
}

fn started_context(root: &std::path::Path) -> Arc<GenericLoadersContext> {
    let context = GenericLoadersContext::new(1, 2, 1).unwrap();
    context.set_root_directory(root).unwrap();
    context.start_oracle().unwrap();
    context
}

#[test]
fn files_timers_and_failures_are_delivered() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.raw"), b"alpha").unwrap();
    std::fs::write(dir.path().join("b.raw"), b"bravo").unwrap();

    let context = started_context(dir.path());
    let collector = Collector::attach(&context);
    {
        let lock = context.lock();
        let receiver = ReceiverHandle::new(&collector);
        lock.schedule(receiver.clone(), 0, read("a.raw"));
        lock.schedule(receiver.clone(), -5, read("b.raw"));
        lock.schedule(receiver.clone(), 150, read("missing.raw"));
        lock.schedule(
            receiver,
            0,
            Command::new(SleepCommand::new(20)).with_caller_name("nap"),
        );
    }

    assert!(context.wait_until_complete_for(TIMEOUT));

    let mut files = collector.files.lock().clone();
    files.sort();
    assert_eq!(
        files,
        vec![
            ("a.raw".to_string(), b"alpha".to_vec()),
            ("b.raw".to_string(), b"bravo".to_vec()),
        ]
    );
    assert_eq!(
        *collector.failures.lock(),
        vec![("missing.raw".to_string(), ErrorCode::InexistentFile)]
    );
    assert_eq!(*collector.timeouts.lock(), vec!["nap"]);

    let stats = context.statistics();
    assert_eq!((stats.scheduled, stats.processed), (4, 4));
    assert_eq!(context.metrics().total_active(), 0);

    context.stop_oracle();
    assert_eq!(context.oracle().state(), OracleState::Stopped);
}

/// Reads `index.raw`, then schedules every file it lists from inside the
/// result handler.
struct IndexFollower {
    context: Weak<GenericLoadersContext>,
    self_handle: ReceiverHandle,
    read: Mutex<Vec<String>>,
}

impl IndexFollower {
    fn attach(context: &Arc<GenericLoadersContext>) -> Arc<Self> {
        let follower = Arc::new_cyclic(|weak: &Weak<Self>| Self {
            context: Arc::downgrade(context),
            self_handle: ReceiverHandle::from_weak(weak.clone()),
            read: Mutex::new(Vec::new()),
        });
        context
            .lock()
            .oracle_observable()
            .register(&follower, Self::on_file);
        follower
    }

    fn on_file(&self, message: &ReadFileSuccess) -> Result<(), StoneError> {
        let name = message.origin.caller_name().to_string();
        self.read.lock().push(name.clone());
        if name != "index.raw" {
            return Ok(());
        }

        let context = self
            .context
            .upgrade()
            .ok_or_else(|| StoneError::InvalidState("context is gone".into()))?;
        let listing = String::from_utf8_lossy(&message.content).to_string();
        let lock = context.lock();
        for entry in listing.lines().filter(|l| !l.is_empty()) {
            lock.schedule(self.self_handle.clone(), 0, read(entry));
        }
        Ok(())
    }
}

#[test]
fn result_handler_schedules_follow_up_work() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.raw"), "one.raw\ntwo.raw\nthree.raw\n").unwrap();
    for name in ["one.raw", "two.raw", "three.raw"] {
        std::fs::write(dir.path().join(name), name).unwrap();
    }

    let context = started_context(dir.path());
    let follower = IndexFollower::attach(&context);
    context
        .lock()
        .schedule(follower.self_handle.clone(), PRIORITY_URGENT, read("index.raw"));

    assert!(context.wait_until_complete_for(TIMEOUT));

    let mut read = follower.read.lock().clone();
    assert_eq!(read.first().map(String::as_str), Some("index.raw"));
    read.sort();
    assert_eq!(read, vec!["index.raw", "one.raw", "three.raw", "two.raw"]);
    assert_eq!(context.statistics().scheduled, 4);
    context.stop_oracle();
}

const PRIORITY_URGENT: i32 = stone_loaders::PRIORITY_HIGH - 10;

#[test]
fn oracle_settings_are_frozen_once_started() {
    let dir = tempfile::tempdir().unwrap();
    let context = started_context(dir.path());

    assert!(matches!(
        context.set_root_directory("/elsewhere"),
        Err(StoneError::BadSequenceOfCalls(_))
    ));
    assert!(matches!(
        context.start_oracle(),
        Err(StoneError::BadSequenceOfCalls(_))
    ));
    context.stop_oracle();
}

#[test]
fn stopped_oracle_refuses_and_counts_commands() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("late.raw"), b"late").unwrap();
    let context = started_context(dir.path());
    let collector = Collector::attach(&context);
    context.stop_oracle();

    context
        .lock()
        .schedule(ReceiverHandle::new(&collector), 0, read("late.raw"));

    let stats = context.statistics();
    assert_eq!((stats.scheduled, stats.processed), (1, 1));
    assert!(collector.files.lock().is_empty());
}

#[test]
fn stopping_answers_accepted_commands() {
    let dir = tempfile::tempdir().unwrap();
    let context = started_context(dir.path());
    let collector = Collector::attach(&context);
    context.lock().schedule(
        ReceiverHandle::new(&collector),
        0,
        Command::new(SleepCommand::new(5_000)).with_caller_name("long nap"),
    );

    context.stop_oracle();

    assert!(context.wait_until_complete_for(TIMEOUT));
    assert_eq!(
        *collector.failures.lock(),
        vec![("long nap".to_string(), ErrorCode::InvalidState)]
    );
    assert!(collector.timeouts.lock().is_empty());
    assert_eq!(context.metrics().total_active(), 0);
}

#[test]
fn context_from_config_uses_configured_lanes() {
    let config = StoneConfig::from_toml(
        r#"
        [scheduler]
        max_high = 2
        max_standard = 3
        max_low = 1

        [oracle]
        threads = 2
        "#,
    )
    .unwrap();

    let context = GenericLoadersContext::from_config(&config).unwrap();
    let collector = Collector::attach(&context);
    assert_eq!(context.oracle().state(), OracleState::Setup);

    // Not started: every command is refused, but lanes are still exercised.
    {
        let lock = context.lock();
        for _ in 0..3 {
            lock.schedule(ReceiverHandle::new(&collector), -10, read("x"));
        }
    }
    assert!(context.statistics().is_drained());
    assert_eq!(context.metrics().total_active(), 0);
}

/// Stores each file's length in order of arrival.
struct Measure {
    sizes: Arc<Mutex<Vec<usize>>>,
}

impl LoaderState for Measure {
    fn handle_read_file(
        &self,
        _machine: &LoaderStateMachine,
        message: &ReadFileSuccess,
    ) -> Result<(), StoneError> {
        self.sizes.lock().push(message.content.len());
        Ok(())
    }
}

#[test]
fn state_machine_runs_over_worker_threads() {
    let dir = tempfile::tempdir().unwrap();
    for (name, size) in [("s1", 1usize), ("s2", 2), ("s3", 3), ("s4", 4), ("s5", 5)] {
        std::fs::write(dir.path().join(name), vec![0u8; size]).unwrap();
    }

    let context = started_context(dir.path());
    let machine = LoaderStateMachine::create(&context);
    context.lock().add_loader(machine.clone());
    assert_eq!(context.loaders_count(), 1);

    machine.set_simultaneous_downloads(2).unwrap();
    let sizes = Arc::new(Mutex::new(Vec::new()));
    for name in ["s1", "s2", "s3", "s4", "s5"] {
        machine
            .schedule(with_state(read(name), Measure { sizes: Arc::clone(&sizes) }))
            .unwrap();
    }
    machine.start().unwrap();

    assert!(context.wait_until_complete_for(TIMEOUT));
    let mut sizes = sizes.lock().clone();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2, 3, 4, 5]);
    assert!(!machine.is_active());
    context.stop_oracle();
}
