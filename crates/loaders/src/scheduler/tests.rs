use std::sync::Arc;

use parking_lot::Mutex;
use stone_core::{ErrorCode, OracleException, StoneError};
use stone_messaging::{MessageEmitter, Observable, ReceiverHandle};
use stone_oracle::command::SleepCommand;
use stone_oracle::messages::{OracleCommandException, SleepTimeout};
use stone_oracle::mock::RecordingOracle;
use stone_oracle::Command;

use super::{Lane, OracleScheduler};

struct Harness {
    observable: Arc<Observable>,
    oracle: Arc<RecordingOracle>,
    scheduler: Arc<OracleScheduler>,
}

fn harness(max_high: u32, max_standard: u32, max_low: u32) -> Harness {
    let observable = Arc::new(Observable::new());
    let emitter: Arc<dyn MessageEmitter> = observable.clone();
    let oracle = Arc::new(RecordingOracle::new(Arc::clone(&emitter)));
    let scheduler = OracleScheduler::create(
        oracle.clone(),
        &observable,
        emitter,
        max_high,
        max_standard,
        max_low,
    )
    .unwrap();
    Harness {
        observable,
        oracle,
        scheduler,
    }
}

#[derive(Default)]
struct Sink {
    timeouts: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, ErrorCode)>>,
}

impl Sink {
    fn attach(observable: &Observable) -> Arc<Self> {
        let sink = Arc::new(Self::default());
        observable.register(&sink, Sink::on_timeout);
        observable.register(&sink, Sink::on_failure);
        sink
    }

    fn handle(self: &Arc<Self>) -> ReceiverHandle {
        ReceiverHandle::new(self)
    }

    fn on_timeout(&self, message: &SleepTimeout) -> Result<(), StoneError> {
        self.timeouts
            .lock()
            .push(message.origin.caller_name().to_string());
        Ok(())
    }

    fn on_failure(&self, message: &OracleCommandException) -> Result<(), StoneError> {
        self.failures.lock().push((
            message.origin.caller_name().to_string(),
            message.exception.code,
        ));
        Ok(())
    }
}

fn sleep(name: &str) -> Command {
    Command::new(SleepCommand::new(10)).with_caller_name(name)
}

#[test]
fn zero_low_lane_is_rejected() {
    let observable = Observable::new();
    let emitter: Arc<dyn MessageEmitter> = Arc::new(Observable::new());
    let oracle = Arc::new(RecordingOracle::new(Arc::clone(&emitter)));
    let err = OracleScheduler::create(oracle, &observable, emitter, 1, 1, 0)
        .err()
        .unwrap();
    assert!(matches!(err, StoneError::ParameterOutOfRange(_)));
}

#[test]
fn lanes_fill_in_preference_order() {
    let h = harness(1, 2, 1);
    let sink = Sink::attach(&h.observable);

    h.scheduler.schedule(sink.handle(), -100, sleep("c1"));
    h.scheduler.schedule(sink.handle(), 0, sleep("c2"));
    h.scheduler.schedule(sink.handle(), 0, sleep("c3"));

    let m = h.scheduler.metrics();
    assert_eq!((m.active_high, m.active_standard, m.active_low), (1, 2, 0));

    h.scheduler.schedule(sink.handle(), 0, sleep("c4"));
    let m = h.scheduler.metrics();
    assert_eq!((m.active_high, m.active_standard, m.active_low), (1, 2, 1));
    assert_eq!(m.total_queued(), 0);
    assert_eq!(h.oracle.caller_names(), vec!["c1", "c2", "c3", "c4"]);
}

#[test]
fn high_priority_overflows_downwards() {
    let h = harness(1, 1, 1);
    let sink = Sink::attach(&h.observable);

    h.scheduler.schedule(sink.handle(), -5, sleep("h1"));
    h.scheduler.schedule(sink.handle(), 10, sleep("s1"));
    let m = h.scheduler.metrics();
    assert_eq!((m.active_high, m.active_standard, m.active_low), (1, 1, 0));

    // High and standard lanes are busy: the next high entry lands in low.
    h.scheduler.schedule(sink.handle(), -5, sleep("h2"));
    let m = h.scheduler.metrics();
    assert_eq!((m.active_high, m.active_standard, m.active_low), (1, 1, 1));

    // Nothing is free anywhere: stays queued.
    h.scheduler.schedule(sink.handle(), -5, sleep("h3"));
    assert_eq!(h.scheduler.metrics().queued(Lane::High), 1);
}

#[test]
fn second_high_entry_prefers_standard_over_low() {
    let h = harness(1, 1, 1);
    let sink = Sink::attach(&h.observable);

    h.scheduler.schedule(sink.handle(), -1, sleep("h1"));
    h.scheduler.schedule(sink.handle(), -1, sleep("h2"));

    let m = h.scheduler.metrics();
    assert_eq!((m.active_high, m.active_standard, m.active_low), (1, 1, 0));
}

#[test]
fn low_priority_is_never_promoted() {
    let h = harness(1, 1, 1);
    let sink = Sink::attach(&h.observable);

    h.scheduler.schedule(sink.handle(), 100, sleep("l1"));
    h.scheduler.schedule(sink.handle(), 200, sleep("l2"));

    let m = h.scheduler.metrics();
    assert_eq!((m.active_high, m.active_standard, m.active_low), (0, 0, 1));
    assert_eq!(m.queued(Lane::Low), 1);
}

#[test]
fn equal_priorities_run_in_submission_order() {
    let h = harness(1, 1, 1);
    let sink = Sink::attach(&h.observable);

    for name in ["l1", "l2", "l3", "l4"] {
        h.scheduler.schedule(sink.handle(), 150, sleep(name));
    }
    // A lower value in the same queue goes first.
    h.scheduler.schedule(sink.handle(), 120, sleep("urgent-low"));

    let mut order = Vec::new();
    while let Some(submission) = h.oracle.take_next() {
        order.push(submission.command.caller_name().to_string());
        h.oracle.succeed(submission);
    }
    assert_eq!(order, vec!["l1", "urgent-low", "l2", "l3", "l4"]);
    assert_eq!(*sink.timeouts.lock(), order);
}

#[test]
fn completion_backfills_and_drains() {
    let h = harness(1, 1, 1);
    let sink = Sink::attach(&h.observable);

    for (i, priority) in [-10, -10, 0, 0, 150, 150].into_iter().enumerate() {
        h.scheduler.schedule(sink.handle(), priority, sleep(&format!("c{i}")));
    }
    assert_eq!(h.oracle.len(), 3);
    assert_eq!(h.scheduler.metrics().total_queued(), 3);

    while let Some(submission) = h.oracle.take_next() {
        h.oracle.succeed(submission);
        let m = h.scheduler.metrics();
        assert!(m.active_high <= 1 && m.active_standard <= 1 && m.active_low <= 1);
    }

    let stats = h.scheduler.statistics();
    assert_eq!(stats.scheduled, 6);
    assert!(stats.is_drained());
    assert_eq!(h.scheduler.metrics().total_active(), 0);
    assert_eq!(sink.timeouts.lock().len(), 6);
}

#[test]
fn result_carries_original_command_and_payload() {
    struct Step(u32);

    struct Checker {
        seen: Mutex<Option<u32>>,
    }

    let h = harness(1, 1, 1);
    let checker = Arc::new(Checker {
        seen: Mutex::new(None),
    });
    h.observable.register(&checker, |c: &Checker, m: &SleepTimeout| {
        *c.seen.lock() = m.origin.payload_as::<Step>().map(|s| s.0);
        Ok(())
    });

    h.scheduler.schedule(
        ReceiverHandle::new(&checker),
        0,
        sleep("with-payload").with_payload(Step(7)),
    );

    let submission = h.oracle.take_next().unwrap();
    assert!(submission.command.payload_as::<Step>().is_none());
    h.oracle.succeed(submission);
    assert_eq!(*checker.seen.lock(), Some(7));
}

#[test]
fn exception_is_forwarded_to_receiver() {
    let h = harness(1, 1, 1);
    let sink = Sink::attach(&h.observable);
    h.scheduler.schedule(sink.handle(), 0, sleep("broken"));

    let submission = h.oracle.take_next().unwrap();
    h.oracle.fail(
        submission,
        OracleException::new(ErrorCode::NetworkProtocol, "connection reset"),
    );

    assert_eq!(
        *sink.failures.lock(),
        vec![("broken".to_string(), ErrorCode::NetworkProtocol)]
    );
    assert!(h.scheduler.statistics().is_drained());
}

#[test]
fn receiver_dropped_before_spawn_is_never_submitted() {
    let h = harness(1, 1, 1);
    let busy = Sink::attach(&h.observable);
    for i in 0..3 {
        h.scheduler.schedule(busy.handle(), 0, sleep(&format!("busy{i}")));
    }
    assert_eq!(h.oracle.len(), 2);

    let doomed = Sink::attach(&h.observable);
    h.scheduler.schedule(doomed.handle(), 0, sleep("zombie"));
    drop(doomed);

    let mut submitted = Vec::new();
    while let Some(submission) = h.oracle.take_next() {
        submitted.push(submission.command.caller_name().to_string());
        h.oracle.succeed(submission);
    }

    assert_eq!(submitted, vec!["busy0", "busy1", "busy2"]);
    let stats = h.scheduler.statistics();
    assert_eq!((stats.scheduled, stats.processed), (4, 4));
    assert_eq!(busy.timeouts.lock().len(), 3);
}

#[test]
fn dead_receiver_at_submission_counts_as_processed() {
    let h = harness(1, 1, 1);
    h.scheduler.schedule(ReceiverHandle::dangling(), 0, sleep("ghost"));

    assert!(h.oracle.is_empty());
    let stats = h.scheduler.statistics();
    assert_eq!((stats.scheduled, stats.processed), (1, 1));
}

#[test]
fn cancel_only_touches_queued_entries_of_receiver() {
    let h = harness(1, 1, 1);
    let a = Sink::attach(&h.observable);
    let b = Sink::attach(&h.observable);

    h.scheduler.schedule(a.handle(), 0, sleep("a-running"));
    h.scheduler.schedule(a.handle(), 0, sleep("a-running-low"));
    h.scheduler.schedule(a.handle(), 0, sleep("a-queued"));
    h.scheduler.schedule(b.handle(), 0, sleep("b-queued"));
    assert_eq!(h.scheduler.metrics().queued(Lane::Standard), 2);

    h.scheduler.cancel_requests(&a.handle());

    let m = h.scheduler.metrics();
    assert_eq!(m.queued(Lane::Standard), 1);
    assert_eq!(m.statistics.processed, 1);

    // Already dispatched work for `a` still reports back.
    let running = h.oracle.take_by_caller("a-running").unwrap();
    h.oracle.succeed(running);
    assert_eq!(*a.timeouts.lock(), vec!["a-running"]);
    // The freed slot went to `b`, not to the cancelled entry.
    assert_eq!(h.oracle.caller_names(), vec!["a-running-low", "b-queued"]);
}

#[test]
fn cancel_all_empties_every_queue() {
    let h = harness(1, 1, 1);
    let sink = Sink::attach(&h.observable);
    for priority in [-50, -50, -50, 0, 0, 300] {
        h.scheduler.schedule(sink.handle(), priority, sleep("x"));
    }
    assert_eq!(h.scheduler.metrics().total_queued(), 3);

    h.scheduler.cancel_all_requests();

    let m = h.scheduler.metrics();
    assert_eq!(m.total_queued(), 0);
    assert_eq!(m.statistics.processed, 3);
    assert_eq!(m.total_active(), 3);
}

#[test]
fn refused_commands_release_their_slot() {
    let h = harness(1, 1, 1);
    let sink = Sink::attach(&h.observable);
    h.oracle.refuse();

    h.scheduler.schedule(sink.handle(), -10, sleep("r1"));
    h.scheduler.schedule(sink.handle(), 0, sleep("r2"));

    let m = h.scheduler.metrics();
    assert_eq!(m.total_active(), 0);
    assert_eq!((m.statistics.scheduled, m.statistics.processed), (2, 2));
}

#[test]
fn lane_caps_and_counters_hold_under_mixed_traffic() {
    let (max_high, max_standard, max_low) = (2, 3, 1);
    let h = harness(max_high, max_standard, max_low);
    let sinks: Vec<_> = (0..3).map(|_| Sink::attach(&h.observable)).collect();

    // Deterministic pseudo-random sequence of operations.
    let mut seed: u64 = 0x5EED;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as u32
    };

    let mut previous = h.scheduler.statistics();
    for step in 0..500 {
        match next() % 4 {
            0 | 1 => {
                let priority = [-20, -1, 0, 50, 100, 400][(next() % 6) as usize];
                let sink = &sinks[(next() % 3) as usize];
                h.scheduler
                    .schedule(sink.handle(), priority, sleep(&format!("s{step}")));
            }
            2 => {
                if let Some(submission) = h.oracle.take_next() {
                    h.oracle.succeed(submission);
                }
            }
            _ => {
                if next() % 8 == 0 {
                    h.scheduler
                        .cancel_requests(&sinks[(next() % 3) as usize].handle());
                }
            }
        }

        let m = h.scheduler.metrics();
        assert!(m.active_high <= max_high);
        assert!(m.active_standard <= max_standard);
        assert!(m.active_low <= max_low);
        assert!(m.statistics.processed <= m.statistics.scheduled);
        assert!(m.statistics.scheduled >= previous.scheduled);
        assert!(m.statistics.processed >= previous.processed);
        previous = m.statistics;
    }

    while let Some(submission) = h.oracle.take_next() {
        h.oracle.succeed(submission);
    }
    let m = h.scheduler.metrics();
    assert!(m.statistics.is_drained());
    assert_eq!(m.total_queued(), 0);
}
