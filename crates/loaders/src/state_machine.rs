//! Sequential multi-step loader on top of the scheduler.
//!
//! Each scheduled command carries, as its payload, the [`LoaderState`] that
//! handles its answer. At most `simultaneous_downloads` commands are in
//! flight; the rest wait in FIFO order. Any failure clears the remaining
//! commands: a sequence either completes or is abandoned.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use stone_core::config::StateMachineConfig;
use stone_core::StoneError;
use stone_messaging::ReceiverHandle;
use stone_oracle::messages::{
    GetOrthancImageSuccess, GetOrthancWebViewerJpegSuccess, HttpSuccess, OracleCommandException,
    OrthancRestApiSuccess, ParseDicomSuccess, ReadFileSuccess, SleepTimeout,
};
use stone_oracle::Command;
use tracing::{debug, error, info, warn};

use crate::context::LoadersContext;

const DEFAULT_SIMULTANEOUS_DOWNLOADS: usize = 4;

/// Handler of the answer to one command of a sequence.
///
/// Every handler defaults to `NotImplemented`, which aborts the sequence.
#[allow(unused_variables)]
pub trait LoaderState: Send + Sync + 'static {
    fn handle_http(&self, machine: &LoaderStateMachine, message: &HttpSuccess) -> Result<(), StoneError> {
        Err(unexpected("HTTP answer"))
    }

    fn handle_orthanc_rest_api(
        &self,
        machine: &LoaderStateMachine,
        message: &OrthancRestApiSuccess,
    ) -> Result<(), StoneError> {
        Err(unexpected("Orthanc REST API answer"))
    }

    fn handle_parse_dicom(
        &self,
        machine: &LoaderStateMachine,
        message: &ParseDicomSuccess,
    ) -> Result<(), StoneError> {
        Err(unexpected("parsed DICOM"))
    }

    fn handle_image(
        &self,
        machine: &LoaderStateMachine,
        message: &GetOrthancImageSuccess,
    ) -> Result<(), StoneError> {
        Err(unexpected("Orthanc image"))
    }

    fn handle_web_viewer_jpeg(
        &self,
        machine: &LoaderStateMachine,
        message: &GetOrthancWebViewerJpegSuccess,
    ) -> Result<(), StoneError> {
        Err(unexpected("web viewer JPEG"))
    }

    fn handle_read_file(
        &self,
        machine: &LoaderStateMachine,
        message: &ReadFileSuccess,
    ) -> Result<(), StoneError> {
        Err(unexpected("file content"))
    }

    fn handle_sleep_timeout(
        &self,
        machine: &LoaderStateMachine,
        message: &SleepTimeout,
    ) -> Result<(), StoneError> {
        Err(unexpected("timer expiry"))
    }
}

fn unexpected(what: &str) -> StoneError {
    StoneError::NotImplemented(format!("this loader state does not handle {what}"))
}

/// Payload stored on commands scheduled through a [`LoaderStateMachine`].
pub type StateHandle = Arc<dyn LoaderState>;

/// Attach `state` to `command` as the handler of its answer.
pub fn with_state(command: Command, state: impl LoaderState) -> Command {
    let state: StateHandle = Arc::new(state);
    command.with_payload(state)
}

struct Inner {
    active: bool,
    simultaneous_downloads: usize,
    pending: VecDeque<Command>,
    active_commands: usize,
}

pub struct LoaderStateMachine {
    context: Weak<dyn LoadersContext>,
    self_handle: ReceiverHandle,
    inner: Mutex<Inner>,
}

impl LoaderStateMachine {
    /// Build a state machine and subscribe it to the context's results.
    pub fn create<C: LoadersContext + 'static>(context: &Arc<C>) -> Arc<Self> {
        let weak: Weak<C> = Arc::downgrade(context);
        let weak_context: Weak<dyn LoadersContext> = weak;
        let machine = Arc::new_cyclic(|weak: &Weak<Self>| Self {
            context: weak_context,
            self_handle: ReceiverHandle::from_weak(weak.clone()),
            inner: Mutex::new(Inner {
                active: false,
                simultaneous_downloads: DEFAULT_SIMULTANEOUS_DOWNLOADS,
                pending: VecDeque::new(),
                active_commands: 0,
            }),
        });

        let lock = context.lock();
        let observable = lock.oracle_observable();
        observable.register(&machine, Self::on_http);
        observable.register(&machine, Self::on_orthanc_rest_api);
        observable.register(&machine, Self::on_parse_dicom);
        observable.register(&machine, Self::on_image);
        observable.register(&machine, Self::on_web_viewer_jpeg);
        observable.register(&machine, Self::on_read_file);
        observable.register(&machine, Self::on_sleep_timeout);
        observable.register(&machine, Self::on_exception);
        drop(lock);

        machine
    }

    /// Receiver the commands of this machine are scheduled for.
    pub fn handle(&self) -> ReceiverHandle {
        self.self_handle.clone()
    }

    pub fn context(&self) -> Option<Arc<dyn LoadersContext>> {
        self.context.upgrade()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active_commands
    }

    pub fn set_simultaneous_downloads(&self, count: usize) -> Result<(), StoneError> {
        let mut inner = self.inner.lock();
        if inner.active {
            return Err(StoneError::BadSequenceOfCalls(
                "simultaneous downloads cannot change while the loader is running".into(),
            ));
        }
        if count == 0 {
            return Err(StoneError::ParameterOutOfRange(
                "at least one simultaneous download is required".into(),
            ));
        }
        inner.simultaneous_downloads = count;
        Ok(())
    }

    pub fn apply_config(&self, config: &StateMachineConfig) -> Result<(), StoneError> {
        self.set_simultaneous_downloads(config.simultaneous_downloads as usize)
    }

    /// Append `command` to the sequence and submit it if a download slot is
    /// free. Its payload must be the [`StateHandle`] handling the answer
    /// (see [`with_state`]).
    pub fn schedule(&self, command: Command) -> Result<(), StoneError> {
        if command.payload_as::<StateHandle>().is_none() {
            return Err(StoneError::ParameterOutOfRange(
                "The payload must contain the next state".into(),
            ));
        }

        self.inner.lock().pending.push_back(command);
        self.step();
        Ok(())
    }

    pub fn start(&self) -> Result<(), StoneError> {
        {
            let mut inner = self.inner.lock();
            if inner.active {
                return Err(StoneError::BadSequenceOfCalls(
                    "the loader state machine is already running".into(),
                ));
            }
            inner.active = true;
            debug!(pending = inner.pending.len(), "loader state machine started");
        }
        self.step();
        self.settle();
        Ok(())
    }

    /// Drop every command not yet handed to the scheduler.
    pub fn clear(&self) {
        let dropped = {
            let mut inner = self.inner.lock();
            let count = inner.pending.len();
            inner.pending.clear();
            count
        };
        if dropped > 0 {
            debug!(count = dropped, "pending loader commands cleared");
        }
    }

    /// Hand pending commands to the scheduler until the download cap is hit.
    fn step(&self) {
        let batch: Vec<Command> = {
            let mut inner = self.inner.lock();
            let mut batch = Vec::new();
            while inner.active_commands < inner.simultaneous_downloads {
                let Some(command) = inner.pending.pop_front() else {
                    break;
                };
                inner.active_commands += 1;
                batch.push(command);
            }
            batch
        };
        if batch.is_empty() {
            return;
        }

        let Some(context) = self.context.upgrade() else {
            warn!(count = batch.len(), "loaders context is gone, commands dropped");
            let mut inner = self.inner.lock();
            inner.active_commands = inner.active_commands.saturating_sub(batch.len());
            return;
        };

        let lock = context.lock();
        for command in batch {
            lock.schedule(self.self_handle.clone(), 0, command);
        }
    }

    /// Leave the active state once nothing is pending or in flight.
    fn settle(&self) {
        let mut inner = self.inner.lock();
        if inner.active && inner.pending.is_empty() && inner.active_commands == 0 {
            inner.active = false;
            info!("loader state machine finished");
        }
    }

    // ── Result handlers ─────────────────────────────────────────────

    fn handle_success(
        &self,
        origin: &Command,
        dispatch: impl FnOnce(&dyn LoaderState) -> Result<(), StoneError>,
    ) -> Result<(), StoneError> {
        {
            let mut inner = self.inner.lock();
            if inner.active_commands == 0 {
                error!(kind = %origin.kind(), "success message while no command is active, ignored");
                return Ok(());
            }
            inner.active_commands -= 1;
        }

        let outcome = match origin.payload_as::<StateHandle>() {
            Some(state) => dispatch(state.as_ref()),
            None => Err(StoneError::Internal(
                "answer reached the state machine without its state".into(),
            )),
        };

        match outcome {
            Ok(()) => self.step(),
            Err(err) => {
                error!(kind = %origin.kind(), error = %err, "error in the state machine, stopping all processing");
                self.clear();
            }
        }
        self.settle();
        Ok(())
    }

    fn on_http(&self, message: &HttpSuccess) -> Result<(), StoneError> {
        self.handle_success(&message.origin, |state| state.handle_http(self, message))
    }

    fn on_orthanc_rest_api(&self, message: &OrthancRestApiSuccess) -> Result<(), StoneError> {
        self.handle_success(&message.origin, |state| state.handle_orthanc_rest_api(self, message))
    }

    fn on_parse_dicom(&self, message: &ParseDicomSuccess) -> Result<(), StoneError> {
        self.handle_success(&message.origin, |state| state.handle_parse_dicom(self, message))
    }

    fn on_image(&self, message: &GetOrthancImageSuccess) -> Result<(), StoneError> {
        self.handle_success(&message.origin, |state| state.handle_image(self, message))
    }

    fn on_web_viewer_jpeg(&self, message: &GetOrthancWebViewerJpegSuccess) -> Result<(), StoneError> {
        self.handle_success(&message.origin, |state| state.handle_web_viewer_jpeg(self, message))
    }

    fn on_read_file(&self, message: &ReadFileSuccess) -> Result<(), StoneError> {
        self.handle_success(&message.origin, |state| state.handle_read_file(self, message))
    }

    fn on_sleep_timeout(&self, message: &SleepTimeout) -> Result<(), StoneError> {
        self.handle_success(&message.origin, |state| state.handle_sleep_timeout(self, message))
    }

    fn on_exception(&self, message: &OracleCommandException) -> Result<(), StoneError> {
        {
            let mut inner = self.inner.lock();
            inner.active_commands = inner.active_commands.saturating_sub(1);
        }
        error!(
            kind = %message.origin.kind(),
            code = %message.exception.code,
            details = %message.exception.details,
            "error in the state machine, stopping all processing"
        );
        self.clear();
        self.settle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use stone_core::{ErrorCode, OracleException};
    use stone_oracle::command::{HttpCommand, ReadFileCommand, SleepCommand};
    use stone_oracle::mock::RecordingOracle;

    use super::*;
    use crate::context::GenericLoadersContext;

    type Context = GenericLoadersContext<RecordingOracle>;
    type Log = Arc<Mutex<Vec<String>>>;

    fn context() -> Arc<Context> {
        GenericLoadersContext::with_oracle(|emitter| Ok(Arc::new(RecordingOracle::new(emitter))), 4, 4, 1)
            .unwrap()
    }

    struct Step {
        name: String,
        log: Log,
        fail: bool,
    }

    impl LoaderState for Step {
        fn handle_read_file(
            &self,
            _machine: &LoaderStateMachine,
            _message: &ReadFileSuccess,
        ) -> Result<(), StoneError> {
            self.log.lock().push(self.name.clone());
            if self.fail {
                return Err(StoneError::BadFileFormat(format!("{} is corrupt", self.name)));
            }
            Ok(())
        }
    }

    /// Schedules `next` when its own answer arrives.
    struct Chain {
        log: Log,
        next: Mutex<Option<Command>>,
    }

    impl LoaderState for Chain {
        fn handle_read_file(
            &self,
            machine: &LoaderStateMachine,
            _message: &ReadFileSuccess,
        ) -> Result<(), StoneError> {
            self.log.lock().push("chain".into());
            if let Some(next) = self.next.lock().take() {
                machine.schedule(next)?;
            }
            Ok(())
        }
    }

    struct Silent;

    impl LoaderState for Silent {}

    /// Records timer expiries and HTTP statuses.
    struct Watch {
        log: Log,
    }

    impl LoaderState for Watch {
        fn handle_http(&self, _machine: &LoaderStateMachine, message: &HttpSuccess) -> Result<(), StoneError> {
            self.log.lock().push(format!("http {}", message.status));
            Ok(())
        }

        fn handle_sleep_timeout(
            &self,
            _machine: &LoaderStateMachine,
            message: &SleepTimeout,
        ) -> Result<(), StoneError> {
            self.log.lock().push(format!("woke {}", message.origin.caller_name()));
            Ok(())
        }
    }

    fn answer_http(context: &Context, status: u16) {
        let submission = context.oracle().take_next().unwrap();
        let message = HttpSuccess {
            origin: Arc::clone(&submission.command),
            status,
            headers: Default::default(),
            answer: Default::default(),
        };
        context.oracle().complete(&submission, &message);
    }

    fn step(name: &str, log: &Log, fail: bool) -> Command {
        with_state(
            Command::new(ReadFileCommand::new(format!("{name}.dcm"))).with_caller_name(name),
            Step {
                name: name.to_string(),
                log: Arc::clone(log),
                fail,
            },
        )
    }

    fn finish_all(context: &Context) {
        while let Some(submission) = context.oracle().take_next() {
            context.oracle().succeed(submission);
        }
    }

    #[test]
    fn command_without_state_is_rejected() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        let err = machine
            .schedule(Command::new(ReadFileCommand::new("a.dcm")))
            .unwrap_err();
        assert!(matches!(err, StoneError::ParameterOutOfRange(_)));
        assert_eq!(machine.pending_count(), 0);
    }

    #[test]
    fn scheduling_submits_without_start() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        let log = Log::default();
        machine.schedule(step("a", &log, false)).unwrap();

        assert_eq!(context.oracle().len(), 1);
        assert_eq!(machine.pending_count(), 0);
        assert_eq!(machine.active_count(), 1);
        assert!(!machine.is_active());

        finish_all(&context);
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(machine.active_count(), 0);
        assert!(!machine.is_active());
        assert!(context.statistics().is_drained());
    }

    #[test]
    fn commands_beyond_the_cap_wait_for_a_free_slot_before_start() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        machine.set_simultaneous_downloads(1).unwrap();
        let log = Log::default();
        machine.schedule(step("a", &log, false)).unwrap();
        machine.schedule(step("b", &log, false)).unwrap();
        assert_eq!(context.oracle().caller_names(), vec!["a"]);
        assert_eq!(machine.pending_count(), 1);

        let first = context.oracle().take_next().unwrap();
        context.oracle().succeed(first);
        assert_eq!(context.oracle().caller_names(), vec!["b"]);
    }

    #[test]
    fn downloads_are_capped_and_run_in_order() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        machine.set_simultaneous_downloads(2).unwrap();
        let log = Log::default();
        for name in ["a", "b", "c", "d", "e"] {
            machine.schedule(step(name, &log, false)).unwrap();
        }

        machine.start().unwrap();
        assert!(machine.is_active());
        assert_eq!(context.oracle().caller_names(), vec!["a", "b"]);
        assert_eq!(machine.active_count(), 2);

        let first = context.oracle().take_next().unwrap();
        context.oracle().succeed(first);
        assert_eq!(context.oracle().caller_names(), vec!["b", "c"]);

        finish_all(&context);
        assert_eq!(*log.lock(), vec!["a", "b", "c", "d", "e"]);
        assert!(!machine.is_active());
        assert!(context.statistics().is_drained());
    }

    #[test]
    fn handler_error_discards_remaining_commands() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        machine.set_simultaneous_downloads(1).unwrap();
        let log = Log::default();
        machine.schedule(step("first", &log, true)).unwrap();
        machine.schedule(step("second", &log, false)).unwrap();
        machine.schedule(step("third", &log, false)).unwrap();
        machine.start().unwrap();

        let first = context.oracle().take_next().unwrap();
        context.oracle().succeed(first);

        assert!(context.oracle().is_empty());
        assert_eq!(*log.lock(), vec!["first"]);
        assert_eq!(machine.pending_count(), 0);
        assert!(!machine.is_active());
        assert_eq!(context.statistics().scheduled, 1);
    }

    #[test]
    fn oracle_exception_aborts_the_sequence() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        machine.set_simultaneous_downloads(1).unwrap();
        let log = Log::default();
        machine.schedule(step("missing", &log, false)).unwrap();
        machine.schedule(step("never", &log, false)).unwrap();
        machine.start().unwrap();

        let submission = context.oracle().take_next().unwrap();
        context.oracle().fail(
            submission,
            OracleException::new(ErrorCode::InexistentFile, "missing.dcm"),
        );

        assert!(log.lock().is_empty());
        assert!(context.oracle().is_empty());
        assert_eq!(machine.active_count(), 0);
        assert!(!machine.is_active());
    }

    #[test]
    fn unhandled_answer_aborts_the_sequence() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        machine.set_simultaneous_downloads(1).unwrap();
        let log = Log::default();
        machine
            .schedule(with_state(Command::new(ReadFileCommand::new("x")), Silent))
            .unwrap();
        machine.schedule(step("after", &log, false)).unwrap();
        machine.start().unwrap();

        finish_all(&context);
        assert!(log.lock().is_empty());
        assert!(!machine.is_active());
    }

    #[test]
    fn timer_and_http_answers_reach_their_state() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        machine.set_simultaneous_downloads(1).unwrap();
        let log = Log::default();
        let nap = Command::new(SleepCommand::new(10)).with_caller_name("nap");
        machine.schedule(with_state(nap, Watch { log: Arc::clone(&log) })).unwrap();
        let fetch = Command::new(HttpCommand::new("http://pacs/studies"));
        machine.schedule(with_state(fetch, Watch { log: Arc::clone(&log) })).unwrap();
        machine.start().unwrap();

        let timer = context.oracle().take_next().unwrap();
        context.oracle().succeed(timer);
        answer_http(&context, 200);

        assert_eq!(*log.lock(), vec!["woke nap", "http 200"]);
        assert_eq!(machine.active_count(), 0);
        assert!(!machine.is_active());
    }

    #[test]
    fn unhandled_timer_or_http_answer_aborts_the_sequence() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        machine.set_simultaneous_downloads(1).unwrap();
        let log = Log::default();
        machine
            .schedule(with_state(Command::new(SleepCommand::new(10)), Silent))
            .unwrap();
        machine.schedule(step("after", &log, false)).unwrap();
        machine.start().unwrap();

        finish_all(&context);
        assert!(log.lock().is_empty());
        assert_eq!(machine.active_count(), 0);
        assert!(!machine.is_active());

        machine
            .schedule(with_state(Command::new(HttpCommand::new("http://pacs/")), Silent))
            .unwrap();
        machine.schedule(step("later", &log, false)).unwrap();
        machine.start().unwrap();
        answer_http(&context, 204);

        assert!(context.oracle().is_empty());
        assert!(log.lock().is_empty());
        assert_eq!(machine.active_count(), 0);
        assert_eq!(machine.pending_count(), 0);
        assert!(!machine.is_active());
    }

    #[test]
    fn handler_can_schedule_follow_up() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        let log = Log::default();
        let chain = Chain {
            log: Arc::clone(&log),
            next: Mutex::new(Some(step("follow-up", &log, false))),
        };
        machine
            .schedule(with_state(Command::new(ReadFileCommand::new("index")), chain))
            .unwrap();
        machine.start().unwrap();

        finish_all(&context);
        assert_eq!(*log.lock(), vec!["chain", "follow-up"]);
        assert_eq!(context.statistics().scheduled, 2);
        assert!(!machine.is_active());
    }

    #[test]
    fn settings_are_locked_while_running() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        assert!(matches!(
            machine.set_simultaneous_downloads(0),
            Err(StoneError::ParameterOutOfRange(_))
        ));

        let log = Log::default();
        machine.schedule(step("a", &log, false)).unwrap();
        machine.start().unwrap();
        assert!(matches!(
            machine.set_simultaneous_downloads(2),
            Err(StoneError::BadSequenceOfCalls(_))
        ));
        assert!(matches!(machine.start(), Err(StoneError::BadSequenceOfCalls(_))));

        finish_all(&context);
        assert!(machine.set_simultaneous_downloads(2).is_ok());
    }

    #[test]
    fn download_cap_comes_from_configuration() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        machine
            .apply_config(&StateMachineConfig {
                simultaneous_downloads: 3,
            })
            .unwrap();

        let log = Log::default();
        for name in ["a", "b", "c", "d"] {
            machine.schedule(step(name, &log, false)).unwrap();
        }
        machine.start().unwrap();
        assert_eq!(machine.active_count(), 3);
        assert_eq!(machine.pending_count(), 1);
    }

    #[test]
    fn scheduling_while_active_submits_immediately() {
        let context = context();
        let machine = LoaderStateMachine::create(&context);
        let log = Log::default();
        machine.schedule(step("a", &log, false)).unwrap();
        machine.start().unwrap();
        machine.schedule(step("b", &log, false)).unwrap();
        assert_eq!(context.oracle().caller_names(), vec!["a", "b"]);
    }
}
