//! Recording oracle for tests: keeps submitted commands until the test
//! completes them explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use stone_core::OracleException;
use stone_messaging::{Message, MessageEmitter, ReceiverHandle};

use crate::command::{Command, CommandKind};
use crate::messages::{OracleCommandException, ReadFileSuccess, SleepTimeout};
use crate::oracle::Oracle;

/// A command accepted by [`RecordingOracle`].
pub struct Submission {
    pub receiver: ReceiverHandle,
    pub command: Arc<Command>,
}

pub struct RecordingOracle {
    emitter: Arc<dyn MessageEmitter>,
    submissions: Mutex<Vec<Submission>>,
    accepting: AtomicBool,
}

impl RecordingOracle {
    pub fn new(emitter: Arc<dyn MessageEmitter>) -> Self {
        Self {
            emitter,
            submissions: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Make `schedule` return `false` from now on.
    pub fn refuse(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.submissions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Caller names of the pending submissions, oldest first.
    pub fn caller_names(&self) -> Vec<String> {
        self.submissions
            .lock()
            .iter()
            .map(|s| s.command.caller_name().to_string())
            .collect()
    }

    pub fn kinds(&self) -> Vec<CommandKind> {
        self.submissions.lock().iter().map(|s| s.command.kind()).collect()
    }

    /// Remove the oldest submission.
    pub fn take_next(&self) -> Option<Submission> {
        let mut submissions = self.submissions.lock();
        (!submissions.is_empty()).then(|| submissions.remove(0))
    }

    /// Remove the submission whose command has the given caller name.
    pub fn take_by_caller(&self, caller_name: &str) -> Option<Submission> {
        let mut submissions = self.submissions.lock();
        let index = submissions
            .iter()
            .position(|s| s.command.caller_name() == caller_name)?;
        Some(submissions.remove(index))
    }

    /// Emit `message` for `submission`. The lock is not held while emitting.
    pub fn complete(&self, submission: &Submission, message: &dyn Message) {
        self.emitter.emit_message(&submission.receiver, message);
    }

    /// Complete with the success message matching sleep / read-file commands.
    pub fn succeed(&self, submission: Submission) {
        let origin = Arc::clone(&submission.command);
        match origin.kind() {
            CommandKind::Sleep => self.complete(&submission, &SleepTimeout { origin }),
            _ => self.complete(
                &submission,
                &ReadFileSuccess {
                    origin,
                    content: Bytes::new(),
                },
            ),
        }
    }

    pub fn fail(&self, submission: Submission, exception: OracleException) {
        let message = OracleCommandException {
            origin: Arc::clone(&submission.command),
            exception,
        };
        self.complete(&submission, &message);
    }
}

impl Oracle for RecordingOracle {
    fn schedule(&self, receiver: ReceiverHandle, command: Command) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.submissions.lock().push(Submission {
            receiver,
            command: Arc::new(command),
        });
        true
    }
}
