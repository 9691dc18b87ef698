use stone_messaging::ReceiverHandle;

use crate::command::Command;

/// Executes commands asynchronously.
///
/// When [`Oracle::schedule`] returns `true`, exactly one success message or
/// [`crate::messages::OracleCommandException`] is eventually emitted to the
/// receiver. `false` means the oracle is not accepting work; the command is
/// dropped.
pub trait Oracle: Send + Sync {
    fn schedule(&self, receiver: ReceiverHandle, command: Command) -> bool;
}
