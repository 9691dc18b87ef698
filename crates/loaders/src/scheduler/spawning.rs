use std::sync::Arc;

use stone_messaging::ReceiverHandle;
use stone_oracle::Command;
use tracing::{debug, warn};

use super::core::{OracleScheduler, SchedulerState};
use super::types::{ActiveCommand, Lane, ScheduledCommand};

enum NextStep {
    /// A lane slot was reserved for this entry.
    Spawn(Lane, ScheduledCommand),
    /// The receiver is gone; the entry was counted as processed.
    Zombie(ScheduledCommand),
    Idle,
}

impl SchedulerState {
    /// Pop the next entry that may start, reserving its lane slot.
    ///
    /// Queues are served high, standard, low. An entry runs in the first lane
    /// of its fallback list with a free slot; if none is free, nothing else
    /// can start either.
    fn next_step(&mut self) -> NextStep {
        for queue in [Lane::High, Lane::Standard, Lane::Low] {
            if self.queue(queue).is_empty() {
                continue;
            }

            let Some(lane) = queue
                .fallbacks()
                .iter()
                .copied()
                .find(|lane| self.slots(*lane).has_capacity())
            else {
                return NextStep::Idle;
            };

            let Some((_, entry)) = self.queue_mut(queue).pop_first() else {
                continue;
            };

            if !entry.receiver.is_alive() {
                self.statistics.processed += 1;
                return NextStep::Zombie(entry);
            }

            self.slots_mut(lane).active += 1;
            return NextStep::Spawn(lane, entry);
        }
        NextStep::Idle
    }
}

impl OracleScheduler {
    /// Start queued commands until no lane can take more.
    pub(crate) fn spawn_commands(&self) {
        loop {
            let step = self.state.lock().next_step();
            match step {
                NextStep::Idle => return,
                NextStep::Zombie(entry) => {
                    debug!(kind = %entry.command.kind(), "receiver is gone, queued command dropped");
                }
                NextStep::Spawn(lane, entry) => self.spawn(lane, entry),
            }
        }
    }

    fn spawn(&self, lane: Lane, entry: ScheduledCommand) {
        let ScheduledCommand { receiver, command } = entry;
        let kind = command.kind();
        let wrapped = wrap_command(lane, receiver, command);

        if self.oracle.schedule(self.self_handle.clone(), wrapped) {
            debug!(lane = ?lane, kind = %kind, "command spawned");
        } else {
            warn!(lane = ?lane, kind = %kind, "oracle refused the command, counted as processed");
            let mut state = self.state.lock();
            let slots = state.slots_mut(lane);
            slots.active = slots.active.saturating_sub(1);
            state.statistics.processed += 1;
        }
    }
}

/// Copy of `command` carrying the bookkeeping needed on completion. The
/// original, with the producer's payload, travels inside.
fn wrap_command(lane: Lane, receiver: ReceiverHandle, command: Command) -> Command {
    let copy = command.clone_without_payload();
    copy.with_payload(ActiveCommand {
        lane,
        receiver,
        original: Arc::new(command),
    })
}
