use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use stone_core::config::SchedulerConfig;
use stone_core::StoneError;
use stone_messaging::{MessageEmitter, Observable, ReceiverHandle};
use stone_oracle::{Command, Oracle};
use tracing::{debug, info};

use super::metrics::SchedulerMetrics;
use super::types::{Lane, LaneSlots, ScheduledCommand, Statistics};

/// Queue key: priority first, then submission order.
pub(crate) type QueueKey = (i32, u64);

pub(crate) struct SchedulerState {
    high_queue: BTreeMap<QueueKey, ScheduledCommand>,
    standard_queue: BTreeMap<QueueKey, ScheduledCommand>,
    low_queue: BTreeMap<QueueKey, ScheduledCommand>,
    high: LaneSlots,
    standard: LaneSlots,
    low: LaneSlots,
    next_sequence: u64,
    pub statistics: Statistics,
}

impl SchedulerState {
    fn new(max_high: u32, max_standard: u32, max_low: u32) -> Self {
        Self {
            high_queue: BTreeMap::new(),
            standard_queue: BTreeMap::new(),
            low_queue: BTreeMap::new(),
            high: LaneSlots::new(max_high),
            standard: LaneSlots::new(max_standard),
            low: LaneSlots::new(max_low),
            next_sequence: 0,
            statistics: Statistics::default(),
        }
    }

    pub fn queue(&self, lane: Lane) -> &BTreeMap<QueueKey, ScheduledCommand> {
        match lane {
            Lane::High => &self.high_queue,
            Lane::Standard => &self.standard_queue,
            Lane::Low => &self.low_queue,
        }
    }

    pub fn queue_mut(&mut self, lane: Lane) -> &mut BTreeMap<QueueKey, ScheduledCommand> {
        match lane {
            Lane::High => &mut self.high_queue,
            Lane::Standard => &mut self.standard_queue,
            Lane::Low => &mut self.low_queue,
        }
    }

    pub fn slots(&self, lane: Lane) -> &LaneSlots {
        match lane {
            Lane::High => &self.high,
            Lane::Standard => &self.standard,
            Lane::Low => &self.low,
        }
    }

    pub fn slots_mut(&mut self, lane: Lane) -> &mut LaneSlots {
        match lane {
            Lane::High => &mut self.high,
            Lane::Standard => &mut self.standard,
            Lane::Low => &mut self.low,
        }
    }

    /// Remove every queued entry matching `predicate` and count it processed.
    fn drain_matching(&mut self, predicate: impl Fn(&ScheduledCommand) -> bool) -> Vec<ScheduledCommand> {
        let mut removed = Vec::new();
        for lane in [Lane::High, Lane::Standard, Lane::Low] {
            let queue = self.queue_mut(lane);
            let (cancelled, kept): (BTreeMap<_, _>, BTreeMap<_, _>) =
                std::mem::take(queue).into_iter().partition(|(_, entry)| predicate(entry));
            *queue = kept;
            removed.extend(cancelled.into_values());
        }
        self.statistics.processed += removed.len() as u64;
        removed
    }

    fn metrics(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            active_high: self.high.active,
            active_standard: self.standard.active,
            active_low: self.low.active,
            queued_high: self.high_queue.len(),
            queued_standard: self.standard_queue.len(),
            queued_low: self.low_queue.len(),
            statistics: self.statistics,
        }
    }
}

/// Bounded-concurrency dispatcher in front of an oracle.
///
/// Never holds its state lock while calling the oracle or emitting a
/// message, so completions may re-enter it from any thread.
pub struct OracleScheduler {
    pub(crate) oracle: Arc<dyn Oracle>,
    pub(crate) emitter: Arc<dyn MessageEmitter>,
    /// Receiver of the wrapped commands handed to the oracle.
    pub(crate) self_handle: ReceiverHandle,
    pub(crate) state: Mutex<SchedulerState>,
}

impl OracleScheduler {
    /// Build a scheduler and register its completion handlers on `observable`.
    ///
    /// `emitter` delivers unwrapped results to the original receivers.
    /// `max_low == 0` is `ParameterOutOfRange`: overflowing commands need a lane.
    pub fn create(
        oracle: Arc<dyn Oracle>,
        observable: &Observable,
        emitter: Arc<dyn MessageEmitter>,
        max_high: u32,
        max_standard: u32,
        max_low: u32,
    ) -> Result<Arc<Self>, StoneError> {
        if max_low == 0 {
            return Err(StoneError::ParameterOutOfRange(
                "the low priority lane needs at least one slot".into(),
            ));
        }

        let scheduler = Arc::new_cyclic(|weak| Self {
            oracle,
            emitter,
            self_handle: ReceiverHandle::from_weak(weak.clone()),
            state: Mutex::new(SchedulerState::new(max_high, max_standard, max_low)),
        });
        scheduler.register_handlers(observable);

        info!(max_high, max_standard, max_low, "oracle scheduler created");
        Ok(scheduler)
    }

    pub fn from_config(
        oracle: Arc<dyn Oracle>,
        observable: &Observable,
        emitter: Arc<dyn MessageEmitter>,
        config: &SchedulerConfig,
    ) -> Result<Arc<Self>, StoneError> {
        Self::create(
            oracle,
            observable,
            emitter,
            config.max_high,
            config.max_standard,
            config.max_low,
        )
    }

    /// Queue `command` for `receiver` and start as much queued work as the
    /// lanes allow. Lower values are more urgent.
    pub fn schedule(&self, receiver: ReceiverHandle, priority: i32, command: Command) {
        let queue = Lane::classify(priority);
        let kind = command.kind();
        {
            let mut state = self.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state
                .queue_mut(queue)
                .insert((priority, sequence), ScheduledCommand { receiver, command });
            state.statistics.scheduled += 1;
        }
        debug!(priority, queue = ?queue, kind = %kind, "command scheduled");
        self.spawn_commands();
    }

    /// Drop the queued commands of `receiver`. Commands already handed to
    /// the oracle still complete and are delivered.
    pub fn cancel_requests(&self, receiver: &ReceiverHandle) {
        let removed = self
            .state
            .lock()
            .drain_matching(|entry| entry.receiver.is_same(receiver));
        if !removed.is_empty() {
            debug!(count = removed.len(), "cancelled queued commands of receiver");
        }
    }

    /// Drop every queued command.
    pub fn cancel_all_requests(&self) {
        let removed = self.state.lock().drain_matching(|_| true);
        if !removed.is_empty() {
            debug!(count = removed.len(), "cancelled all queued commands");
        }
    }

    pub fn statistics(&self) -> Statistics {
        self.state.lock().statistics
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.state.lock().metrics()
    }
}

impl Drop for OracleScheduler {
    fn drop(&mut self) {
        let removed = self.state.get_mut().drain_matching(|_| true);
        if !removed.is_empty() {
            debug!(count = removed.len(), "scheduler dropped with queued commands");
        }
    }
}
