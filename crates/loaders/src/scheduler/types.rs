use std::sync::Arc;

use serde::Serialize;
use stone_core::{PRIORITY_HIGH, PRIORITY_LOW};
use stone_messaging::ReceiverHandle;
use stone_oracle::Command;

/// Execution lane of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Lane {
    High,
    Standard,
    Low,
}

impl Lane {
    /// Queue a priority value belongs to.
    pub fn classify(priority: i32) -> Self {
        if priority <= PRIORITY_HIGH {
            Lane::High
        } else if priority >= PRIORITY_LOW {
            Lane::Low
        } else {
            Lane::Standard
        }
    }

    /// Lanes an entry of this queue may run in, in order of preference.
    pub(crate) fn fallbacks(self) -> &'static [Lane] {
        match self {
            Lane::High => &[Lane::High, Lane::Standard, Lane::Low],
            Lane::Standard => &[Lane::Standard, Lane::Low],
            Lane::Low => &[Lane::Low],
        }
    }
}

/// Scheduled and processed command counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub scheduled: u64,
    pub processed: u64,
}

impl Statistics {
    /// Every scheduled command has been processed.
    pub fn is_drained(&self) -> bool {
        self.scheduled == self.processed
    }
}

/// Entry waiting in a priority queue.
pub(crate) struct ScheduledCommand {
    pub receiver: ReceiverHandle,
    pub command: Command,
}

/// Payload attached to the copy handed to the oracle.
pub(crate) struct ActiveCommand {
    pub lane: Lane,
    pub receiver: ReceiverHandle,
    pub original: Arc<Command>,
}

/// Capacity and usage of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct LaneSlots {
    pub max: u32,
    pub active: u32,
}

impl LaneSlots {
    pub fn new(max: u32) -> Self {
        Self { max, active: 0 }
    }

    pub fn has_capacity(&self) -> bool {
        self.active < self.max
    }
}
