use serde::Serialize;

use super::types::{Lane, Statistics};

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerMetrics {
    pub active_high: u32,
    pub active_standard: u32,
    pub active_low: u32,
    pub queued_high: usize,
    pub queued_standard: usize,
    pub queued_low: usize,
    pub statistics: Statistics,
}

impl SchedulerMetrics {
    pub fn active(&self, lane: Lane) -> u32 {
        match lane {
            Lane::High => self.active_high,
            Lane::Standard => self.active_standard,
            Lane::Low => self.active_low,
        }
    }

    pub fn queued(&self, lane: Lane) -> usize {
        match lane {
            Lane::High => self.queued_high,
            Lane::Standard => self.queued_standard,
            Lane::Low => self.queued_low,
        }
    }

    pub fn total_queued(&self) -> usize {
        self.queued_high + self.queued_standard + self.queued_low
    }

    pub fn total_active(&self) -> u32 {
        self.active_high + self.active_standard + self.active_low
    }
}
