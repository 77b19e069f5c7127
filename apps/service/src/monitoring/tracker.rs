//! Consecutive-failure bookkeeping per endpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use super::types::ProbeOutcome;

/// Consecutive non-ok results and whether this streak already alerted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureStreak {
    pub count: u32,
    pub alerted: bool,
}

/// What a recorded outcome did to the streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakChange {
    /// Nothing worth reporting
    None,
    /// The streak just reached the threshold
    Alert { streak: u32 },
    /// An ok result ended a streak that had alerted
    Recovered { streak: u32 },
}

pub struct FailureTracker {
    threshold: u32,
    streaks: Mutex<HashMap<i64, FailureStreak>>,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self { threshold: threshold.max(1), streaks: Mutex::new(HashMap::new()) }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record one outcome; returns `true` exactly once per streak, when it
    /// first reaches the threshold.
    pub fn record(&self, endpoint_id: i64, outcome: ProbeOutcome) -> bool {
        matches!(self.observe(endpoint_id, outcome), StreakChange::Alert { .. })
    }

    /// Like [`record`](Self::record) but also reports recoveries
    pub fn observe(&self, endpoint_id: i64, outcome: ProbeOutcome) -> StreakChange {
        let mut streaks = self.streaks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if outcome.is_ok() {
            return match streaks.remove(&endpoint_id) {
                Some(previous) if previous.alerted => StreakChange::Recovered { streak: previous.count },
                _ => StreakChange::None,
            };
        }

        let streak = streaks.entry(endpoint_id).or_default();
        streak.count = streak.count.saturating_add(1);
        if streak.count >= self.threshold && !streak.alerted {
            streak.alerted = true;
            return StreakChange::Alert { streak: streak.count };
        }
        StreakChange::None
    }

    pub fn streak(&self, endpoint_id: i64) -> FailureStreak {
        let streaks = self.streaks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        streaks.get(&endpoint_id).copied().unwrap_or_default()
    }

    /// Drop bookkeeping for an endpoint that is no longer monitored
    pub fn forget(&self, endpoint_id: i64) {
        let mut streaks = self.streaks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        streaks.remove(&endpoint_id);
    }
}
