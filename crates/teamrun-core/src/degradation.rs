//! Run degradation policy.
//!
//! Turns repeated dispatch failures into a status transition. The policy is a
//! pure function of the failure history it is fed; it never looks at a clock
//! itself, callers pass the time of each failure.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::status::RunStatus;

/// Failure thresholds of the degradation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationThresholds {
    /// Consecutive coordinator-route failures that qualify.
    pub coordinator_failure_threshold: u32,

    /// Failures on any route within the window that qualify.
    pub global_failure_threshold: u32,

    /// Sliding window for the global failure count (milliseconds).
    pub global_failure_window_ms: i64,
}

impl Default for DegradationThresholds {
    fn default() -> Self {
        Self {
            coordinator_failure_threshold: 1,
            global_failure_threshold: 3,
            global_failure_window_ms: 60_000,
        }
    }
}

/// Per-run failure counters, owned next to the run record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDegradationState {
    pub consecutive_coordinator_failures: u32,
    pub recent_global_failure_timestamps: VecDeque<i64>,
}

/// What the orchestrator should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationAction {
    None,
    Degrade,
    AutoStop,
}

/// Failure-counting policy shared by all runs of an orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunDegradationPolicy {
    thresholds: DegradationThresholds,
}

impl RunDegradationPolicy {
    pub fn new(thresholds: DegradationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &DegradationThresholds {
        &self.thresholds
    }

    /// Record one failed dispatch and decide the run's fate.
    pub fn record_failure(
        &self,
        state: &mut RunDegradationState,
        is_coordinator_route: bool,
        current_status: RunStatus,
        now_ms: i64,
    ) -> DegradationAction {
        if is_coordinator_route {
            state.consecutive_coordinator_failures =
                state.consecutive_coordinator_failures.saturating_add(1);
        }

        let window_start = now_ms - self.thresholds.global_failure_window_ms;
        state.recent_global_failure_timestamps.push_back(now_ms);
        while let Some(&oldest) = state.recent_global_failure_timestamps.front() {
            if oldest >= window_start {
                break;
            }
            state.recent_global_failure_timestamps.pop_front();
        }

        let coordinator_tripped = is_coordinator_route
            && state.consecutive_coordinator_failures
                >= self.thresholds.coordinator_failure_threshold;
        let global_tripped = state.recent_global_failure_timestamps.len()
            >= self.thresholds.global_failure_threshold as usize;

        if !coordinator_tripped && !global_tripped {
            return DegradationAction::None;
        }

        match current_status {
            RunStatus::Degraded => DegradationAction::AutoStop,
            _ => DegradationAction::Degrade,
        }
    }

    /// Record a successful dispatch. Only the coordinator streak resets.
    pub fn record_success(&self, state: &mut RunDegradationState) {
        state.consecutive_coordinator_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_failure_degrades_then_auto_stops() {
        let policy = RunDegradationPolicy::default();
        let mut state = RunDegradationState::default();

        let first = policy.record_failure(&mut state, true, RunStatus::Active, 1_000);
        assert_eq!(first, DegradationAction::Degrade);

        let second = policy.record_failure(&mut state, true, RunStatus::Degraded, 2_000);
        assert_eq!(second, DegradationAction::AutoStop);
    }

    #[test]
    fn test_success_resets_coordinator_streak_only() {
        let policy = RunDegradationPolicy::new(DegradationThresholds {
            coordinator_failure_threshold: 2,
            global_failure_threshold: 10,
            global_failure_window_ms: 60_000,
        });
        let mut state = RunDegradationState::default();

        assert_eq!(
            policy.record_failure(&mut state, true, RunStatus::Active, 0),
            DegradationAction::None
        );
        policy.record_success(&mut state);
        assert_eq!(state.consecutive_coordinator_failures, 0);
        assert_eq!(state.recent_global_failure_timestamps.len(), 1);

        assert_eq!(
            policy.record_failure(&mut state, true, RunStatus::Active, 10),
            DegradationAction::None
        );
        assert_eq!(
            policy.record_failure(&mut state, true, RunStatus::Active, 20),
            DegradationAction::Degrade
        );
    }

    #[test]
    fn test_global_window_counts_recent_failures() {
        let policy = RunDegradationPolicy::new(DegradationThresholds {
            coordinator_failure_threshold: 1,
            global_failure_threshold: 3,
            global_failure_window_ms: 1_000,
        });
        let mut state = RunDegradationState::default();

        assert_eq!(
            policy.record_failure(&mut state, false, RunStatus::Active, 0),
            DegradationAction::None
        );
        assert_eq!(
            policy.record_failure(&mut state, false, RunStatus::Active, 500),
            DegradationAction::None
        );
        // The first failure has left the window.
        assert_eq!(
            policy.record_failure(&mut state, false, RunStatus::Active, 1_600),
            DegradationAction::None
        );
        assert_eq!(state.recent_global_failure_timestamps.len(), 2);
        assert_eq!(
            policy.record_failure(&mut state, false, RunStatus::Active, 1_700),
            DegradationAction::Degrade
        );
    }

    #[test]
    fn test_non_qualifying_failure_on_degraded_run_is_ignored() {
        let policy = RunDegradationPolicy::default();
        let mut state = RunDegradationState::default();
        assert_eq!(
            policy.record_failure(&mut state, false, RunStatus::Degraded, 0),
            DegradationAction::None
        );
    }
}
