// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Segment state machine.
//!
//! Tracks which phase of waypoint execution a segment attempt is in, so
//! transitions are explicit and observable through run listeners.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Events that can trigger state transitions in the segment state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Rotate in place towards a waypoint.
    Orient(usize),
    /// Start moving towards a waypoint.
    Approach(usize),
    /// Switch to pulsed steps near the target.
    CloseIn,
    /// Run the waypoint's action handlers.
    RunAction(usize),
    /// A blocking UI state was seen.
    AnomalyDetected,
    AnomalyCleared,
    /// Every waypoint of the segment is done.
    SegmentDone(usize),
    Fail(String),
    Cancel,
    /// Start over, for a retry or the next segment.
    Restart,
}

/// The current state of a segment attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "data")]
pub enum SegmentState {
    #[default]
    Idle,
    Orienting {
        waypoint: usize,
    },
    Approaching {
        waypoint: usize,
    },
    CloseApproach {
        waypoint: usize,
    },
    ActionExecution {
        waypoint: usize,
    },
    AnomalyRecovery {
        resume: Box<SegmentState>,
    },
    SegmentComplete {
        segment: usize,
    },
    Aborted {
        reason: String,
    },
    Cancelled,
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Orienting { waypoint } => write!(f, "Orienting(#{})", waypoint),
            Self::Approaching { waypoint } => write!(f, "Approaching(#{})", waypoint),
            Self::CloseApproach { waypoint } => write!(f, "CloseApproach(#{})", waypoint),
            Self::ActionExecution { waypoint } => write!(f, "ActionExecution(#{})", waypoint),
            Self::AnomalyRecovery { resume } => write!(f, "AnomalyRecovery(<- {})", resume),
            Self::SegmentComplete { segment } => write!(f, "SegmentComplete({})", segment),
            Self::Aborted { reason } => write!(f, "Aborted({})", reason),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl SegmentState {
    /// States in which waypoint work may begin or continue.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Idle
                | Self::Orienting { .. }
                | Self::Approaching { .. }
                | Self::CloseApproach { .. }
                | Self::ActionExecution { .. }
        )
    }

    /// States in which actuation is driving the agent.
    pub fn is_moving(&self) -> bool {
        matches!(
            self,
            Self::Orienting { .. } | Self::Approaching { .. } | Self::CloseApproach { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Cancelled)
    }

    /// Index of the waypoint being worked on, if any.
    pub fn waypoint(&self) -> Option<usize> {
        match self {
            Self::Orienting { waypoint }
            | Self::Approaching { waypoint }
            | Self::CloseApproach { waypoint }
            | Self::ActionExecution { waypoint } => Some(*waypoint),
            Self::AnomalyRecovery { resume } => resume.waypoint(),
            _ => None,
        }
    }
}

/// The segment state machine that manages state transitions.
#[derive(Debug, Clone)]
pub struct SegmentMachine {
    state: SegmentState,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl Default for SegmentMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentMachine {
    pub fn new() -> Self {
        Self {
            state: SegmentState::Idle,
            transition_count: 0,
            last_transition: None,
        }
    }

    pub fn state(&self) -> &SegmentState {
        &self.state
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Process an event and potentially transition to a new state.
    /// Returns true if a transition occurred.
    pub fn process_event(&mut self, event: SegmentEvent) -> bool {
        match self.next_state(event) {
            Some(state) => {
                self.state = state;
                self.transition_count += 1;
                self.last_transition = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    fn next_state(&self, event: SegmentEvent) -> Option<SegmentState> {
        match (&self.state, event) {
            (_, SegmentEvent::Restart) => Some(SegmentState::Idle),

            (current, SegmentEvent::Orient(waypoint)) if current.is_active() => {
                Some(SegmentState::Orienting { waypoint })
            }
            (current, SegmentEvent::Approach(waypoint)) if current.is_active() => {
                Some(SegmentState::Approaching { waypoint })
            }
            (SegmentState::Approaching { waypoint }, SegmentEvent::CloseIn) => {
                Some(SegmentState::CloseApproach {
                    waypoint: *waypoint,
                })
            }
            (current, SegmentEvent::RunAction(waypoint)) if current.is_active() => {
                Some(SegmentState::ActionExecution { waypoint })
            }

            (current, SegmentEvent::AnomalyDetected) if current.is_active() => {
                Some(SegmentState::AnomalyRecovery {
                    resume: Box::new(current.clone()),
                })
            }
            (SegmentState::AnomalyRecovery { resume }, SegmentEvent::AnomalyCleared) => {
                Some(*resume.clone())
            }

            (current, SegmentEvent::SegmentDone(segment)) if current.is_active() => {
                Some(SegmentState::SegmentComplete { segment })
            }

            (current, SegmentEvent::Cancel) if !current.is_terminal() => {
                Some(SegmentState::Cancelled)
            }
            (current, SegmentEvent::Fail(reason)) if !current.is_terminal() => {
                Some(SegmentState::Aborted { reason })
            }

            // Invalid transition - stay in current state
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = SegmentMachine::new();
        assert_eq!(sm.state(), &SegmentState::Idle);
        assert_eq!(sm.transition_count(), 0);
    }

    #[test]
    fn test_target_waypoint_lifecycle() {
        let mut sm = SegmentMachine::new();
        assert!(sm.process_event(SegmentEvent::Approach(0)));
        assert!(sm.state().is_moving());
        assert!(sm.process_event(SegmentEvent::CloseIn));
        assert_eq!(sm.state(), &SegmentState::CloseApproach { waypoint: 0 });
        assert!(sm.process_event(SegmentEvent::RunAction(0)));
        assert!(sm.process_event(SegmentEvent::Orient(1)));
        assert!(sm.process_event(SegmentEvent::SegmentDone(3)));
        assert_eq!(sm.state(), &SegmentState::SegmentComplete { segment: 3 });
        assert_eq!(sm.transition_count(), 5);
    }

    #[test]
    fn test_anomaly_resumes_previous_state() {
        let mut sm = SegmentMachine::new();
        sm.process_event(SegmentEvent::Approach(2));
        assert!(sm.process_event(SegmentEvent::AnomalyDetected));
        assert_eq!(sm.state().waypoint(), Some(2));
        assert!(sm.process_event(SegmentEvent::AnomalyCleared));
        assert_eq!(sm.state(), &SegmentState::Approaching { waypoint: 2 });
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut sm = SegmentMachine::new();
        sm.process_event(SegmentEvent::Approach(0));
        assert!(sm.process_event(SegmentEvent::Cancel));
        assert!(sm.state().is_terminal());
        assert!(!sm.process_event(SegmentEvent::Fail("late".into())));
        assert!(!sm.process_event(SegmentEvent::Approach(1)));
        assert_eq!(sm.state(), &SegmentState::Cancelled);
        assert!(sm.process_event(SegmentEvent::Restart));
        assert_eq!(sm.state(), &SegmentState::Idle);
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = SegmentMachine::new();
        assert!(!sm.process_event(SegmentEvent::CloseIn));
        assert!(!sm.process_event(SegmentEvent::AnomalyCleared));
        assert_eq!(sm.state(), &SegmentState::Idle);
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_string(&SegmentState::Approaching { waypoint: 4 }).unwrap();
        assert_eq!(json, r#"{"state":"Approaching","data":{"waypoint":4}}"#);
    }
}
