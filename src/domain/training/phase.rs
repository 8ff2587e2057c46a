//! Conversation phase of a user.
//!
//! ```text
//! Idle ──start──▶ AwaitingScenario ──scenario_selected──▶ InDialog ──finish──▶ Finished
//!                   ▲      ▲                                  │                    │
//!                   │      └───────────start (abandon)────────┘                    │
//!                   └──────────────────────────start───────────────────────────────┘
//! ```
//!
//! `Finished` is terminal for a given session; the user may start again,
//! which creates a new session id.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::StateMachine;

/// Where a user currently is in the training flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No interaction yet since the process started.
    #[default]
    Idle,
    /// Scenario menu shown, waiting for a selection.
    AwaitingScenario,
    /// A session is open and accepting turns.
    InDialog,
    /// The last session was closed.
    Finished,
}

impl SessionPhase {
    /// Returns true if an open session exists in this phase.
    pub fn has_open_session(&self) -> bool {
        matches!(self, SessionPhase::InDialog)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::AwaitingScenario => "awaiting_scenario",
            SessionPhase::InDialog => "in_dialog",
            SessionPhase::Finished => "finished",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SessionPhase::Idle),
            "awaiting_scenario" => Some(SessionPhase::AwaitingScenario),
            "in_dialog" => Some(SessionPhase::InDialog),
            "finished" => Some(SessionPhase::Finished),
            _ => None,
        }
    }
}

impl StateMachine for SessionPhase {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SessionPhase::*;
        matches!(
            (self, target),
            (Idle, AwaitingScenario)
                | (AwaitingScenario, AwaitingScenario)
                | (AwaitingScenario, InDialog)
                | (InDialog, AwaitingScenario)
                | (InDialog, Finished)
                | (Finished, AwaitingScenario)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SessionPhase::*;
        match self {
            Idle => vec![AwaitingScenario],
            AwaitingScenario => vec![AwaitingScenario, InDialog],
            InDialog => vec![AwaitingScenario, Finished],
            Finished => vec![AwaitingScenario],
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::AwaitingScenario => "AwaitingScenario",
            SessionPhase::InDialog => "InDialog",
            SessionPhase::Finished => "Finished",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionPhase; 4] = [
        SessionPhase::Idle,
        SessionPhase::AwaitingScenario,
        SessionPhase::InDialog,
        SessionPhase::Finished,
    ];

    #[test]
    fn default_is_idle() {
        assert_eq!(SessionPhase::default(), SessionPhase::Idle);
    }

    #[test]
    fn every_phase_can_reach_awaiting_scenario() {
        for phase in ALL {
            assert!(
                phase.can_transition_to(&SessionPhase::AwaitingScenario),
                "{} should allow start",
                phase
            );
        }
    }

    #[test]
    fn dialog_only_entered_from_awaiting_scenario() {
        for phase in ALL {
            let allowed = phase.can_transition_to(&SessionPhase::InDialog);
            assert_eq!(allowed, phase == SessionPhase::AwaitingScenario);
        }
    }

    #[test]
    fn finished_only_entered_from_dialog() {
        for phase in ALL {
            let allowed = phase.can_transition_to(&SessionPhase::Finished);
            assert_eq!(allowed, phase == SessionPhase::InDialog);
        }
    }

    #[test]
    fn no_phase_is_terminal_for_the_user() {
        for phase in ALL {
            assert!(!phase.is_terminal());
        }
    }

    #[test]
    fn can_transition_to_is_consistent_with_valid_transitions() {
        for phase in ALL {
            for target in ALL {
                assert_eq!(
                    phase.can_transition_to(&target),
                    phase.valid_transitions().contains(&target),
                    "{:?} -> {:?}",
                    phase,
                    target
                );
            }
        }
    }

    #[test]
    fn storage_representation_round_trips() {
        for phase in ALL {
            assert_eq!(SessionPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(SessionPhase::parse("paused"), None);
    }

    #[test]
    fn serializes_to_snake_case_json() {
        assert_eq!(
            serde_json::to_string(&SessionPhase::AwaitingScenario).unwrap(),
            "\"awaiting_scenario\""
        );
    }
}
