//! Pure event dispatch.
//!
//! Maps `(current phase, incoming event)` to the action the engine must
//! perform and the phase it lands in when that action succeeds. No I/O
//! happens here; the orchestrator executes the returned action.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::SessionPhase;

/// An inbound event from the transport, already authorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    /// Show the scenario menu, abandoning any open session.
    Start,
    /// Pick a scenario from the menu.
    ScenarioSelected { key: String },
    /// Say something to the counterpart.
    Turn { text: String },
    /// End the dialogue and request an evaluation.
    Finish,
}

impl UserEvent {
    /// Discriminant without payload.
    pub fn kind(&self) -> EventKind {
        match self {
            UserEvent::Start => EventKind::Start,
            UserEvent::ScenarioSelected { .. } => EventKind::ScenarioSelected,
            UserEvent::Turn { .. } => EventKind::Turn,
            UserEvent::Finish => EventKind::Finish,
        }
    }
}

/// Event discriminant, used for logging and rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    ScenarioSelected,
    Turn,
    Finish,
    /// Operator request for a scripted reply; handled outside `dispatch`.
    SuggestReply,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Start => "start",
            EventKind::ScenarioSelected => "scenario_selected",
            EventKind::Turn => "turn",
            EventKind::Finish => "finish",
            EventKind::SuggestReply => "suggest_reply",
        };
        write!(f, "{}", s)
    }
}

/// Work the orchestrator performs for an accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Present the scenario menu.
    ShowMenu,
    /// Mark the open session abandoned, then present the menu.
    AbandonAndShowMenu,
    /// Create a session for the scenario and generate the opening line.
    OpenSession { key: String },
    /// A repeated selection while already in a dialogue. Accepted only as a
    /// no-op for the same scenario before any trainee turn.
    RepeatSelection { key: String },
    /// Run one dialogue turn.
    Turn { text: String },
    /// Close the session and grade it.
    Finish,
}

/// Accepted event: what to do and where the user ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub action: Action,
    pub next: SessionPhase,
}

/// Rejected event: illegal in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event '{event}' is not allowed in phase {phase}")]
pub struct PhaseConflict {
    pub phase: SessionPhase,
    pub event: EventKind,
}

impl PhaseConflict {
    /// Human-readable reason for the transport.
    pub fn reason(&self) -> &'static str {
        match (self.phase, self.event) {
            (SessionPhase::InDialog, EventKind::ScenarioSelected) => {
                "A dialogue is already in progress. Send /start to pick a different scenario."
            }
            (SessionPhase::AwaitingScenario, EventKind::Turn | EventKind::Finish) => {
                "Please choose a scenario first."
            }
            (SessionPhase::Finished, EventKind::Turn | EventKind::Finish) => {
                "This dialogue has already finished. Send /start to begin a new one."
            }
            (_, EventKind::ScenarioSelected) => "Send /start to see the scenario menu first.",
            _ => "There is no dialogue in progress. Send /start to begin.",
        }
    }
}

/// Decides how to handle `event` given the user's `phase`.
pub fn dispatch(phase: SessionPhase, event: &UserEvent) -> Result<Transition, PhaseConflict> {
    use SessionPhase::*;

    let (action, next) = match (phase, event) {
        (InDialog, UserEvent::Start) => (Action::AbandonAndShowMenu, AwaitingScenario),
        (Idle | AwaitingScenario | Finished, UserEvent::Start) => (Action::ShowMenu, AwaitingScenario),

        (AwaitingScenario, UserEvent::ScenarioSelected { key }) => {
            (Action::OpenSession { key: key.clone() }, InDialog)
        }
        (InDialog, UserEvent::ScenarioSelected { key }) => {
            (Action::RepeatSelection { key: key.clone() }, InDialog)
        }

        (InDialog, UserEvent::Turn { text }) => (Action::Turn { text: text.clone() }, InDialog),
        (InDialog, UserEvent::Finish) => (Action::Finish, Finished),

        (Idle | Finished, UserEvent::ScenarioSelected { .. })
        | (Idle | AwaitingScenario | Finished, UserEvent::Turn { .. })
        | (Idle | AwaitingScenario | Finished, UserEvent::Finish) => {
            return Err(PhaseConflict {
                phase,
                event: event.kind(),
            })
        }
    };

    Ok(Transition { action, next })
}
