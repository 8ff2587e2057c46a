//! Session aggregate.
//!
//! A session is one user's run through a scenario, from selection to
//! finish or abandonment. Sessions are created directly in `InDialog`
//! and close exactly once.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::SessionPhase;
use crate::domain::foundation::{DomainError, ErrorCode, SessionId, StateMachine, Timestamp, UserId};
use crate::domain::scenario::ScenarioKey;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Closed through `finish`; an evaluation follows.
    Completed,
    /// Replaced by a new `start`; no evaluation is produced.
    Abandoned,
}

impl SessionOutcome {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Abandoned => "abandoned",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(SessionOutcome::Completed),
            "abandoned" => Some(SessionOutcome::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session aggregate.
///
/// # Invariants
///
/// - `phase` is `InDialog` while open and `Finished` once closed
/// - `ended_at` and `outcome` are set exactly when `phase == Finished`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user_id: UserId,
    scenario_key: ScenarioKey,
    phase: SessionPhase,
    outcome: Option<SessionOutcome>,
    created_at: Timestamp,
    ended_at: Option<Timestamp>,
}

impl Session {
    /// Opens a new session for a user.
    pub fn open(user_id: UserId, scenario_key: ScenarioKey) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            scenario_key,
            phase: SessionPhase::InDialog,
            outcome: None,
            created_at: Timestamp::now(),
            ended_at: None,
        }
    }

    /// Reconstitute a session from persistence (no validation).
    pub fn reconstitute(
        id: SessionId,
        user_id: UserId,
        scenario_key: ScenarioKey,
        phase: SessionPhase,
        outcome: Option<SessionOutcome>,
        created_at: Timestamp,
        ended_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id,
            user_id,
            scenario_key,
            phase,
            outcome,
            created_at,
            ended_at,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn scenario_key(&self) -> &ScenarioKey {
        &self.scenario_key
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome
    }

    pub fn created_at(&self) -> &Timestamp {
        &self.created_at
    }

    pub fn ended_at(&self) -> Option<&Timestamp> {
        self.ended_at.as_ref()
    }

    /// Returns true while the session accepts turns.
    pub fn is_open(&self) -> bool {
        self.phase == SessionPhase::InDialog
    }

    /// Returns true if the session was abandoned.
    pub fn is_abandoned(&self) -> bool {
        self.outcome == Some(SessionOutcome::Abandoned)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Closes the session with the given outcome.
    ///
    /// # Errors
    ///
    /// - `InvalidStateTransition` if the session is already finished
    pub fn close(&mut self, outcome: SessionOutcome, at: Timestamp) -> Result<(), DomainError> {
        self.phase = self
            .phase
            .transition_to(SessionPhase::Finished)
            .map_err(|e| e.with_detail("session_id", self.id.to_string()))?;
        self.outcome = Some(outcome);
        self.ended_at = Some(at);
        Ok(())
    }

    /// Validates that the session still accepts turns.
    pub fn ensure_open(&self) -> Result<(), DomainError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DomainError::new(
                ErrorCode::SessionFinished,
                format!("Session {} is already finished", self.id),
            ))
        }
    }
}
