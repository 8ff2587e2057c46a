//! Session store port.
//!
//! Persists users, sessions, transcript messages and evaluations.
//!
//! # Design
//!
//! - **One open session per user**: `create_session` fails with `Conflict`
//!   while another session of the same user is open
//! - **Gap-free sequences**: `append_messages` assigns `seq = max + 1, ...`
//!   to the whole batch atomically; either every message lands or none does
//! - **Write-once evaluations**: `get_or_create_evaluation` returns the
//!   stored row when one already exists
//! - **No closed session without a grade**: `complete_session` closes the
//!   session and stores its evaluation in one step, so a failed write leaves
//!   the session open and the finish can be retried

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::evaluation::Evaluation;
use crate::domain::foundation::{ExternalUserId, SessionId, Timestamp, UserId};
use crate::domain::training::{Message, NewMessage, Session, SessionOutcome, User};

/// Errors raised by a session store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or state constraint violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend unreachable or failed.
    #[error("store unavailable: {0}")]
    ServiceUnavailable(String),
}

impl StoreError {
    /// Creates a not found error for a session.
    pub fn session_not_found(id: &SessionId) -> Self {
        Self::NotFound {
            entity: "session",
            id: id.to_string(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a service unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }
}

/// Persistence port for the training engine.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve a platform identity to an internal user, creating it on first contact.
    async fn get_or_create_user(&self, external_id: &ExternalUserId) -> Result<User, StoreError>;

    /// Persist a newly opened session.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the user already has an open session or the id exists
    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Find a session by id.
    async fn find_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// The user's open session, if any.
    async fn find_open_session_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Session>, StoreError>;

    /// Close an open session and return it in its final state.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session does not exist
    /// - `Conflict` if it is already closed
    async fn close_session(
        &self,
        id: &SessionId,
        outcome: SessionOutcome,
        ended_at: Timestamp,
    ) -> Result<Session, StoreError>;

    /// Append messages in order under the next sequence numbers, atomically.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session does not exist
    /// - `Conflict` if the session is closed or a sequence number is taken
    async fn append_messages(
        &self,
        session_id: &SessionId,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, StoreError>;

    /// The last `limit` messages of a session, oldest first.
    async fn get_recent_messages(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Every message of a session, oldest first.
    async fn get_all_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError>;

    /// The evaluation of a session, if one was stored.
    async fn find_evaluation(&self, session_id: &SessionId)
        -> Result<Option<Evaluation>, StoreError>;

    /// Store `evaluation` unless the session already has one; return the stored row.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session does not exist
    /// - `Conflict` if the session is still open
    async fn get_or_create_evaluation(
        &self,
        evaluation: &Evaluation,
    ) -> Result<Evaluation, StoreError>;

    /// Close the evaluated session as completed and store `evaluation`, atomically.
    ///
    /// Returns the closed session and the stored evaluation. Repeating the
    /// call after success returns the first result unchanged.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session does not exist
    /// - `Conflict` if the session was closed without an evaluation
    async fn complete_session(
        &self,
        evaluation: &Evaluation,
        ended_at: Timestamp,
    ) -> Result<(Session, Evaluation), StoreError>;
}
