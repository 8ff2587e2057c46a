//! In-memory session store.
//!
//! Implements the same contract as the Postgres store, including the
//! one-open-session rule and gap-free sequence assignment. All state lives
//! behind a single lock so multi-row operations are atomic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::evaluation::Evaluation;
use crate::domain::foundation::{ExternalUserId, SessionId, Timestamp, UserId};
use crate::domain::training::{Message, NewMessage, Session, SessionOutcome, User};
use crate::ports::{SessionStore, StoreError};

#[derive(Debug, Default)]
struct StoreState {
    users: HashMap<ExternalUserId, User>,
    next_user_id: i64,
    sessions: HashMap<SessionId, Session>,
    messages: HashMap<SessionId, Vec<Message>>,
    evaluations: HashMap<SessionId, Evaluation>,
}

/// In-memory storage for users, sessions, transcripts and evaluations.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    state: Arc<RwLock<StoreState>>,
    unavailable: Arc<AtomicBool>,
    fail_appends: Arc<AtomicBool>,
    fail_evaluations: Arc<AtomicBool>,
}

impl InMemorySessionStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `ServiceUnavailable` (for tests).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only `append_messages` fail with `ServiceUnavailable` (for tests).
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make evaluation writes fail with `ServiceUnavailable` (for tests).
    pub fn set_fail_evaluations(&self, fail: bool) {
        self.fail_evaluations.store(fail, Ordering::SeqCst);
    }

    /// Number of stored sessions.
    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Number of stored evaluations.
    pub async fn evaluation_count(&self) -> usize {
        self.state.read().await.evaluations.len()
    }

    /// Every session of a user, oldest first.
    pub async fn sessions_for_user(&self, user_id: UserId) -> Vec<Session> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id() == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| *s.created_at());
        sessions
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory store switched off"));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create_user(&self, external_id: &ExternalUserId) -> Result<User, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if let Some(user) = state.users.get(external_id) {
            return Ok(user.clone());
        }

        state.next_user_id += 1;
        let user = User {
            id: UserId::new(state.next_user_id),
            external_id: external_id.clone(),
            created_at: Timestamp::now(),
        };
        state.users.insert(external_id.clone(), user.clone());
        Ok(user)
    }

    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;

        if state.sessions.contains_key(&session.id()) {
            return Err(StoreError::conflict(format!(
                "session {} already exists",
                session.id()
            )));
        }
        let has_open = state
            .sessions
            .values()
            .any(|s| s.user_id() == session.user_id() && s.is_open());
        if session.is_open() && has_open {
            return Err(StoreError::conflict(format!(
                "user {} already has an open session",
                session.user_id()
            )));
        }

        state.sessions.insert(session.id(), session.clone());
        state.messages.insert(session.id(), Vec::new());
        Ok(())
    }

    async fn find_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn find_open_session_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Session>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.user_id() == user_id && s.is_open())
            .cloned())
    }

    async fn close_session(
        &self,
        id: &SessionId,
        outcome: SessionOutcome,
        ended_at: Timestamp,
    ) -> Result<Session, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::session_not_found(id))?;

        session
            .close(outcome, ended_at)
            .map_err(|e| StoreError::conflict(e.message))?;
        Ok(session.clone())
    }

    async fn append_messages(
        &self,
        session_id: &SessionId,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("append failed"));
        }

        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get(session_id)
            .ok_or_else(|| StoreError::session_not_found(session_id))?;
        if !session.is_open() {
            return Err(StoreError::conflict(format!(
                "session {} is closed",
                session_id
            )));
        }

        let transcript = state.messages.entry(*session_id).or_default();
        let mut next_seq = transcript.last().map_or(0, |m| m.seq) + 1;
        let now = Timestamp::now();

        let appended: Vec<Message> = messages
            .into_iter()
            .map(|m| {
                let message = Message {
                    session_id: *session_id,
                    role: m.role,
                    content: m.content,
                    seq: next_seq,
                    created_at: now,
                };
                next_seq += 1;
                message
            })
            .collect();

        transcript.extend(appended.iter().cloned());
        Ok(appended)
    }

    async fn get_recent_messages(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let transcript = state
            .messages
            .get(session_id)
            .ok_or_else(|| StoreError::session_not_found(session_id))?;
        let start = transcript.len().saturating_sub(limit);
        Ok(transcript[start..].to_vec())
    }

    async fn get_all_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        state
            .messages
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::session_not_found(session_id))
    }

    async fn find_evaluation(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Evaluation>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.evaluations.get(session_id).cloned())
    }

    async fn get_or_create_evaluation(
        &self,
        evaluation: &Evaluation,
    ) -> Result<Evaluation, StoreError> {
        self.check_available()?;
        if self.fail_evaluations.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("evaluation write failed"));
        }
        let mut state = self.state.write().await;
        let session_id = evaluation.session_id;

        let session = state
            .sessions
            .get(&session_id)
            .ok_or_else(|| StoreError::session_not_found(&session_id))?;
        if session.is_open() {
            return Err(StoreError::conflict(format!(
                "session {} is still open",
                session_id
            )));
        }

        Ok(state
            .evaluations
            .entry(session_id)
            .or_insert_with(|| evaluation.clone())
            .clone())
    }

    async fn complete_session(
        &self,
        evaluation: &Evaluation,
        ended_at: Timestamp,
    ) -> Result<(Session, Evaluation), StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let session_id = evaluation.session_id;

        let session = state
            .sessions
            .get(&session_id)
            .ok_or_else(|| StoreError::session_not_found(&session_id))?;
        if let Some(existing) = state.evaluations.get(&session_id) {
            return Ok((session.clone(), existing.clone()));
        }
        if !session.is_open() {
            return Err(StoreError::conflict(format!(
                "session {} was closed without an evaluation",
                session_id
            )));
        }
        if self.fail_evaluations.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("evaluation write failed"));
        }

        let mut closed = session.clone();
        closed
            .close(SessionOutcome::Completed, ended_at)
            .map_err(|e| StoreError::conflict(e.message))?;
        state.sessions.insert(session_id, closed.clone());
        state.evaluations.insert(session_id, evaluation.clone());
        Ok((closed, evaluation.clone()))
    }
}
