//! PostgreSQL implementation of SessionStore.
//!
//! Schema lives in `migrations/`. The database enforces the invariants the
//! engine relies on: a partial unique index allows one open session per
//! user, `(session_id, seq)` is unique, and each session has at most one
//! evaluation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::evaluation::{Evaluation, EvaluationStatus};
use crate::domain::foundation::{ExternalUserId, SessionId, Timestamp, UserId};
use crate::domain::scenario::ScenarioKey;
use crate::domain::training::{
    Message, MessageRole, NewMessage, Session, SessionOutcome, SessionPhase, User,
};
use crate::ports::{SessionStore, StoreError};

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL implementation of SessionStore.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    /// Creates a new PostgresSessionStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::unavailable(format!("Failed to run migrations: {}", e)))
    }

    /// Locks the session row and reports whether it is still open.
    async fn lock_session(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        session_id: &SessionId,
        exclusive: bool,
    ) -> Result<bool, StoreError> {
        let query = if exclusive {
            "SELECT ended_at IS NULL AS is_open FROM sessions WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT ended_at IS NULL AS is_open FROM sessions WHERE id = $1 FOR SHARE"
        };

        let row = sqlx::query(query)
            .bind(session_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to lock session", e))?;

        match row {
            Some(row) => get(&row, "is_open"),
            None => Err(StoreError::session_not_found(session_id)),
        }
    }

    async fn insert_evaluation(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        evaluation: &Evaluation,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO evaluations (
                session_id, score, strengths, mistakes, recommendations,
                status, raw_output, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(evaluation.session_id.as_uuid())
        .bind(evaluation.score.map(i16::from))
        .bind(&evaluation.strengths)
        .bind(&evaluation.mistakes)
        .bind(&evaluation.recommendations)
        .bind(evaluation.status.as_str())
        .bind(evaluation.raw_output.as_deref())
        .bind(evaluation.created_at.as_datetime())
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("Failed to insert evaluation", e))?;
        Ok(())
    }

    async fn fetch_evaluation(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        session_id: &SessionId,
    ) -> Result<Option<Evaluation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT session_id, score, strengths, mistakes, recommendations,
                   status, raw_output, created_at
            FROM evaluations
            WHERE session_id = $1
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| db_error("Failed to fetch evaluation", e))?;

        row.map(|r| evaluation_from_row(&r)).transpose()
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn get_or_create_user(&self, external_id: &ExternalUserId) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (external_id)
            VALUES ($1)
            ON CONFLICT (external_id) DO UPDATE SET external_id = EXCLUDED.external_id
            RETURNING id, created_at
            "#,
        )
        .bind(external_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to upsert user", e))?;

        let id: i64 = row.try_get("id").map_err(|e| db_error("Failed to read user", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| db_error("Failed to read user", e))?;

        Ok(User {
            id: UserId::new(id),
            external_id: external_id.clone(),
            created_at: Timestamp::from_datetime(created_at),
        })
    }

    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, scenario_key, phase, outcome, created_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id().as_uuid())
        .bind(session.user_id().value())
        .bind(session.scenario_key().as_str())
        .bind(session.phase().as_str())
        .bind(session.outcome().map(|o| o.as_str()))
        .bind(session.created_at().as_datetime())
        .bind(session.ended_at().map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert session", e))?;

        Ok(())
    }

    async fn find_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, scenario_key, phase, outcome, created_at, ended_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch session", e))?;

        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn find_open_session_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, scenario_key, phase, outcome, created_at, ended_at
            FROM sessions
            WHERE user_id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(user_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch open session", e))?;

        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn close_session(
        &self,
        id: &SessionId,
        outcome: SessionOutcome,
        ended_at: Timestamp,
    ) -> Result<Session, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE sessions SET
                phase = $2,
                outcome = $3,
                ended_at = $4
            WHERE id = $1 AND ended_at IS NULL
            RETURNING id, user_id, scenario_key, phase, outcome, created_at, ended_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(SessionPhase::Finished.as_str())
        .bind(outcome.as_str())
        .bind(ended_at.as_datetime())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to close session", e))?;

        match row {
            Some(row) => session_from_row(&row),
            None => match self.find_session(id).await? {
                Some(_) => Err(StoreError::conflict(format!(
                    "session {} is already closed",
                    id
                ))),
                None => Err(StoreError::session_not_found(id)),
            },
        }
    }

    async fn append_messages(
        &self,
        session_id: &SessionId,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to start transaction", e))?;

        // Row lock serializes concurrent appends to the same session.
        if !Self::lock_session(&mut tx, session_id, true).await? {
            return Err(StoreError::conflict(format!(
                "session {} is closed",
                session_id
            )));
        }

        let last_seq: i32 = sqlx::query(
            "SELECT COALESCE(MAX(seq), 0) AS last_seq FROM messages WHERE session_id = $1",
        )
        .bind(session_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("last_seq"))
        .map_err(|e| db_error("Failed to read last sequence number", e))?;

        let now = Timestamp::now();
        let mut appended = Vec::with_capacity(messages.len());
        for (offset, message) in messages.into_iter().enumerate() {
            let seq = last_seq + 1 + offset as i32;
            sqlx::query(
                r#"
                INSERT INTO messages (session_id, seq, role, content, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(session_id.as_uuid())
            .bind(seq)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(now.as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert message", e))?;

            appended.push(Message {
                session_id: *session_id,
                role: message.role,
                content: message.content,
                seq: seq as u32,
                created_at: now,
            });
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        Ok(appended)
    }

    async fn get_recent_messages(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, seq, role, content, created_at FROM (
                SELECT session_id, seq, role, content, created_at
                FROM messages
                WHERE session_id = $1
                ORDER BY seq DESC
                LIMIT $2
            ) recent
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch recent messages", e))?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_all_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, seq, role, content, created_at
            FROM messages
            WHERE session_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch messages", e))?;

        rows.iter().map(message_from_row).collect()
    }

    async fn find_evaluation(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Evaluation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT session_id, score, strengths, mistakes, recommendations,
                   status, raw_output, created_at
            FROM evaluations
            WHERE session_id = $1
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch evaluation", e))?;

        row.map(|r| evaluation_from_row(&r)).transpose()
    }

    async fn get_or_create_evaluation(
        &self,
        evaluation: &Evaluation,
    ) -> Result<Evaluation, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to start transaction", e))?;

        if Self::lock_session(&mut tx, &evaluation.session_id, false).await? {
            return Err(StoreError::conflict(format!(
                "session {} is still open",
                evaluation.session_id
            )));
        }

        Self::insert_evaluation(&mut tx, evaluation).await?;
        let stored = Self::fetch_evaluation(&mut tx, &evaluation.session_id)
            .await?
            .ok_or_else(|| StoreError::session_not_found(&evaluation.session_id))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        Ok(stored)
    }

    async fn complete_session(
        &self,
        evaluation: &Evaluation,
        ended_at: Timestamp,
    ) -> Result<(Session, Evaluation), StoreError> {
        let session_id = &evaluation.session_id;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to start transaction", e))?;

        if !Self::lock_session(&mut tx, session_id, true).await? {
            let existing = Self::fetch_evaluation(&mut tx, session_id).await?;
            let Some(existing) = existing else {
                return Err(StoreError::conflict(format!(
                    "session {} was closed without an evaluation",
                    session_id
                )));
            };
            let row = sqlx::query(
                r#"
                SELECT id, user_id, scenario_key, phase, outcome, created_at, ended_at
                FROM sessions
                WHERE id = $1
                "#,
            )
            .bind(session_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to fetch session", e))?;
            let session = session_from_row(&row)?;
            tx.commit()
                .await
                .map_err(|e| db_error("Failed to commit transaction", e))?;
            return Ok((session, existing));
        }

        let row = sqlx::query(
            r#"
            UPDATE sessions SET
                phase = $2,
                outcome = $3,
                ended_at = $4
            WHERE id = $1
            RETURNING id, user_id, scenario_key, phase, outcome, created_at, ended_at
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(SessionPhase::Finished.as_str())
        .bind(SessionOutcome::Completed.as_str())
        .bind(ended_at.as_datetime())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to close session", e))?;
        let session = session_from_row(&row)?;

        Self::insert_evaluation(&mut tx, evaluation).await?;
        let stored = Self::fetch_evaluation(&mut tx, session_id)
            .await?
            .ok_or_else(|| StoreError::session_not_found(session_id))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        Ok((session, stored))
    }
}

// ----- Row mapping -----

fn db_error(context: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::conflict(format!("{}: {}", context, db_err))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound {
            entity: "row",
            id: context.to_string(),
        },
        other => StoreError::unavailable(format!("{}: {}", context, other)),
    }
}

fn corrupt(column: &str, value: &str) -> StoreError {
    StoreError::unavailable(format!("invalid {} in database: {}", column, value))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| db_error(&format!("Failed to read column {}", column), e))
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    let id: Uuid = get(row, "id")?;
    let user_id: i64 = get(row, "user_id")?;
    let scenario_key: String = get(row, "scenario_key")?;
    let phase: String = get(row, "phase")?;
    let outcome: Option<String> = get(row, "outcome")?;
    let created_at: DateTime<Utc> = get(row, "created_at")?;
    let ended_at: Option<DateTime<Utc>> = get(row, "ended_at")?;

    let outcome = match outcome {
        Some(o) => Some(SessionOutcome::parse(&o).ok_or_else(|| corrupt("outcome", &o))?),
        None => None,
    };

    Ok(Session::reconstitute(
        SessionId::from_uuid(id),
        UserId::new(user_id),
        ScenarioKey::new(scenario_key.clone()).map_err(|_| corrupt("scenario_key", &scenario_key))?,
        SessionPhase::parse(&phase).ok_or_else(|| corrupt("phase", &phase))?,
        outcome,
        Timestamp::from_datetime(created_at),
        ended_at.map(Timestamp::from_datetime),
    ))
}

fn message_from_row(row: &PgRow) -> Result<Message, StoreError> {
    let session_id: Uuid = get(row, "session_id")?;
    let seq: i32 = get(row, "seq")?;
    let role: String = get(row, "role")?;
    let content: String = get(row, "content")?;
    let created_at: DateTime<Utc> = get(row, "created_at")?;

    Ok(Message {
        session_id: SessionId::from_uuid(session_id),
        role: MessageRole::parse(&role).ok_or_else(|| corrupt("role", &role))?,
        content,
        seq: u32::try_from(seq).map_err(|_| corrupt("seq", &seq.to_string()))?,
        created_at: Timestamp::from_datetime(created_at),
    })
}

fn evaluation_from_row(row: &PgRow) -> Result<Evaluation, StoreError> {
    let session_id: Uuid = get(row, "session_id")?;
    let score: Option<i16> = get(row, "score")?;
    let status: String = get(row, "status")?;
    let created_at: DateTime<Utc> = get(row, "created_at")?;

    let score = match score {
        Some(s) => Some(u8::try_from(s).map_err(|_| corrupt("score", &s.to_string()))?),
        None => None,
    };

    Ok(Evaluation {
        session_id: SessionId::from_uuid(session_id),
        score,
        strengths: get(row, "strengths")?,
        mistakes: get(row, "mistakes")?,
        recommendations: get(row, "recommendations")?,
        status: EvaluationStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        raw_output: get(row, "raw_output")?,
        created_at: Timestamp::from_datetime(created_at),
    })
}
