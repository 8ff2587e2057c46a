//! Judge: grades a session against the sales rubric and closes it.
//!
//! A model failure never blocks closure: failures and unparseable output
//! both produce an ungraded evaluation that keeps whatever text exists.
//! The session is closed in the same store write that saves the
//! evaluation, so it is never left closed without one.

use std::sync::Arc;

use super::errors::EngineError;
use super::settings::{EngineSettings, JUDGE_TEMPERATURE};
use crate::domain::evaluation::{
    judge_request, parse_verdict, render_transcript, rubric_system_prompt, Evaluation,
};
use crate::domain::foundation::Timestamp;
use crate::domain::training::{Message, MessageRole, Session};
use crate::ports::{
    AIProvider, ChatRole, CompletionRequest, Corpus, KnowledgeRetriever, Passage, RequestMetadata,
    SessionStore,
};

/// Raw output stored when the trainee never spoke.
pub const NO_TRAINEE_TURNS: &str = "no trainee turns";

/// What the judge needs to know about the scenario.
#[derive(Debug, Clone, Copy)]
pub struct JudgeBrief<'a> {
    pub scenario_name: &'a str,
    /// Extra terms for finding reference scripts.
    pub seed_topic: &'a str,
}

/// Produces at most one evaluation per completed session.
pub struct Judge {
    store: Arc<dyn SessionStore>,
    retriever: Arc<dyn KnowledgeRetriever>,
    provider: Arc<dyn AIProvider>,
    settings: EngineSettings,
}

impl Judge {
    pub fn new(
        store: Arc<dyn SessionStore>,
        retriever: Arc<dyn KnowledgeRetriever>,
        provider: Arc<dyn AIProvider>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            retriever,
            provider,
            settings,
        }
    }

    /// Grades an open session and completes it; returns the closed session
    /// with its evaluation.
    ///
    /// A session completed earlier is returned as stored, without a model call.
    ///
    /// # Errors
    ///
    /// Only store failures propagate. The session then stays open and the
    /// call may be repeated.
    pub async fn evaluate(
        &self,
        session: &Session,
        brief: JudgeBrief<'_>,
    ) -> Result<(Session, Evaluation), EngineError> {
        if let Some(existing) = self.store.find_evaluation(&session.id()).await? {
            tracing::debug!(session_id = %session.id(), "evaluation already stored");
            return Ok(self.store.complete_session(&existing, Timestamp::now()).await?);
        }

        let transcript = self.store.get_all_messages(&session.id()).await?;
        let candidate = self.grade(session, brief, &transcript).await;
        let (closed, stored) = self
            .store
            .complete_session(&candidate, Timestamp::now())
            .await?;

        tracing::info!(
            session_id = %closed.id(),
            score = ?stored.score,
            status = %stored.status,
            "session evaluated"
        );
        Ok((closed, stored))
    }

    async fn grade(
        &self,
        session: &Session,
        brief: JudgeBrief<'_>,
        transcript: &[Message],
    ) -> Evaluation {
        if !transcript.iter().any(|m| m.role == MessageRole::User) {
            tracing::info!(session_id = %session.id(), "nothing to grade");
            return Evaluation::ungraded(session.id(), NO_TRAINEE_TURNS);
        }

        let scripts = self.reference_scripts(brief).await;
        let request = CompletionRequest::new(RequestMetadata::new(
            session.user_id(),
            session.id(),
            "judge",
        ))
        .with_system_prompt(rubric_system_prompt(&scripts))
        .with_message(
            ChatRole::User,
            judge_request(brief.scenario_name, &render_transcript(transcript)),
        )
        .with_max_tokens(self.settings.max_tokens)
        .with_temperature(JUDGE_TEMPERATURE);

        let output = match self
            .settings
            .retry
            .complete(self.provider.as_ref(), &request)
            .await
        {
            Ok(response) => response.content,
            Err(err) => {
                tracing::warn!(
                    session_id = %session.id(),
                    error = %err,
                    "judge unavailable, storing ungraded evaluation"
                );
                return Evaluation::ungraded(session.id(), format!("judge unavailable: {}", err));
            }
        };

        match parse_verdict(&output) {
            Ok(verdict) => Evaluation::graded(session.id(), verdict),
            Err(err) => {
                tracing::warn!(
                    session_id = %session.id(),
                    error = %err,
                    "judge output not parseable, storing ungraded evaluation"
                );
                Evaluation::ungraded(session.id(), output)
            }
        }
    }

    /// Model scripts for comparison; a failed search only loses the comparison.
    async fn reference_scripts(&self, brief: JudgeBrief<'_>) -> Vec<Passage> {
        if self.settings.top_k == 0 {
            return Vec::new();
        }
        let query = format!("{} {}", brief.scenario_name, brief.seed_topic);
        match self
            .retriever
            .search(Corpus::ReferenceScripts, &query, self.settings.top_k)
            .await
        {
            Ok(passages) => passages,
            Err(err) => {
                tracing::warn!(error = %err, "reference script search failed");
                Vec::new()
            }
        }
    }
}
