//! Session orchestrator: the entry point the transport calls per user event.
//!
//! Events of one user are handled strictly one at a time behind that user's
//! lock; different users proceed concurrently. The user's phase lives in a
//! context hydrated from the store on first contact, so a restart resumes
//! an open dialogue instead of orphaning it. Contexts idle for longer than
//! the configured age are evicted and hydrated again when the user returns.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Instant};

use super::dialogue_engine::DialogueEngine;
use super::errors::EngineError;
use super::judge::{Judge, JudgeBrief};
use super::settings::EngineSettings;
use crate::domain::evaluation::Evaluation;
use crate::domain::foundation::{ExternalUserId, SessionId, Timestamp, ValidationError};
use crate::domain::scenario::{Scenario, ScenarioCatalog, ScenarioSummary};
use crate::domain::training::{
    contains_closing_phrase, dispatch, Action, EventKind, MessageRole, PhaseConflict, Session,
    SessionOutcome, SessionPhase, User, UserEvent,
};
use crate::ports::{AIProvider, KnowledgeRetriever, ReportSink, SessionReport, SessionStore};

/// What the transport should deliver back to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// Scenario menu; `abandoned` names a session that `start` closed.
    Menu {
        scenarios: Vec<ScenarioSummary>,
        abandoned: Option<SessionId>,
    },
    /// The counterpart's opening line of a new (or repeated) selection.
    SessionStarted {
        session_id: SessionId,
        scenario: ScenarioSummary,
        opening: String,
    },
    /// The counterpart's answer; `evaluation` is set when it closed the dialogue.
    AssistantReply {
        session_id: SessionId,
        text: String,
        evaluation: Option<Evaluation>,
    },
    /// The dialogue was finished on request.
    Finished {
        session_id: SessionId,
        evaluation: Evaluation,
    },
}

/// Per-user state, only touched while holding the user's lock.
#[derive(Debug)]
struct UserContext {
    external_id: ExternalUserId,
    user: User,
    phase: SessionPhase,
    session: Option<Session>,
    last_seen: Instant,
}

type UserSlot = Arc<Mutex<Option<UserContext>>>;

/// Dispatches user events to the dialogue engine and judge.
pub struct SessionOrchestrator {
    catalog: Arc<ScenarioCatalog>,
    store: Arc<dyn SessionStore>,
    dialogue: DialogueEngine,
    judge: Judge,
    reports: Arc<dyn ReportSink>,
    settings: EngineSettings,
    users: Mutex<HashMap<ExternalUserId, UserSlot>>,
}

impl SessionOrchestrator {
    /// Wires the engine from its collaborators.
    pub fn new(
        catalog: Arc<ScenarioCatalog>,
        store: Arc<dyn SessionStore>,
        retriever: Arc<dyn KnowledgeRetriever>,
        provider: Arc<dyn AIProvider>,
        reports: Arc<dyn ReportSink>,
        settings: EngineSettings,
    ) -> Self {
        let dialogue = DialogueEngine::new(
            Arc::clone(&store),
            Arc::clone(&retriever),
            Arc::clone(&provider),
            settings.clone(),
        );
        let judge = Judge::new(Arc::clone(&store), retriever, provider, settings.clone());
        Self {
            catalog,
            store,
            dialogue,
            judge,
            reports,
            settings,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Scenario catalog served by this engine.
    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    /// Handles one event for `user`.
    ///
    /// On any error the user's phase and transcript are unchanged.
    pub async fn handle(
        &self,
        user: &ExternalUserId,
        event: UserEvent,
    ) -> Result<Reply, EngineError> {
        let slot = self.slot(user).await;
        let mut guard = slot.lock().await;
        let ctx = self.context(&mut guard, user).await?;

        let transition = dispatch(ctx.phase, &event).map_err(|conflict| {
            tracing::debug!(
                user = %user,
                phase = %conflict.phase,
                event = %conflict.event,
                "event rejected"
            );
            EngineError::from(conflict)
        })?;

        let reply = match transition.action {
            Action::ShowMenu => self.show_menu(ctx, None),
            Action::AbandonAndShowMenu => self.abandon(ctx).await,
            Action::OpenSession { key } => self.open_session(ctx, &key).await,
            Action::RepeatSelection { key } => self.repeat_selection(ctx, &key).await,
            Action::Turn { text } => self.turn(ctx, &text).await,
            Action::Finish => self.finish(ctx).await.map(|(session_id, evaluation)| {
                Reply::Finished {
                    session_id,
                    evaluation,
                }
            }),
        }?;

        tracing::debug!(user = %user, phase = %ctx.phase, "event handled");
        Ok(reply)
    }

    /// Suggests a scripted answer to the counterpart's latest line in the
    /// user's open dialogue. The transcript is not touched.
    pub async fn suggest_reply(&self, user: &ExternalUserId) -> Result<String, EngineError> {
        let slot = self.slot(user).await;
        let mut guard = slot.lock().await;
        let ctx = self.context(&mut guard, user).await?;
        let conflict = EngineError::from(PhaseConflict {
            phase: ctx.phase,
            event: EventKind::SuggestReply,
        });
        let Some(session) = &ctx.session else {
            return Err(conflict);
        };

        let recent = self.store.get_recent_messages(&session.id(), 1).await?;
        let Some(client_line) = recent.iter().rev().find(|m| m.role == MessageRole::Assistant)
        else {
            return Err(conflict);
        };
        self.dialogue.suggest_reply(session, &client_line.content).await
    }

    /// Drops user contexts idle for at least the configured age and returns
    /// how many went. Contexts in use are kept.
    ///
    /// An evicted user with an open dialogue is hydrated back into it on
    /// their next event; a user who was at the menu starts from `Idle`.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let max_idle = self.settings.idle_eviction;
        let mut users = self.users.lock().await;
        let before = users.len();

        // A slot cloned out of the map belongs to an event in flight.
        users.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let keep = match slot.try_lock() {
                Ok(guard) => guard
                    .as_ref()
                    .is_some_and(|ctx| now.duration_since(ctx.last_seen) < max_idle),
                Err(_) => true,
            };
            keep
        });

        let evicted = before - users.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = users.len(), "idle user contexts evicted");
        }
        evicted
    }

    /// Runs `evict_idle` every `period` until shutdown is signalled.
    pub async fn run_eviction(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(period.max(Duration::from_millis(1)));

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("eviction loop stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    self.evict_idle().await;
                }
            }
        }
    }

    /// Current phase of `user`, if they have been seen since startup.
    pub async fn phase(&self, user: &ExternalUserId) -> Option<SessionPhase> {
        let slot = self.users.lock().await.get(user).cloned()?;
        let guard = slot.lock().await;
        guard.as_ref().map(|ctx| ctx.phase)
    }

    async fn slot(&self, user: &ExternalUserId) -> UserSlot {
        let mut users = self.users.lock().await;
        Arc::clone(users.entry(user.clone()).or_default())
    }

    /// The user's context, hydrated on first use and marked as seen.
    async fn context<'a>(
        &self,
        slot: &'a mut Option<UserContext>,
        user: &ExternalUserId,
    ) -> Result<&'a mut UserContext, EngineError> {
        let ctx = match slot {
            Some(ctx) => ctx,
            empty => empty.insert(self.hydrate(user).await?),
        };
        ctx.last_seen = Instant::now();
        Ok(ctx)
    }

    async fn hydrate(&self, external_id: &ExternalUserId) -> Result<UserContext, EngineError> {
        let user = self.store.get_or_create_user(external_id).await?;
        let session = self.store.find_open_session_for_user(user.id).await?;
        let phase = if session.is_some() {
            SessionPhase::InDialog
        } else {
            SessionPhase::Idle
        };
        tracing::debug!(user = %external_id, phase = %phase, "user context loaded");
        Ok(UserContext {
            external_id: external_id.clone(),
            user,
            phase,
            session,
            last_seen: Instant::now(),
        })
    }

    fn show_menu(
        &self,
        ctx: &mut UserContext,
        abandoned: Option<SessionId>,
    ) -> Result<Reply, EngineError> {
        ctx.phase = SessionPhase::AwaitingScenario;
        Ok(Reply::Menu {
            scenarios: self.catalog.summaries(),
            abandoned,
        })
    }

    async fn abandon(&self, ctx: &mut UserContext) -> Result<Reply, EngineError> {
        let abandoned = match &ctx.session {
            Some(session) => {
                self.store
                    .close_session(&session.id(), SessionOutcome::Abandoned, Timestamp::now())
                    .await?;
                tracing::info!(user = %ctx.external_id, session_id = %session.id(), "session abandoned");
                Some(session.id())
            }
            None => None,
        };
        ctx.session = None;
        self.show_menu(ctx, abandoned)
    }

    async fn open_session(&self, ctx: &mut UserContext, key: &str) -> Result<Reply, EngineError> {
        let scenario = self.catalog.resolve(key)?;
        let session = Session::open(ctx.user.id, scenario.key.clone());

        let opening = self.dialogue.open(&session, scenario).await?;

        tracing::info!(
            user = %ctx.external_id,
            session_id = %session.id(),
            scenario = %scenario.key,
            "dialogue started"
        );
        let session_id = session.id();
        ctx.session = Some(session);
        ctx.phase = SessionPhase::InDialog;
        Ok(Reply::SessionStarted {
            session_id,
            scenario: scenario.summary(),
            opening: opening.content,
        })
    }

    /// Same scenario and no trainee turn yet: replay the opening line.
    async fn repeat_selection(&self, ctx: &mut UserContext, key: &str) -> Result<Reply, EngineError> {
        let conflict = EngineError::from(PhaseConflict {
            phase: ctx.phase,
            event: EventKind::ScenarioSelected,
        });
        let Some(session) = &ctx.session else {
            return Err(conflict);
        };
        if session.scenario_key().as_str() != key.trim() {
            return Err(conflict);
        }

        let messages = self.store.get_all_messages(&session.id()).await?;
        if messages.iter().any(|m| m.role == MessageRole::User) {
            return Err(conflict);
        }
        let Some(opening) = messages.into_iter().find(|m| m.role == MessageRole::Assistant) else {
            return Err(conflict);
        };

        let scenario = self.scenario_for(session)?;
        tracing::debug!(user = %ctx.external_id, session_id = %session.id(), "repeated selection ignored");
        Ok(Reply::SessionStarted {
            session_id: session.id(),
            scenario: scenario.summary(),
            opening: opening.content,
        })
    }

    async fn turn(&self, ctx: &mut UserContext, text: &str) -> Result<Reply, EngineError> {
        let text = self.validate_text(text)?;
        let Some(session) = ctx.session.clone() else {
            return Err(EngineError::from(PhaseConflict {
                phase: ctx.phase,
                event: EventKind::Turn,
            }));
        };
        let scenario = self.scenario_for(&session)?;

        let reply = self.dialogue.turn(&session, scenario, text).await?;

        // The turn is stored; a failed auto-finish must not lose the reply.
        let mut evaluation = None;
        if contains_closing_phrase(&reply.content, &self.settings.closing_phrases) {
            tracing::info!(user = %ctx.external_id, session_id = %session.id(), "closing phrase detected");
            match self.finish(ctx).await {
                Ok((_, stored)) => evaluation = Some(stored),
                Err(err) => tracing::warn!(
                    user = %ctx.external_id,
                    session_id = %session.id(),
                    error = %err,
                    "auto-finish failed, dialogue stays open"
                ),
            }
        }

        Ok(Reply::AssistantReply {
            session_id: session.id(),
            text: reply.content,
            evaluation,
        })
    }

    /// Grades the session, closing it in the same write, then exports the report.
    ///
    /// If the write fails the dialogue stays open and finish may be retried.
    async fn finish(&self, ctx: &mut UserContext) -> Result<(SessionId, Evaluation), EngineError> {
        let Some(open) = ctx.session.clone() else {
            return Err(EngineError::from(PhaseConflict {
                phase: ctx.phase,
                event: EventKind::Finish,
            }));
        };

        let scenario = self.catalog.get(open.scenario_key());
        let scenario_name = scenario.map_or(open.scenario_key().as_str(), |s| s.name.as_str());
        let brief = JudgeBrief {
            scenario_name,
            seed_topic: scenario.map_or("", |s| s.seed_topic.as_str()),
        };
        let (closed, evaluation) = self.judge.evaluate(&open, brief).await?;
        ctx.session = None;
        ctx.phase = SessionPhase::Finished;

        self.export_report(&ctx.external_id, &closed, scenario_name, &evaluation)
            .await;
        Ok((closed.id(), evaluation))
    }

    /// Sends the session report once; failures are logged and dropped.
    async fn export_report(
        &self,
        user: &ExternalUserId,
        session: &Session,
        scenario_name: &str,
        evaluation: &Evaluation,
    ) {
        let message_count = match self.store.get_all_messages(&session.id()).await {
            Ok(messages) => messages.len(),
            Err(err) => {
                tracing::warn!(session_id = %session.id(), error = %err, "report skipped, transcript unavailable");
                return;
            }
        };
        let report = SessionReport::new(session, user, scenario_name, message_count, evaluation);
        if let Err(err) = self.reports.send(&report).await {
            tracing::warn!(session_id = %session.id(), error = %err, "session report not delivered");
        }
    }

    fn validate_text<'a>(&self, text: &'a str) -> Result<&'a str, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::empty_field("text"));
        }
        let length = text.chars().count();
        if length > self.settings.max_message_length {
            return Err(ValidationError::too_long(
                "text",
                self.settings.max_message_length,
                length,
            ));
        }
        Ok(text)
    }

    fn scenario_for(&self, session: &Session) -> Result<&Scenario, EngineError> {
        self.catalog.get(session.scenario_key()).ok_or_else(|| {
            EngineError::Validation(ValidationError::invalid_format(
                "scenario_key",
                format!("scenario '{}' is no longer configured", session.scenario_key()),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::{MockAIProvider, MockError};
    use crate::adapters::knowledge::InMemoryKnowledgeIndex;
    use crate::adapters::memory::InMemorySessionStore;
    use crate::adapters::reporting::LogReportSink;
    use crate::application::retry::RetryPolicy;
    use crate::domain::foundation::ErrorCode;
    use crate::domain::training::is_gap_free;
    use crate::ports::{ReportError, TokenUsage};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const VERDICT: &str = r#"{"score": 6, "strengths": ["Polite"], "mistakes": ["Rushed"], "recommendations": "Slow down."}"#;

    #[derive(Default)]
    struct RecordingSink {
        reports: StdMutex<Vec<SessionReport>>,
        fail: bool,
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn send(&self, report: &SessionReport) -> Result<(), ReportError> {
            self.reports.lock().unwrap().push(report.clone());
            if self.fail {
                return Err(ReportError::Rejected { status: 500 });
            }
            Ok(())
        }
    }

    struct Fixture {
        store: InMemorySessionStore,
        provider: MockAIProvider,
        sink: Arc<RecordingSink>,
        engine: SessionOrchestrator,
    }

    fn fixture_with(sink: RecordingSink, settings: EngineSettings) -> Fixture {
        let store = InMemorySessionStore::new();
        let provider = MockAIProvider::new();
        let sink = Arc::new(sink);
        let engine = SessionOrchestrator::new(
            Arc::new(ScenarioCatalog::builtin()),
            Arc::new(store.clone()),
            Arc::new(InMemoryKnowledgeIndex::empty()),
            Arc::new(provider.clone()),
            Arc::clone(&sink) as Arc<dyn ReportSink>,
            settings,
        );
        Fixture {
            store,
            provider,
            sink,
            engine,
        }
    }

    fn test_settings() -> EngineSettings {
        EngineSettings {
            retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(100)),
            closing_phrases: vec!["send me the contract".to_string()],
            ..EngineSettings::default()
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingSink::default(), test_settings())
    }

    fn user() -> ExternalUserId {
        ExternalUserId::new("tg:100").unwrap()
    }

    fn respond(f: &Fixture, text: &str) {
        f.provider.push_response(text, TokenUsage::new(10, 10, 1));
    }

    async fn start_dialogue(f: &Fixture) -> SessionId {
        f.engine.handle(&user(), UserEvent::Start).await.unwrap();
        respond(f, "Hello, who's calling?");
        match f
            .engine
            .handle(&user(), UserEvent::ScenarioSelected { key: "cold_call".into() })
            .await
            .unwrap()
        {
            Reply::SessionStarted { session_id, .. } => session_id,
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_shows_menu() {
        let f = fixture();

        let reply = f.engine.handle(&user(), UserEvent::Start).await.unwrap();

        match reply {
            Reply::Menu { scenarios, abandoned } => {
                assert_eq!(scenarios.len(), 3);
                assert!(abandoned.is_none());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::AwaitingScenario));
    }

    #[tokio::test]
    async fn unknown_scenario_is_rejected_without_session() {
        let f = fixture();
        f.engine.handle(&user(), UserEvent::Start).await.unwrap();

        let err = f
            .engine
            .handle(&user(), UserEvent::ScenarioSelected { key: "yacht_sale".into() })
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::UnknownScenario);
        assert_eq!(f.store.session_count().await, 0);
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::AwaitingScenario));
    }

    #[tokio::test]
    async fn turn_outside_dialogue_is_state_conflict() {
        let f = fixture();

        let err = f
            .engine
            .handle(&user(), UserEvent::Turn { text: "hi".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::StateConflict(_)));
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_and_oversized_text_are_validation_errors() {
        let f = fixture();
        let session_id = start_dialogue(&f).await;

        let empty = f
            .engine
            .handle(&user(), UserEvent::Turn { text: "   ".into() })
            .await
            .unwrap_err();
        let long = f
            .engine
            .handle(&user(), UserEvent::Turn { text: "x".repeat(501) })
            .await
            .unwrap_err();

        assert!(matches!(empty, EngineError::Validation(_)));
        assert!(matches!(long, EngineError::Validation(ValidationError::TooLong { .. })));
        assert_eq!(f.store.get_all_messages(&session_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_dialogue_flow() {
        let f = fixture();
        let session_id = start_dialogue(&f).await;
        respond(&f, "I have a minute.");

        let reply = f
            .engine
            .handle(&user(), UserEvent::Turn { text: "Hello, got a minute?".into() })
            .await
            .unwrap();
        assert!(matches!(reply, Reply::AssistantReply { evaluation: None, .. }));

        respond(&f, VERDICT);
        let reply = f.engine.handle(&user(), UserEvent::Finish).await.unwrap();
        let Reply::Finished { evaluation, .. } = reply else {
            panic!("expected finished reply");
        };
        assert_eq!(evaluation.score, Some(6));
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::Finished));

        let messages = f.store.get_all_messages(&session_id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert!(is_gap_free(&messages));

        let reports = f.sink.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].message_count, 3);
        assert_eq!(reports[0].scenario, "Cold call");
    }

    #[tokio::test]
    async fn second_start_abandons_open_session() {
        let f = fixture();
        let first = start_dialogue(&f).await;

        let reply = f.engine.handle(&user(), UserEvent::Start).await.unwrap();

        assert!(matches!(reply, Reply::Menu { abandoned: Some(id), .. } if id == first));
        let session = f.store.find_session(&first).await.unwrap().unwrap();
        assert!(session.is_abandoned());
        assert!(f.store.find_evaluation(&first).await.unwrap().is_none());
        assert!(f.sink.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_selection_replays_opening() {
        let f = fixture();
        let first = start_dialogue(&f).await;

        let reply = f
            .engine
            .handle(&user(), UserEvent::ScenarioSelected { key: "cold_call".into() })
            .await
            .unwrap();

        match reply {
            Reply::SessionStarted { session_id, opening, .. } => {
                assert_eq!(session_id, first);
                assert_eq!(opening, "Hello, who's calling?");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(f.store.session_count().await, 1);
        assert_eq!(f.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn different_selection_during_dialogue_conflicts() {
        let f = fixture();
        start_dialogue(&f).await;

        let err = f
            .engine
            .handle(&user(), UserEvent::ScenarioSelected { key: "price_objection".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::StateConflict(_)));
    }

    #[tokio::test]
    async fn closing_phrase_finishes_dialogue() {
        let f = fixture();
        start_dialogue(&f).await;
        respond(&f, "Alright, send me the contract.");
        respond(&f, VERDICT);

        let reply = f
            .engine
            .handle(&user(), UserEvent::Turn { text: "Shall we proceed?".into() })
            .await
            .unwrap();

        match reply {
            Reply::AssistantReply { text, evaluation, .. } => {
                assert_eq!(text, "Alright, send me the contract.");
                assert_eq!(evaluation.unwrap().score, Some(6));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::Finished));
    }

    #[tokio::test]
    async fn failing_report_sink_does_not_fail_finish() {
        let f = fixture_with(
            RecordingSink {
                fail: true,
                ..Default::default()
            },
            test_settings(),
        );
        start_dialogue(&f).await;

        let reply = f.engine.handle(&user(), UserEvent::Finish).await;

        assert!(reply.is_ok());
        assert_eq!(f.sink.reports.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timed_out_turn_can_be_resubmitted() {
        let f = fixture();
        let session_id = start_dialogue(&f).await;
        f.provider.push_error(MockError::Timeout { timeout_ms: 100 });
        f.provider.push_error(MockError::Timeout { timeout_ms: 100 });

        let err = f
            .engine
            .handle(&user(), UserEvent::Turn { text: "Hello?".into() })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::InDialog));
        assert_eq!(f.store.get_all_messages(&session_id).await.unwrap().len(), 1);

        respond(&f, "Yes, I'm here.");
        f.engine
            .handle(&user(), UserEvent::Turn { text: "Hello?".into() })
            .await
            .unwrap();
        let messages = f.store.get_all_messages(&session_id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert!(is_gap_free(&messages));
    }

    #[tokio::test]
    async fn open_session_is_resumed_after_restart() {
        let f = fixture();
        let session_id = start_dialogue(&f).await;

        let restarted = SessionOrchestrator::new(
            Arc::new(ScenarioCatalog::builtin()),
            Arc::new(f.store.clone()),
            Arc::new(InMemoryKnowledgeIndex::empty()),
            Arc::new(f.provider.clone()),
            Arc::new(LogReportSink),
            test_settings(),
        );
        respond(&f, "Go on.");
        let reply = restarted
            .handle(&user(), UserEvent::Turn { text: "Still there?".into() })
            .await
            .unwrap();

        assert!(matches!(reply, Reply::AssistantReply { session_id: id, .. } if id == session_id));
    }

    #[tokio::test]
    async fn failed_evaluation_write_keeps_dialogue_open_until_retry() {
        let f = fixture();
        let session_id = start_dialogue(&f).await;
        respond(&f, "I have a minute.");
        f.engine
            .handle(&user(), UserEvent::Turn { text: "Hello, got a minute?".into() })
            .await
            .unwrap();
        f.store.set_fail_evaluations(true);
        respond(&f, VERDICT);

        let err = f.engine.handle(&user(), UserEvent::Finish).await.unwrap_err();

        assert!(matches!(err, EngineError::Persistence(_)));
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::InDialog));
        assert!(f.store.find_session(&session_id).await.unwrap().unwrap().is_open());
        assert!(f.sink.reports.lock().unwrap().is_empty());

        f.store.set_fail_evaluations(false);
        respond(&f, VERDICT);
        let reply = f.engine.handle(&user(), UserEvent::Finish).await.unwrap();

        assert!(matches!(reply, Reply::Finished { ref evaluation, .. } if evaluation.score == Some(6)));
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::Finished));
        assert!(f.store.find_evaluation(&session_id).await.unwrap().is_some());
        assert!(!f.store.find_session(&session_id).await.unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn closing_reply_is_delivered_when_auto_finish_fails() {
        let f = fixture();
        let session_id = start_dialogue(&f).await;
        f.store.set_fail_evaluations(true);
        respond(&f, "Alright, send me the contract.");
        respond(&f, VERDICT);

        let reply = f
            .engine
            .handle(&user(), UserEvent::Turn { text: "Shall we proceed?".into() })
            .await
            .unwrap();

        match reply {
            Reply::AssistantReply { text, evaluation, .. } => {
                assert_eq!(text, "Alright, send me the contract.");
                assert!(evaluation.is_none());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::InDialog));
        assert_eq!(f.store.get_all_messages(&session_id).await.unwrap().len(), 3);

        f.store.set_fail_evaluations(false);
        respond(&f, VERDICT);
        let reply = f.engine.handle(&user(), UserEvent::Finish).await.unwrap();
        assert!(matches!(reply, Reply::Finished { session_id: id, .. } if id == session_id));
    }

    #[tokio::test]
    async fn suggestion_answers_latest_client_line() {
        let f = fixture_with(
            RecordingSink::default(),
            EngineSettings {
                script_reply_enabled: true,
                ..test_settings()
            },
        );
        let session_id = start_dialogue(&f).await;
        f.provider.clear_calls();
        respond(&f, "Hi, this is Sam from Acme.");

        let suggestion = f.engine.suggest_reply(&user()).await.unwrap();

        assert_eq!(suggestion, "Hi, this is Sam from Acme.");
        let call = &f.provider.get_calls()[0];
        assert_eq!(call.messages[0].content, "Client said: Hello, who's calling?");
        assert_eq!(f.store.get_all_messages(&session_id).await.unwrap().len(), 1);
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::InDialog));
    }

    #[tokio::test]
    async fn suggestion_outside_dialogue_conflicts() {
        let f = fixture_with(
            RecordingSink::default(),
            EngineSettings {
                script_reply_enabled: true,
                ..test_settings()
            },
        );
        f.engine.handle(&user(), UserEvent::Start).await.unwrap();

        let err = f.engine.suggest_reply(&user()).await.unwrap_err();

        assert!(matches!(
            err,
            EngineError::StateConflict(PhaseConflict { event: EventKind::SuggestReply, .. })
        ));
        assert_eq!(f.provider.call_count(), 0);
    }

    fn evicting_fixture() -> Fixture {
        fixture_with(
            RecordingSink::default(),
            EngineSettings {
                idle_eviction: Duration::ZERO,
                ..test_settings()
            },
        )
    }

    #[tokio::test]
    async fn idle_contexts_are_evicted_and_dialogue_resumes() {
        let f = evicting_fixture();
        let session_id = start_dialogue(&f).await;
        let other = ExternalUserId::new("tg:200").unwrap();
        f.engine.handle(&other, UserEvent::Start).await.unwrap();

        assert_eq!(f.engine.evict_idle().await, 2);
        assert_eq!(f.engine.phase(&user()).await, None);
        assert_eq!(f.engine.phase(&other).await, None);

        respond(&f, "Go on.");
        let reply = f
            .engine
            .handle(&user(), UserEvent::Turn { text: "Still there?".into() })
            .await
            .unwrap();
        assert!(matches!(reply, Reply::AssistantReply { session_id: id, .. } if id == session_id));
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::InDialog));
    }

    #[tokio::test]
    async fn recently_active_contexts_are_kept() {
        let f = fixture();
        start_dialogue(&f).await;

        assert_eq!(f.engine.evict_idle().await, 0);
        assert_eq!(f.engine.phase(&user()).await, Some(SessionPhase::InDialog));
    }

    #[tokio::test]
    async fn eviction_loop_runs_until_shutdown() {
        let f = evicting_fixture();
        f.engine.handle(&user(), UserEvent::Start).await.unwrap();
        let engine = Arc::new(f.engine);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run_eviction(Duration::from_millis(5), shutdown_rx).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.phase(&user()).await, None);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn store_outage_during_hydration_is_persistence_error() {
        let f = fixture();
        f.store.set_unavailable(true);

        let err = f.engine.handle(&user(), UserEvent::Start).await.unwrap_err();

        assert!(matches!(err, EngineError::Persistence(_)));
        assert_eq!(f.engine.phase(&user()).await, None);
    }
}
