//! Dialogue engine: produces and records the simulated client's replies.
//!
//! One call per user event. The model is called first and the transcript is
//! only written once a reply exists, so a failed call leaves the session
//! exactly as it was and the trainee can resend the same message.

use std::sync::Arc;

use super::errors::EngineError;
use super::settings::EngineSettings;
use crate::domain::foundation::{Timestamp, ValidationError};
use crate::domain::scenario::Scenario;
use crate::domain::training::{
    compose_system_prompt, script_reply_request, script_reply_system_prompt, Message, NewMessage,
    Session, SessionOutcome,
};
use crate::ports::{
    AIProvider, ChatRole, CompletionRequest, Corpus, KnowledgeRetriever, Passage, RequestMetadata,
    SessionStore, StoreError,
};

/// Generates counterpart turns for open sessions.
pub struct DialogueEngine {
    store: Arc<dyn SessionStore>,
    retriever: Arc<dyn KnowledgeRetriever>,
    provider: Arc<dyn AIProvider>,
    settings: EngineSettings,
}

impl DialogueEngine {
    /// Creates an engine with its collaborators.
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

    /// Generates the opening line, then persists the session with it as message 1.
    ///
    /// Nothing is stored when generation fails. If the session row was
    /// created but the message could not be appended, the session is
    /// abandoned so the user is not left with an empty dialogue.
    pub async fn open(&self, session: &Session, scenario: &Scenario) -> Result<Message, EngineError> {
        let passages = self.counterpart_context(&scenario.seed_topic).await?;
        let request = self
            .base_request(session, scenario, &passages, "opening")
            .with_message(
                ChatRole::User,
                "Start the conversation in character with your first line.",
            );

        let reply = self.generate(request).await?;

        self.store.create_session(session).await?;
        match self.append(session, vec![NewMessage::assistant(reply)]).await {
            Ok(message) => {
                tracing::info!(
                    session_id = %session.id(),
                    scenario = %scenario.key,
                    "session opened"
                );
                Ok(message)
            }
            Err(err) => {
                if let Err(close_err) = self
                    .store
                    .close_session(&session.id(), SessionOutcome::Abandoned, Timestamp::now())
                    .await
                {
                    tracing::error!(
                        session_id = %session.id(),
                        error = %close_err,
                        "failed to abandon session without opening line"
                    );
                }
                Err(err)
            }
        }
    }

    /// Answers one trainee message and records both lines atomically.
    pub async fn turn(
        &self,
        session: &Session,
        scenario: &Scenario,
        text: &str,
    ) -> Result<Message, EngineError> {
        let history = self
            .store
            .get_recent_messages(&session.id(), self.settings.history_window)
            .await?;
        let passages = self.counterpart_context(text).await?;
        let request = self
            .base_request(session, scenario, &passages, "turn")
            .with_history(&history)
            .with_message(ChatRole::User, text);

        let reply = self.generate(request).await?;

        let message = self
            .append(session, vec![NewMessage::user(text), NewMessage::assistant(reply)])
            .await?;
        tracing::debug!(session_id = %session.id(), seq = message.seq, "turn recorded");
        Ok(message)
    }

    /// Suggests what the trainee could answer to `client_line`, drawing on
    /// the reference scripts. Nothing is recorded in the transcript.
    pub async fn suggest_reply(
        &self,
        session: &Session,
        client_line: &str,
    ) -> Result<String, EngineError> {
        if !self.settings.script_reply_enabled {
            return Err(ValidationError::invalid_format(
                "script_reply",
                "scripted replies are disabled",
            )
            .into());
        }
        let client_line = client_line.trim();
        if client_line.is_empty() {
            return Err(ValidationError::empty_field("client_line").into());
        }

        let scripts = if self.settings.top_k == 0 {
            Vec::new()
        } else {
            self.retriever
                .search(Corpus::ReferenceScripts, client_line, self.settings.top_k)
                .await?
        };
        let request = CompletionRequest::new(RequestMetadata::new(
            session.user_id(),
            session.id(),
            "script_reply",
        ))
        .with_system_prompt(script_reply_system_prompt(&scripts))
        .with_message(ChatRole::User, script_reply_request(client_line))
        .with_max_tokens(self.settings.max_tokens)
        .with_temperature(self.settings.temperature);

        let suggestion = self.generate(request).await?;
        tracing::info!(
            session_id = %session.id(),
            scripts = scripts.len(),
            "scripted reply suggested"
        );
        Ok(suggestion)
    }

    async fn counterpart_context(&self, query: &str) -> Result<Vec<Passage>, EngineError> {
        if self.settings.top_k == 0 {
            return Ok(Vec::new());
        }
        let passages = self
            .retriever
            .search(Corpus::Counterpart, query, self.settings.top_k)
            .await?;
        tracing::debug!(passages = passages.len(), "counterpart context retrieved");
        Ok(passages)
    }

    fn base_request(
        &self,
        session: &Session,
        scenario: &Scenario,
        passages: &[Passage],
        purpose: &'static str,
    ) -> CompletionRequest {
        CompletionRequest::new(RequestMetadata::new(session.user_id(), session.id(), purpose))
            .with_system_prompt(compose_system_prompt(&scenario.system_prompt, passages))
            .with_max_tokens(self.settings.max_tokens)
            .with_temperature(self.settings.temperature)
    }

    async fn generate(&self, request: CompletionRequest) -> Result<String, EngineError> {
        let response = self
            .settings
            .retry
            .complete(self.provider.as_ref(), &request)
            .await?;

        let reply = response.content.trim();
        if reply.is_empty() {
            return Err(EngineError::ExternalService(
                "model returned an empty reply".to_string(),
            ));
        }
        Ok(reply.to_string())
    }

    /// Appends `messages` and returns the last one stored.
    async fn append(
        &self,
        session: &Session,
        messages: Vec<NewMessage>,
    ) -> Result<Message, EngineError> {
        let mut stored = self
            .store
            .append_messages(&session.id(), messages)
            .await
            .map_err(|err| {
                tracing::error!(session_id = %session.id(), error = %err, "failed to record reply");
                err
            })?;
        stored.pop().ok_or_else(|| {
            EngineError::Persistence(StoreError::unavailable("append stored no messages"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::{MockAIProvider, MockError};
    use crate::adapters::knowledge::InMemoryKnowledgeIndex;
    use crate::adapters::memory::InMemorySessionStore;
    use crate::application::retry::RetryPolicy;
    use crate::domain::foundation::UserId;
    use crate::domain::scenario::ScenarioCatalog;
    use crate::domain::training::MessageRole;
    use std::time::Duration;

    struct Fixture {
        store: InMemorySessionStore,
        provider: MockAIProvider,
        engine: DialogueEngine,
        scenario: Scenario,
    }

    fn fixture(index: InMemoryKnowledgeIndex) -> Fixture {
        fixture_with(index, false)
    }

    fn fixture_with(index: InMemoryKnowledgeIndex, script_reply_enabled: bool) -> Fixture {
        let store = InMemorySessionStore::new();
        let provider = MockAIProvider::new();
        let settings = EngineSettings {
            retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(100)),
            script_reply_enabled,
            ..EngineSettings::default()
        };
        let engine = DialogueEngine::new(
            Arc::new(store.clone()),
            Arc::new(index),
            Arc::new(provider.clone()),
            settings,
        );
        let scenario = ScenarioCatalog::builtin()
            .resolve("cold_call")
            .unwrap()
            .clone();
        Fixture {
            store,
            provider,
            engine,
            scenario,
        }
    }

    async fn opened(f: &Fixture) -> Session {
        let session = Session::open(UserId::new(1), f.scenario.key.clone());
        f.provider.push_response("Who is this?", Default::default());
        f.engine.open(&session, &f.scenario).await.unwrap();
        session
    }

    #[tokio::test]
    async fn opening_creates_session_with_one_assistant_message() {
        let f = fixture(InMemoryKnowledgeIndex::empty());
        let session = opened(&f).await;

        let messages = f.store.get_all_messages(&session.id()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(messages[0].seq, 1);
        assert_eq!(messages[0].content, "Who is this?");
    }

    #[tokio::test]
    async fn failed_opening_stores_nothing() {
        let f = fixture(InMemoryKnowledgeIndex::empty());
        f.provider.push_error(MockError::Unavailable { message: "down".into() });
        f.provider.push_error(MockError::Unavailable { message: "down".into() });
        let session = Session::open(UserId::new(1), f.scenario.key.clone());

        let err = f.engine.open(&session, &f.scenario).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(f.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn turn_appends_user_then_assistant() {
        let f = fixture(InMemoryKnowledgeIndex::empty());
        let session = opened(&f).await;
        f.provider.push_response("I have two minutes.", Default::default());

        let reply = f
            .engine
            .turn(&session, &f.scenario, "Hello, got a minute?")
            .await
            .unwrap();

        assert_eq!(reply.seq, 3);
        let messages = f.store.get_all_messages(&session.id()).await.unwrap();
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(messages[1].seq, 2);
        assert_eq!(messages[2].content, "I have two minutes.");
    }

    #[tokio::test]
    async fn turn_sends_history_and_new_text() {
        let f = fixture(InMemoryKnowledgeIndex::empty());
        let session = opened(&f).await;
        f.provider.clear_calls();

        f.engine.turn(&session, &f.scenario, "Hi there").await.unwrap();

        let calls = f.provider.get_calls();
        let sent = &calls[0].messages;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].content, "Who is this?");
        assert_eq!(sent[1].content, "Hi there");
        assert_eq!(calls[0].system_prompt.as_deref(), Some(f.scenario.system_prompt.as_str()));
    }

    #[tokio::test]
    async fn retrieved_passages_are_prepended_to_prompt() {
        let index = InMemoryKnowledgeIndex::from_documents(
            vec![("client/fleet.txt", "The client runs a fleet of forty delivery vans.")],
            500,
        );
        let f = fixture(index);
        let session = opened(&f).await;
        f.provider.clear_calls();

        f.engine
            .turn(&session, &f.scenario, "How many delivery vans do you run?")
            .await
            .unwrap();

        let prompt = f.provider.get_calls()[0].system_prompt.clone().unwrap();
        assert!(prompt.contains("forty delivery vans"));
        assert!(prompt.ends_with(&f.scenario.system_prompt));
    }

    #[tokio::test]
    async fn failed_turn_leaves_transcript_untouched() {
        let f = fixture(InMemoryKnowledgeIndex::empty());
        let session = opened(&f).await;
        f.provider.push_error(MockError::Timeout { timeout_ms: 100 });
        f.provider.push_error(MockError::Timeout { timeout_ms: 100 });

        let err = f.engine.turn(&session, &f.scenario, "Hello").await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(f.store.get_all_messages(&session.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_append_is_persistence_error() {
        let f = fixture(InMemoryKnowledgeIndex::empty());
        let session = opened(&f).await;
        f.store.set_fail_appends(true);

        let err = f.engine.turn(&session, &f.scenario, "Hello").await.unwrap_err();

        assert!(matches!(err, EngineError::Persistence(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn history_is_limited_to_window() {
        let f = fixture(InMemoryKnowledgeIndex::empty());
        let session = opened(&f).await;
        for i in 0..6 {
            f.engine
                .turn(&session, &f.scenario, &format!("message {}", i))
                .await
                .unwrap();
        }
        f.provider.clear_calls();

        f.engine.turn(&session, &f.scenario, "last").await.unwrap();

        // window of 10 plus the new text
        assert_eq!(f.provider.get_calls()[0].messages.len(), 11);
    }

    #[tokio::test]
    async fn suggested_reply_draws_on_reference_scripts() {
        let index = InMemoryKnowledgeIndex::from_documents(
            vec![(
                "scripts/price.md",
                "When the client says the price is too high, ask what they compare it with.",
            )],
            500,
        );
        let f = fixture_with(index, true);
        let session = opened(&f).await;
        f.provider.clear_calls();
        f.provider
            .push_response(" What are you comparing it with? ", Default::default());

        let suggestion = f
            .engine
            .suggest_reply(&session, "The price is too high.")
            .await
            .unwrap();

        assert_eq!(suggestion, "What are you comparing it with?");
        let call = &f.provider.get_calls()[0];
        assert_eq!(call.metadata.purpose, "script_reply");
        assert_eq!(call.messages[0].content, "Client said: The price is too high.");
        assert!(call
            .system_prompt
            .as_deref()
            .unwrap()
            .contains("ask what they compare it with"));
        assert_eq!(f.store.get_all_messages(&session.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn suggestion_without_scripts_still_asks_the_model() {
        let f = fixture_with(InMemoryKnowledgeIndex::empty(), true);
        let session = opened(&f).await;
        f.provider.clear_calls();

        f.engine.suggest_reply(&session, "Not now.").await.unwrap();

        let prompt = f.provider.get_calls()[0].system_prompt.clone().unwrap();
        assert!(prompt.ends_with(crate::domain::training::NO_SCRIPTS_FOUND));
    }

    #[tokio::test]
    async fn disabled_suggestions_never_call_the_model() {
        let f = fixture(InMemoryKnowledgeIndex::empty());
        let session = opened(&f).await;
        f.provider.clear_calls();

        let err = f
            .engine
            .suggest_reply(&session, "The price is too high.")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(f.provider.call_count(), 0);
    }
}
