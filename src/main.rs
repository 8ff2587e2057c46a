//! Console transport for the sales training engine.
//!
//! Reads `<user> <command> [args]` lines from stdin and prints replies:
//!
//! ```text
//! alice /start
//! alice /scenario cold_call
//! alice Hello, do you have a minute?
//! alice /suggest
//! alice /finish
//! ```

use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use sales_coach::adapters::ai::{
    CostGuardedProvider, MockAIProvider, OpenAIConfig, OpenAIProvider,
};
use sales_coach::adapters::knowledge::InMemoryKnowledgeIndex;
use sales_coach::adapters::memory::InMemorySessionStore;
use sales_coach::adapters::postgres::PostgresSessionStore;
use sales_coach::adapters::reporting::{HttpReportSink, LogReportSink};
use sales_coach::application::{EngineSettings, Reply, SessionOrchestrator};
use sales_coach::config::{AiProvider, AppConfig, DatabaseConfig, LoggingConfig};
use sales_coach::domain::evaluation::{Evaluation, MAX_SCORE};
use sales_coach::domain::foundation::ExternalUserId;
use sales_coach::domain::scenario::ScenarioCatalog;
use sales_coach::domain::training::UserEvent;
use sales_coach::ports::{AIProvider, Corpus, ReportSink, SessionStore};

const USAGE: &str = "usage: <user> /start | /scenario <key> | /suggest | /finish | <text>";

/// How often idle user contexts are swept.
const EVICTION_PERIOD: Duration = Duration::from_secs(60);

/// One parsed console line.
#[derive(Debug, PartialEq)]
enum Input {
    Event(UserEvent),
    SuggestReply,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);
    config.validate()?;

    let catalog = match &config.scenarios.path {
        Some(path) => ScenarioCatalog::load(path)?,
        None => ScenarioCatalog::builtin(),
    };
    tracing::info!(scenarios = catalog.len(), "scenario catalog loaded");

    let store = connect_store(&config.database).await?;

    let index = InMemoryKnowledgeIndex::load_dir(&config.knowledge.dir, config.knowledge.chunk_size)?;
    tracing::info!(
        dir = %config.knowledge.dir.display(),
        counterpart_chunks = index.chunk_count(Corpus::Counterpart),
        script_chunks = index.chunk_count(Corpus::ReferenceScripts),
        "knowledge loaded"
    );

    let provider: Arc<dyn AIProvider> = match config.ai.provider {
        AiProvider::OpenAI => {
            let api_key = config
                .ai
                .api_key
                .as_ref()
                .map(|key| key.expose_secret().clone())
                .unwrap_or_default();
            let openai = OpenAIConfig::new(api_key)
                .with_model(config.ai.model.clone())
                .with_base_url(config.ai.base_url.clone())
                .with_timeout(config.ai.timeout())
                .with_cost_per_1k_tokens(config.ai.cost_cents_per_1k_tokens)
                .with_app_name("sales-coach");
            Arc::new(OpenAIProvider::new(openai)?)
        }
        AiProvider::Mock => {
            tracing::warn!("using the mock AI provider");
            Arc::new(MockAIProvider::new())
        }
    };
    let provider = Arc::new(CostGuardedProvider::new(
        provider,
        config.ai.daily_cost_limit_cents,
        config.ai.cost_cents_per_1k_tokens,
    ));

    let reports: Arc<dyn ReportSink> = match config.reporting.webhook() {
        Some(url) => Arc::new(HttpReportSink::new(url, config.reporting.timeout())?),
        None => Arc::new(LogReportSink),
    };

    let engine = Arc::new(SessionOrchestrator::new(
        Arc::new(catalog),
        store,
        Arc::new(index),
        provider,
        reports,
        EngineSettings::from_config(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let eviction = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run_eviction(EVICTION_PERIOD, shutdown_rx).await }
    });

    let result = run_console(&engine).await;

    // A closed receiver only means the loop already ended.
    let _ = shutdown_tx.send(true);
    if let Err(err) = eviction.await {
        tracing::warn!(error = %err, "eviction task failed");
    }
    result
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_store(database: &DatabaseConfig) -> Result<Arc<dyn SessionStore>, Box<dyn Error>> {
    if !database.is_configured() {
        tracing::warn!("no database configured, sessions are kept in memory");
        return Ok(Arc::new(InMemorySessionStore::new()));
    }

    let pool = PgPoolOptions::new()
        .min_connections(database.min_connections)
        .max_connections(database.max_connections)
        .acquire_timeout(database.acquire_timeout())
        .idle_timeout(database.idle_timeout())
        .connect(&database.url)
        .await?;
    tracing::info!("connected to database");

    let store = PostgresSessionStore::new(pool);
    if database.run_migrations {
        store.migrate().await?;
        tracing::info!("migrations applied");
    }
    Ok(Arc::new(store))
}

async fn run_console(engine: &SessionOrchestrator) -> Result<(), Box<dyn Error>> {
    println!("{}", USAGE);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some((user, input)) = parse_line(&line) else {
            println!("{}", USAGE);
            continue;
        };
        let result = match input {
            Input::Event(event) => engine.handle(&user, event).await.map(|r| render_reply(&r)),
            Input::SuggestReply => engine
                .suggest_reply(&user)
                .await
                .map(|text| format!("Suggested reply: {}", text)),
        };
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                tracing::debug!(user = %user, code = %err.code(), error = %err, "event failed");
                format!("! {}", err.user_message())
            }
        };
        println!("[{}] {}", user, output);
    }
    Ok(())
}

/// Splits a console line into the user and their input.
fn parse_line(line: &str) -> Option<(ExternalUserId, Input)> {
    let (user, rest) = line.trim().split_once(char::is_whitespace)?;
    let user = ExternalUserId::new(user).ok()?;
    let rest = rest.trim();

    let event = match rest.split_once(char::is_whitespace) {
        Some(("/scenario", key)) => UserEvent::ScenarioSelected {
            key: key.trim().to_string(),
        },
        None if rest == "/start" => UserEvent::Start,
        None if rest == "/finish" => UserEvent::Finish,
        None if rest == "/suggest" => return Some((user, Input::SuggestReply)),
        None if rest == "/scenario" => return None,
        _ => UserEvent::Turn {
            text: rest.to_string(),
        },
    };
    Some((user, Input::Event(event)))
}

fn render_reply(reply: &Reply) -> String {
    match reply {
        Reply::Menu { scenarios, abandoned } => {
            let mut out = String::new();
            if abandoned.is_some() {
                out.push_str("Previous dialogue abandoned.\n");
            }
            out.push_str("Choose a scenario with /scenario <key>:");
            for scenario in scenarios {
                out.push_str(&format!(
                    "\n  {} - {}: {}",
                    scenario.key, scenario.name, scenario.description
                ));
            }
            out
        }
        Reply::SessionStarted {
            scenario, opening, ..
        } => format!("{}\nClient: {}", scenario.name, opening),
        Reply::AssistantReply {
            text, evaluation, ..
        } => match evaluation {
            Some(evaluation) => format!("Client: {}\n{}", text, render_evaluation(evaluation)),
            None => format!("Client: {}", text),
        },
        Reply::Finished { evaluation, .. } => render_evaluation(evaluation),
    }
}

fn render_evaluation(evaluation: &Evaluation) -> String {
    let Some(score) = evaluation.score else {
        return format!(
            "Dialogue finished. No structured evaluation is available ({}).",
            evaluation.raw_output.as_deref().unwrap_or("ungraded")
        );
    };

    let mut out = format!("Dialogue finished. Score: {}/{}", score, MAX_SCORE);
    if !evaluation.strengths.is_empty() {
        out.push_str("\nStrengths:");
        for item in &evaluation.strengths {
            out.push_str(&format!("\n  + {}", item));
        }
    }
    if !evaluation.mistakes.is_empty() {
        out.push_str("\nMistakes:");
        for item in &evaluation.mistakes {
            out.push_str(&format!("\n  - {}", item));
        }
    }
    if !evaluation.recommendations.is_empty() {
        out.push_str(&format!("\nRecommendations: {}", evaluation.recommendations));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(line: &str) -> Option<UserEvent> {
        match parse_line(line)? {
            (_, Input::Event(event)) => Some(event),
            (_, Input::SuggestReply) => None,
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(event("alice /start"), Some(UserEvent::Start));
        assert_eq!(event("alice /finish"), Some(UserEvent::Finish));
        assert_eq!(
            event("alice /scenario cold_call"),
            Some(UserEvent::ScenarioSelected {
                key: "cold_call".to_string()
            })
        );
    }

    #[test]
    fn free_text_is_a_turn() {
        let (user, input) = parse_line("bob  Hello, got a minute? ").unwrap();
        assert_eq!(user.as_str(), "bob");
        assert_eq!(
            input,
            Input::Event(UserEvent::Turn {
                text: "Hello, got a minute?".to_string()
            })
        );
    }

    #[test]
    fn suggest_is_not_a_dialogue_event() {
        let (_, input) = parse_line("alice /suggest").unwrap();
        assert_eq!(input, Input::SuggestReply);
    }

    #[test]
    fn incomplete_lines_are_rejected() {
        assert_eq!(event("alice"), None);
        assert_eq!(event("alice /scenario"), None);
    }

    #[test]
    fn ungraded_evaluation_shows_reason() {
        let evaluation = Evaluation::ungraded(
            sales_coach::domain::foundation::SessionId::new(),
            "no trainee turns",
        );
        assert!(render_evaluation(&evaluation).contains("no trainee turns"));
    }
}
