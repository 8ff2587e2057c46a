//! Application layer - engine services.
//!
//! - `SessionOrchestrator` - per-user event handling and phase transitions
//! - `DialogueEngine` - counterpart turns with retrieval and bounded retry
//! - `Judge` - rubric grading of finished sessions

mod dialogue_engine;
mod errors;
mod judge;
mod orchestrator;
mod retry;
mod settings;

pub use dialogue_engine::DialogueEngine;
pub use errors::EngineError;
pub use judge::{Judge, JudgeBrief, NO_TRAINEE_TURNS};
pub use orchestrator::{Reply, SessionOrchestrator};
pub use retry::RetryPolicy;
pub use settings::{EngineSettings, JUDGE_TEMPERATURE};
