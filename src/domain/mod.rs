//! Domain layer containing training rules and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine trait)
//! - `scenario` - Scenario catalog
//! - `training` - User phases, sessions, transcript messages and event dispatch
//! - `evaluation` - Judge output, verdict parsing and rubric prompts

pub mod evaluation;
pub mod foundation;
pub mod scenario;
pub mod training;
