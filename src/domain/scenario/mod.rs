//! Scenario domain module.
//!
//! Scenarios are immutable, configuration-defined training situations.
//! The engine only reads them.

mod catalog;

pub use catalog::{Scenario, ScenarioCatalog, ScenarioKey, ScenarioSummary};
