//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the engine to external systems:
//! - `ai` - Generative model providers
//! - `knowledge` - Reference document index
//! - `memory` - In-memory session store
//! - `postgres` - PostgreSQL session store
//! - `reporting` - Finished-session report sinks

pub mod ai;
pub mod knowledge;
pub mod memory;
pub mod postgres;
pub mod reporting;
