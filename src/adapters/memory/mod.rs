//! In-memory adapters for tests and database-free runs.

mod in_memory_store;

pub use in_memory_store::InMemorySessionStore;
