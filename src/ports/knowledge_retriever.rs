//! Knowledge retriever port.
//!
//! Similarity search over reference documents loaded once at startup.
//! An empty corpus is not an error: `search` returns no passages and the
//! caller proceeds without extra context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which document collection to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    /// Facts the simulated client may draw on.
    Counterpart,
    /// Model sales scripts, used by the judge.
    ReferenceScripts,
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corpus::Counterpart => write!(f, "counterpart"),
            Corpus::ReferenceScripts => write!(f, "reference_scripts"),
        }
    }
}

/// A retrieved chunk of a reference document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub corpus: Corpus,
    /// Document the chunk came from (relative path).
    pub source: String,
    pub text: String,
    /// Similarity to the query; higher is closer.
    pub score: f32,
}

/// Errors raised by a retriever.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    #[error("retriever unavailable: {0}")]
    Unavailable(String),
}

/// Port for read-only similarity search.
///
/// Implementations must be safe for concurrent reads and must rank
/// deterministically, breaking ties by ingestion order.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Up to `top_k` passages from `corpus`, best first.
    async fn search(
        &self,
        corpus: Corpus,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Passage>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_retriever_is_object_safe() {
        fn _accepts_dyn(_retriever: &dyn KnowledgeRetriever) {}
    }

    #[test]
    fn corpus_displays_snake_case() {
        assert_eq!(Corpus::ReferenceScripts.to_string(), "reference_scripts");
    }
}
