//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the engine and the outside world. Adapters implement these ports.
//!
//! - `AIProvider` - Generative language service
//! - `SessionStore` - Users, sessions, transcripts and evaluations
//! - `KnowledgeRetriever` - Similarity search over reference documents
//! - `ReportSink` - Export of finished-session reports

mod ai_provider;
mod knowledge_retriever;
mod report_sink;
mod session_store;

pub use ai_provider::{
    estimate_tokens_by_chars, AIError, AIProvider, ChatMessage, ChatRole, CompletionRequest,
    CompletionResponse, FinishReason, ProviderInfo, RequestMetadata, TokenUsage,
};
pub use knowledge_retriever::{Corpus, KnowledgeRetriever, Passage, RetrievalError};
pub use report_sink::{ReportError, ReportSink, SessionReport};
pub use session_store::{SessionStore, StoreError};
