//! Knowledge retriever adapters.

mod in_memory_index;

pub use in_memory_index::{chunk_text, corpus_for_path, InMemoryKnowledgeIndex, DEFAULT_CHUNK_SIZE};
