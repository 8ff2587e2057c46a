//! Knowledge corpus and scenario catalog configuration

use serde::Deserialize;
use std::path::PathBuf;

use super::error::ValidationError;

/// Where the retrieval corpora are read from
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    /// Directory of `.txt`/`.md` documents; `scripts` subpaths feed the judge
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl KnowledgeConfig {
    /// Validate knowledge configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check_range("knowledge.chunk_size", self.chunk_size as u64, 50, 10_000)
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from("knowledge")
}

fn default_chunk_size() -> usize {
    500
}

/// Scenario catalog source
///
/// Without a path the built-in catalog is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenariosConfig {
    /// YAML catalog file
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knowledge_defaults() {
        let config = KnowledgeConfig::default();
        assert_eq!(config.dir, PathBuf::from("knowledge"));
        assert_eq!(config.chunk_size, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tiny_chunks_rejected() {
        let config = KnowledgeConfig {
            chunk_size: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
