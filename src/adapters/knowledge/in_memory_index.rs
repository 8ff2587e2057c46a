//! In-memory knowledge index.
//!
//! Reference documents are read once from a directory tree, split into
//! fixed-size character chunks and scored against queries by weighted term
//! overlap (tf-idf). The index is immutable after construction, so it can
//! be shared across tasks behind an `Arc` without locking.
//!
//! Layout of the corpus directory:
//!
//! ```text
//! knowledge/
//! ├── product_faq.md          -> Counterpart
//! ├── clients/fleet.txt       -> Counterpart
//! └── scripts/cold_call.md    -> ReferenceScripts
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ports::{Corpus, KnowledgeRetriever, Passage, RetrievalError};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];

#[derive(Debug, Clone)]
struct Chunk {
    source: String,
    text: String,
    terms: HashMap<String, u32>,
    length: u32,
}

#[derive(Debug, Default)]
struct CorpusIndex {
    chunks: Vec<Chunk>,
    doc_freq: HashMap<String, u32>,
}

impl CorpusIndex {
    fn push(&mut self, chunk: Chunk) {
        for term in chunk.terms.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.chunks.push(chunk);
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.chunks.len() as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        if df == 0.0 {
            return 0.0;
        }
        (1.0 + n / df).ln()
    }

    fn search(&self, corpus: Corpus, query: &str, top_k: usize) -> Vec<Passage> {
        if top_k == 0 || self.chunks.is_empty() {
            return Vec::new();
        }

        let query_terms: HashSet<String> = tokenize(query).collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let weights: Vec<(&str, f32)> = query_terms
            .iter()
            .map(|t| (t.as_str(), self.idf(t)))
            .filter(|(_, w)| *w > 0.0)
            .collect();

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let raw: f32 = weights
                    .iter()
                    .filter_map(|(term, idf)| chunk.terms.get(*term).map(|tf| *tf as f32 * idf))
                    .sum();
                (raw > 0.0).then(|| (i, raw / (chunk.length.max(1) as f32).sqrt()))
            })
            .collect();

        // Stable sort keeps ingestion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let chunk = &self.chunks[i];
                Passage {
                    corpus,
                    source: chunk.source.clone(),
                    text: chunk.text.clone(),
                    score,
                }
            })
            .collect()
    }
}

/// Read-only similarity index over both corpora.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeIndex {
    counterpart: CorpusIndex,
    reference_scripts: CorpusIndex,
}

impl InMemoryKnowledgeIndex {
    /// An index with no documents; every search returns nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds an index from `(relative path, text)` pairs in ingestion order.
    pub fn from_documents<I, S, T>(documents: I, chunk_size: usize) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: AsRef<str>,
    {
        let mut index = Self::default();
        for (source, text) in documents {
            index.ingest(source.into(), text.as_ref(), chunk_size);
        }
        index
    }

    /// Loads every `.txt` and `.md` file below `root`.
    ///
    /// A missing directory yields an empty index. Unreadable files are
    /// skipped with a warning.
    pub fn load_dir(root: &Path, chunk_size: usize) -> Result<Self, RetrievalError> {
        if !root.exists() {
            tracing::warn!(path = %root.display(), "knowledge directory not found, retrieval disabled");
            return Ok(Self::empty());
        }

        let mut files = Vec::new();
        collect_files(root, &mut files)
            .map_err(|e| RetrievalError::Unavailable(format!("{}: {}", root.display(), e)))?;
        files.sort();

        let mut index = Self::default();
        for path in files {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            match fs::read_to_string(&path) {
                Ok(text) => index.ingest(relative, &text, chunk_size),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document")
                }
            }
        }

        tracing::info!(
            counterpart_chunks = index.counterpart.chunks.len(),
            script_chunks = index.reference_scripts.chunks.len(),
            "knowledge index loaded"
        );
        Ok(index)
    }

    /// Number of chunks held for `corpus`.
    pub fn chunk_count(&self, corpus: Corpus) -> usize {
        self.corpus(corpus).chunks.len()
    }

    fn corpus(&self, corpus: Corpus) -> &CorpusIndex {
        match corpus {
            Corpus::Counterpart => &self.counterpart,
            Corpus::ReferenceScripts => &self.reference_scripts,
        }
    }

    fn ingest(&mut self, source: String, text: &str, chunk_size: usize) {
        let target = match corpus_for_path(&source) {
            Corpus::Counterpart => &mut self.counterpart,
            Corpus::ReferenceScripts => &mut self.reference_scripts,
        };

        for piece in chunk_text(text, chunk_size) {
            let mut terms = HashMap::new();
            let mut length = 0;
            for term in tokenize(&piece) {
                *terms.entry(term).or_insert(0) += 1;
                length += 1;
            }
            if length == 0 {
                continue;
            }
            target.push(Chunk {
                source: source.clone(),
                text: piece,
                terms,
                length,
            });
        }
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledgeIndex {
    async fn search(
        &self,
        corpus: Corpus,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        Ok(self.corpus(corpus).search(corpus, query, top_k))
    }
}

/// Any path segment mentioning "scripts" routes a document to the script corpus.
pub fn corpus_for_path(relative_path: &str) -> Corpus {
    let is_script = relative_path
        .split('/')
        .any(|segment| segment.to_lowercase().contains("scripts"));
    if is_script {
        Corpus::ReferenceScripts
    } else {
        Corpus::Counterpart
    }
}

/// Splits `text` into trimmed chunks of at most `chunk_size` characters.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let size = chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_lowercase)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
        {
            out.push(path);
        } else {
            tracing::debug!(path = %path.display(), "skipping unsupported document");
        }
    }
    Ok(())
}
