//! File-backed knowledge retriever

use async_trait::async_trait;
use glob::glob;
use parlor_agent::{BoxError, ContextRetriever};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("term pattern is valid"));

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("paragraph pattern is valid"));

/// Terms shorter than this carry no signal
const MIN_TERM_LEN: usize = 3;

const EXTENSIONS: &[&str] = &["txt", "md"];

#[derive(Debug, Clone)]
struct Chunk {
    source: PathBuf,
    text: String,
    terms: HashSet<String>,
}

fn terms(text: &str) -> HashSet<String> {
    TERM.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .collect()
}

/// Ranks paragraphs from a directory of text files by query-term overlap
#[derive(Debug, Clone, Default)]
pub struct KnowledgeRetriever {
    chunks: Vec<Chunk>,
    top_k: usize,
}

impl KnowledgeRetriever {
    /// Load every `.txt` and `.md` file under `dir`
    pub fn load(dir: &Path, top_k: usize) -> std::io::Result<Self> {
        let mut files = Vec::new();
        for ext in EXTENSIONS {
            let pattern = dir.join("**").join(format!("*.{}", ext));
            let entries = glob(&pattern.to_string_lossy())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            for entry in entries {
                match entry {
                    Ok(path) => files.push(path),
                    Err(e) => tracing::debug!("Skipping knowledge entry: {}", e),
                }
            }
        }
        files.sort();

        let mut chunks = Vec::new();
        for path in files {
            let content = std::fs::read_to_string(&path)?;
            for paragraph in PARAGRAPH_BREAK.split(&content.replace("\r\n", "\n")) {
                let text = paragraph.trim();
                if text.is_empty() {
                    continue;
                }
                chunks.push(Chunk {
                    source: path.clone(),
                    text: text.to_string(),
                    terms: terms(text),
                });
            }
        }

        tracing::info!(
            "Loaded {} knowledge chunks from {}",
            chunks.len(),
            dir.display()
        );
        Ok(Self { chunks, top_k })
    }

    /// An index over in-memory documents
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>, top_k: usize) -> Self {
        let chunks = texts
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| Chunk {
                source: PathBuf::new(),
                text: t.trim().to_string(),
                terms: terms(t),
            })
            .collect();
        Self { chunks, top_k }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Best-matching chunk texts, highest score first. Ties keep file order.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let wanted = terms(query);
        if wanted.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, &Chunk)> = self
            .chunks
            .iter()
            .map(|c| (c.terms.intersection(&wanted).count(), c))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .take(self.top_k)
            .map(|(score, c)| {
                tracing::debug!("Matched {} (score {})", c.source.display(), score);
                c.text.as_str()
            })
            .collect()
    }
}

#[async_trait]
impl ContextRetriever for KnowledgeRetriever {
    async fn retrieve(&self, query: &str) -> Result<String, BoxError> {
        Ok(self.search(query).join("\n\n"))
    }
}
