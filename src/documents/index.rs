//! Document index
//!
//! [`DocumentIndex`] and [`IndexBackend`] are the seams the worker depends on.
//! [`FlatIndexBackend`] is the built-in implementation: an exhaustive cosine
//! search over [`HashingEmbedder`] vectors, persisted as one JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::documents::embedding::{cosine_similarity, HashingEmbedder, DEFAULT_EMBEDDING_MODEL};
use crate::documents::IndexError;

const FORMAT_VERSION: u32 = 1;

/// A searchable set of text chunks
pub trait DocumentIndex: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn embedding_model(&self) -> &str;

    /// Up to `k` chunks, most relevant first. Equal scores keep insertion order.
    fn search(&self, query: &str, k: usize) -> Vec<String>;

    fn save(&self, path: &Path) -> Result<(), IndexError>;
}

/// Builds and restores indexes
pub trait IndexBackend: Send {
    fn build(
        &self,
        chunks: Vec<String>,
        embedding_model: Option<&str>,
    ) -> Result<Box<dyn DocumentIndex>, IndexError>;

    fn load(
        &self,
        path: &Path,
        embedding_model: Option<&str>,
    ) -> Result<Box<dyn DocumentIndex>, IndexError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    text: String,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile {
    version: u32,
    embedding_model: String,
    entries: Vec<Entry>,
}

#[derive(Debug)]
pub struct FlatIndex {
    embedder: HashingEmbedder,
    model_name: String,
    entries: Vec<Entry>,
}

impl FlatIndex {
    pub fn build(chunks: Vec<String>, embedder: HashingEmbedder) -> Self {
        let entries = chunks
            .into_iter()
            .map(|text| Entry {
                vector: embedder.embed(&text),
                text,
            })
            .collect();
        Self {
            model_name: embedder.model_name(),
            embedder,
            entries,
        }
    }

    pub fn load(path: &Path, embedding_model: Option<&str>) -> Result<Self, IndexError> {
        let json = fs::read_to_string(path)?;
        let file: IndexFile = serde_json::from_str(&json)?;

        if file.version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index version {}",
                file.version
            )));
        }
        if let Some(requested) = embedding_model {
            if requested != file.embedding_model {
                return Err(IndexError::ModelMismatch {
                    requested: requested.to_string(),
                    stored: file.embedding_model,
                });
            }
        }

        let embedder = HashingEmbedder::from_model_name(&file.embedding_model)?;
        if let Some(entry) = file
            .entries
            .iter()
            .find(|e| e.vector.len() != embedder.dimension())
        {
            return Err(IndexError::Corrupt(format!(
                "vector of length {} in a {}-dimensional index",
                entry.vector.len(),
                embedder.dimension()
            )));
        }

        Ok(Self {
            embedder,
            model_name: file.embedding_model,
            entries: file.entries,
        })
    }
}

impl DocumentIndex for FlatIndex {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn embedding_model(&self) -> &str {
        &self.model_name
    }

    fn search(&self, query: &str, k: usize) -> Vec<String> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let query = self.embedder.embed(query);
        let mut scored: Vec<(f32, &Entry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&query, &entry.vector), entry))
            .collect();
        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        scored
            .into_iter()
            .take(k)
            .map(|(_, entry)| entry.text.clone())
            .collect()
    }

    fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = IndexFile {
            version: FORMAT_VERSION,
            embedding_model: self.model_name.clone(),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string(&file)?;

        // Write to a sibling first so a failed save never truncates an existing index
        let temp = temp_path(path);
        fs::write(&temp, json)?;
        if let Err(e) = fs::rename(&temp, path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        tracing::debug!("Saved {} chunks to {}", self.entries.len(), path.display());
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Backend for [`FlatIndex`]
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatIndexBackend;

impl IndexBackend for FlatIndexBackend {
    fn build(
        &self,
        chunks: Vec<String>,
        embedding_model: Option<&str>,
    ) -> Result<Box<dyn DocumentIndex>, IndexError> {
        let embedder =
            HashingEmbedder::from_model_name(embedding_model.unwrap_or(DEFAULT_EMBEDDING_MODEL))?;
        Ok(Box::new(FlatIndex::build(chunks, embedder)))
    }

    fn load(
        &self,
        path: &Path,
        embedding_model: Option<&str>,
    ) -> Result<Box<dyn DocumentIndex>, IndexError> {
        Ok(Box::new(FlatIndex::load(path, embedding_model)?))
    }
}
