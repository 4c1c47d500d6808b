//! Worker requests
//!
//! Every request is validated when it is built, so anything that reaches the
//! queue is well formed.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::config::{GenerationConfig, ModelConfig};

/// A request rejected before it was queued
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No {0} specified")]
    MissingField(&'static str),

    #[error("Path {} does not exist", .0.display())]
    PathNotFound(PathBuf),

    #[error("Path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("Invalid {field}: {detail}")]
    OutOfRange { field: &'static str, detail: String },
}

/// Load a model, replacing the current one
#[derive(Debug, Clone)]
pub struct LoadModel {
    config: ModelConfig,
}

impl LoadModel {
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

/// Convert documents to text and build a new index over them
#[derive(Debug, Clone)]
pub struct LoadDocuments {
    sources: Vec<String>,
    chunk_size: usize,
    chunk_overlap: usize,
    embedding_model: Option<String>,
}

impl LoadDocuments {
    /// Paths or URLs, in the order their text is concatenated
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }
}

/// Answer a question from the current index with the current model
#[derive(Debug, Clone)]
pub struct Query {
    text: String,
    config: GenerationConfig,
    match_count: usize,
}

impl Query {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Number of supporting chunks retrieved for the prompt
    pub fn match_count(&self) -> usize {
        self.match_count
    }
}

/// Persist the current index
#[derive(Debug, Clone)]
pub struct SaveIndex {
    path: PathBuf,
}

impl SaveIndex {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replace the current index with one restored from disk
#[derive(Debug, Clone)]
pub struct LoadIndex {
    path: PathBuf,
    embedding_model: Option<String>,
}

impl LoadIndex {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }
}

/// A unit of work for the request worker
#[derive(Debug, Clone)]
pub enum Request {
    LoadModel(LoadModel),
    LoadDocuments(LoadDocuments),
    Query(Query),
    SaveIndex(SaveIndex),
    LoadIndex(LoadIndex),
    /// Stop the worker once the request in flight (this one) completes
    Terminate,
}

/// Discriminant of a [`Request`], for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    LoadModel,
    LoadDocuments,
    Query,
    SaveIndex,
    LoadIndex,
    Terminate,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::LoadModel => write!(f, "load-model"),
            RequestKind::LoadDocuments => write!(f, "load-documents"),
            RequestKind::Query => write!(f, "query"),
            RequestKind::SaveIndex => write!(f, "save-index"),
            RequestKind::LoadIndex => write!(f, "load-index"),
            RequestKind::Terminate => write!(f, "terminate"),
        }
    }
}

impl Request {
    pub fn load_model(config: ModelConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Request::LoadModel(LoadModel { config }))
    }

    /// An empty source list is accepted and produces an empty index.
    pub fn load_documents(
        sources: Vec<String>,
        chunk_size: usize,
        chunk_overlap: usize,
        embedding_model: Option<String>,
    ) -> Result<Self, ValidationError> {
        if chunk_size == 0 {
            return Err(ValidationError::OutOfRange {
                field: "chunk size",
                detail: "must be positive".to_string(),
            });
        }
        if chunk_overlap >= chunk_size {
            return Err(ValidationError::OutOfRange {
                field: "chunk overlap",
                detail: format!("{chunk_overlap} must be smaller than chunk size {chunk_size}"),
            });
        }

        let sources = sources
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let embedding_model = embedding_model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        Ok(Request::LoadDocuments(LoadDocuments {
            sources,
            chunk_size,
            chunk_overlap,
            embedding_model,
        }))
    }

    /// The generation config is sanitized on the way in.
    pub fn query(
        text: impl Into<String>,
        mut config: GenerationConfig,
        match_count: usize,
    ) -> Result<Self, ValidationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError::MissingField("query text"));
        }
        if match_count == 0 {
            return Err(ValidationError::OutOfRange {
                field: "match count",
                detail: "must be at least 1".to_string(),
            });
        }
        config.sanitize();

        Ok(Request::Query(Query {
            text,
            config,
            match_count,
        }))
    }

    pub fn save_index(path: impl Into<PathBuf>) -> Result<Self, ValidationError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ValidationError::MissingField("index path"));
        }
        Ok(Request::SaveIndex(SaveIndex { path }))
    }

    pub fn load_index(
        path: impl Into<PathBuf>,
        embedding_model: Option<String>,
    ) -> Result<Self, ValidationError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ValidationError::MissingField("index path"));
        }
        if !path.exists() {
            return Err(ValidationError::PathNotFound(path));
        }
        Ok(Request::LoadIndex(LoadIndex {
            path,
            embedding_model: embedding_model.filter(|m| !m.trim().is_empty()),
        }))
    }

    pub fn terminate() -> Self {
        Request::Terminate
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Request::LoadModel(_) => RequestKind::LoadModel,
            Request::LoadDocuments(_) => RequestKind::LoadDocuments,
            Request::Query(_) => RequestKind::Query,
            Request::SaveIndex(_) => RequestKind::SaveIndex,
            Request::LoadIndex(_) => RequestKind::LoadIndex,
            Request::Terminate => RequestKind::Terminate,
        }
    }
}
