//! Document ingestion
//!
//! Source conversion, chunking, embedding and the searchable index built over
//! the chunks.

pub mod converter;
pub mod embedding;
pub mod index;
pub mod splitter;

use std::path::PathBuf;

use thiserror::Error;

pub use converter::{convert, SourceKind};
pub use embedding::{HashingEmbedder, DEFAULT_EMBEDDING_MODEL};
pub use index::{DocumentIndex, FlatIndex, FlatIndexBackend, IndexBackend};
pub use splitter::RecursiveSplitter;

/// Errors raised while turning a source into text
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract text from {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Invalid pattern: {0}")]
    Pattern(String),
}

/// Errors raised by embedding or index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid index file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown embedding model {0}")]
    UnknownEmbeddingModel(String),

    #[error("Index was built with {stored}, not {requested}")]
    ModelMismatch { requested: String, stored: String },

    #[error("Corrupt index: {0}")]
    Corrupt(String),
}
