//! Persistent storage
//!
//! This module handles persistence of model and query profiles.

pub mod profiles;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

pub use profiles::{ProfileStore, Profiles};

/// Errors raised while reading or writing persisted data
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not determine a data directory for this user")]
    NoDataDir,

    #[error("Profile {0} already exists")]
    DuplicateProfile(String),

    #[error("Profile {0} does not exist")]
    UnknownProfile(String),

    #[error("No profile name specified")]
    EmptyProfileName,
}

/// Per-user application data directory
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("org", "HungryGhost", "DocAssist")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
