//! Profile storage
//!
//! Named model-loading and query-generation profiles, kept in a single JSON
//! document that is read whole at startup and written whole on every change.

use crate::storage::{get_data_dir, StorageError};
use crate::types::config::{GenerationConfig, ModelConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the profile file location
pub const PROFILES_ENV: &str = "DOCASSIST_PROFILES";

/// The persisted profile document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profiles {
    #[serde(default)]
    pub model_profiles: BTreeMap<String, ModelConfig>,
    #[serde(default)]
    pub query_profiles: BTreeMap<String, GenerationConfig>,
    #[serde(default)]
    pub selected_model: Option<String>,
    #[serde(default)]
    pub selected_query_profile: Option<String>,
}

impl Profiles {
    /// Clamp stored generation parameters and drop dangling selections
    pub fn validate(&mut self) {
        for config in self.query_profiles.values_mut() {
            config.sanitize();
        }

        if let Some(name) = &self.selected_model {
            if !self.model_profiles.contains_key(name) {
                tracing::warn!("Selected model profile {} no longer exists", name);
                self.selected_model = None;
            }
        }
        if let Some(name) = &self.selected_query_profile {
            if !self.query_profiles.contains_key(name) {
                tracing::warn!("Selected query profile {} no longer exists", name);
                self.selected_query_profile = None;
            }
        }
    }
}

/// Profile document bound to its file
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    profiles: Profiles,
}

impl ProfileStore {
    /// Profile file location: `$DOCASSIST_PROFILES` or `<data dir>/profiles.json`
    pub fn default_path() -> Result<PathBuf, StorageError> {
        if let Ok(path) = std::env::var(PROFILES_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        Ok(get_data_dir()?.join("profiles.json"))
    }

    /// Open the store at `path`.
    ///
    /// Returns empty profiles if the file doesn't exist or is corrupted
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profiles = match load_profiles(&path) {
            Ok(profiles) => profiles,
            Err(e) => {
                tracing::warn!("Failed to load profiles, using defaults: {}", e);
                Profiles::default()
            }
        };
        Self { path, profiles }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profiles(&self) -> &Profiles {
        &self.profiles
    }

    /// Write the whole document to disk
    pub fn save(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.profiles)?;
        fs::write(&self.path, json)?;

        tracing::debug!("Saved profiles to {}", self.path.display());
        Ok(())
    }

    pub fn add_model_profile(
        &mut self,
        name: &str,
        config: ModelConfig,
    ) -> Result<(), StorageError> {
        let name = profile_name(name)?;
        if self.profiles.model_profiles.contains_key(&name) {
            return Err(StorageError::DuplicateProfile(name));
        }
        self.profiles.model_profiles.insert(name, config);
        self.save()
    }

    pub fn update_model_profile(
        &mut self,
        name: &str,
        config: ModelConfig,
    ) -> Result<(), StorageError> {
        let entry = self
            .profiles
            .model_profiles
            .get_mut(name)
            .ok_or_else(|| StorageError::UnknownProfile(name.to_string()))?;
        *entry = config;
        self.save()
    }

    /// Removal is persisted with the next save
    pub fn remove_model_profile(&mut self, name: &str) -> Option<ModelConfig> {
        if self.profiles.selected_model.as_deref() == Some(name) {
            self.profiles.selected_model = None;
        }
        self.profiles.model_profiles.remove(name)
    }

    pub fn add_query_profile(
        &mut self,
        name: &str,
        mut config: GenerationConfig,
    ) -> Result<(), StorageError> {
        let name = profile_name(name)?;
        if self.profiles.query_profiles.contains_key(&name) {
            return Err(StorageError::DuplicateProfile(name));
        }
        config.sanitize();
        self.profiles.query_profiles.insert(name, config);
        self.save()
    }

    pub fn update_query_profile(
        &mut self,
        name: &str,
        mut config: GenerationConfig,
    ) -> Result<(), StorageError> {
        let entry = self
            .profiles
            .query_profiles
            .get_mut(name)
            .ok_or_else(|| StorageError::UnknownProfile(name.to_string()))?;
        config.sanitize();
        *entry = config;
        self.save()
    }

    /// Removal is persisted with the next save
    pub fn remove_query_profile(&mut self, name: &str) -> Option<GenerationConfig> {
        if self.profiles.selected_query_profile.as_deref() == Some(name) {
            self.profiles.selected_query_profile = None;
        }
        self.profiles.query_profiles.remove(name)
    }

    pub fn select_model(&mut self, name: &str) -> Result<(), StorageError> {
        if !self.profiles.model_profiles.contains_key(name) {
            return Err(StorageError::UnknownProfile(name.to_string()));
        }
        self.profiles.selected_model = Some(name.to_string());
        Ok(())
    }

    pub fn select_query_profile(&mut self, name: &str) -> Result<(), StorageError> {
        if !self.profiles.query_profiles.contains_key(name) {
            return Err(StorageError::UnknownProfile(name.to_string()));
        }
        self.profiles.selected_query_profile = Some(name.to_string());
        Ok(())
    }

    pub fn model_profile(&self, name: &str) -> Option<&ModelConfig> {
        self.profiles.model_profiles.get(name)
    }

    pub fn selected_model(&self) -> Option<(&str, &ModelConfig)> {
        let name = self.profiles.selected_model.as_deref()?;
        self.profiles
            .model_profiles
            .get(name)
            .map(|config| (name, config))
    }

    pub fn selected_query_profile(&self) -> Option<(&str, &GenerationConfig)> {
        let name = self.profiles.selected_query_profile.as_deref()?;
        self.profiles
            .query_profiles
            .get(name)
            .map(|config| (name, config))
    }
}

fn profile_name(name: &str) -> Result<String, StorageError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StorageError::EmptyProfileName);
    }
    Ok(name.to_string())
}

fn load_profiles(path: &Path) -> Result<Profiles, StorageError> {
    if !path.exists() {
        tracing::info!("Profile file not found, starting with no profiles");
        return Ok(Profiles::default());
    }

    let json = fs::read_to_string(path)?;
    let mut profiles: Profiles = serde_json::from_str(&json)?;
    profiles.validate();

    tracing::debug!(
        "Loaded {} model and {} query profiles",
        profiles.model_profiles.len(),
        profiles.query_profiles.len()
    );
    Ok(profiles)
}
