//! Foreground actor
//!
//! Turns command lines into requests for the worker and keeps the profile
//! store. Nothing here waits on a request to finish; results arrive later as
//! notifications.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::documents::FlatIndexBackend;
use crate::inference::ModelBackend;
use crate::storage::{ProfileStore, StorageError};
use crate::types::config::{EngineConfig, GenerationConfig, ModelConfig};
use crate::types::notification::{Notification, Notifier};
use crate::types::request::{Request, ValidationError};
use crate::worker::{Worker, WorkerError, WorkerHandle};

/// Supporting chunks retrieved per query
pub const DEFAULT_MATCH_COUNT: usize = 4;
pub const MAX_MATCH_COUNT: usize = 20;

/// Prefix of the optional embedding model argument to `:docs` and `:load-index`
const EMBEDDING_PREFIX: &str = "embedding=";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn usage(text: &str) -> AppError {
    AppError::Usage(format!("Usage: {text}"))
}

/// One line of user input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Load the named model profile, or the selected one
    LoadModel(Option<String>),
    AddModel {
        name: String,
        path: PathBuf,
        cpu_only: bool,
    },
    /// Change fields of a model profile, keyed by their profile-file names
    EditModel {
        name: String,
        settings: Vec<(String, String)>,
    },
    RemoveModel(String),
    AddQueryProfile(String),
    EditQueryProfile {
        name: String,
        settings: Vec<(String, String)>,
    },
    RemoveQueryProfile(String),
    SelectQueryProfile(String),
    SetMatchCount(usize),
    LoadDocuments {
        chunk_size: usize,
        chunk_overlap: usize,
        sources: Vec<String>,
        embedding_model: Option<String>,
    },
    SaveIndex(PathBuf),
    LoadIndex {
        path: PathBuf,
        embedding_model: Option<String>,
    },
    Stop,
    ListProfiles,
    Quit,
    Query(String),
}

impl Command {
    /// Parse a line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>, AppError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if !line.starts_with(':') {
            return Ok(Some(Command::Query(line.to_string())));
        }

        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let command = match (name, args.as_slice()) {
            (":model", []) => Command::LoadModel(None),
            (":model", [profile]) => Command::LoadModel(Some(profile.to_string())),
            (":model", _) => return Err(usage(":model [name]")),

            (":add-model", [profile, path]) => Command::AddModel {
                name: profile.to_string(),
                path: PathBuf::from(path),
                cpu_only: false,
            },
            (":add-model", [profile, path, "cpu"]) => Command::AddModel {
                name: profile.to_string(),
                path: PathBuf::from(path),
                cpu_only: true,
            },
            (":add-model", _) => return Err(usage(":add-model name path [cpu]")),

            (":set-model", [profile, settings @ ..]) if !settings.is_empty() => {
                Command::EditModel {
                    name: profile.to_string(),
                    settings: parse_settings(settings, ":set-model name key=value...")?,
                }
            }
            (":set-model", _) => return Err(usage(":set-model name key=value...")),
            (":remove-model", [profile]) => Command::RemoveModel(profile.to_string()),
            (":remove-model", _) => return Err(usage(":remove-model name")),

            (":add-query", [profile]) => Command::AddQueryProfile(profile.to_string()),
            (":add-query", _) => return Err(usage(":add-query name")),
            (":set-query", [profile, settings @ ..]) if !settings.is_empty() => {
                Command::EditQueryProfile {
                    name: profile.to_string(),
                    settings: parse_settings(settings, ":set-query name key=value...")?,
                }
            }
            (":set-query", _) => return Err(usage(":set-query name key=value...")),
            (":remove-query", [profile]) => Command::RemoveQueryProfile(profile.to_string()),
            (":remove-query", _) => return Err(usage(":remove-query name")),
            (":select-query", [profile]) => Command::SelectQueryProfile(profile.to_string()),
            (":select-query", _) => return Err(usage(":select-query name")),

            (":matches", [count]) => {
                let count = count
                    .parse::<usize>()
                    .ok()
                    .filter(|c| (1..=MAX_MATCH_COUNT).contains(c))
                    .ok_or_else(|| usage(":matches 1-20"))?;
                Command::SetMatchCount(count)
            }
            (":matches", _) => return Err(usage(":matches 1-20")),

            (":docs", [size, overlap, rest @ ..]) => {
                const DOCS_USAGE: &str =
                    ":docs chunk-size chunk-overlap [embedding=model] path...";
                let parse = |value: &str| value.parse::<usize>().map_err(|_| usage(DOCS_USAGE));
                let (embedding_model, sources) = split_embedding(rest);
                Command::LoadDocuments {
                    chunk_size: parse(size)?,
                    chunk_overlap: parse(overlap)?,
                    sources,
                    embedding_model,
                }
            }
            (":docs", _) => {
                return Err(usage(
                    ":docs chunk-size chunk-overlap [embedding=model] path...",
                ))
            }

            (":save-index", [path]) => Command::SaveIndex(PathBuf::from(path)),
            (":save-index", _) => return Err(usage(":save-index path")),
            (":load-index", [path, rest @ ..]) => {
                let (embedding_model, extra) = split_embedding(rest);
                if !extra.is_empty() {
                    return Err(usage(":load-index path [embedding=model]"));
                }
                Command::LoadIndex {
                    path: PathBuf::from(path),
                    embedding_model,
                }
            }
            (":load-index", _) => return Err(usage(":load-index path [embedding=model]")),

            (":stop", []) => Command::Stop,
            (":profiles", []) => Command::ListProfiles,
            (":quit", []) => Command::Quit,

            (other, _) => return Err(AppError::Usage(format!("Unknown command {other}"))),
        };
        Ok(Some(command))
    }
}

fn parse_settings(words: &[&str], text: &str) -> Result<Vec<(String, String)>, AppError> {
    words
        .iter()
        .map(|word| match word.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(usage(text)),
        })
        .collect()
}

/// Pull an `embedding=model` word out of an argument list
fn split_embedding(words: &[&str]) -> (Option<String>, Vec<String>) {
    let mut embedding_model = None;
    let mut rest = Vec::new();
    for word in words {
        match word.strip_prefix(EMBEDDING_PREFIX) {
            Some(model) if !model.is_empty() => embedding_model = Some(model.to_string()),
            _ => rest.push(word.to_string()),
        }
    }
    (embedding_model, rest)
}

/// Apply `key=value` edits to a profile through its serialized form.
///
/// Keys are the camelCase names used in the profile file; nested fields use
/// dots (`quantization.bits`). Values are read as JSON, falling back to a
/// plain string.
pub fn apply_settings<T>(config: &T, settings: &[(String, String)]) -> Result<T, AppError>
where
    T: Serialize + DeserializeOwned,
{
    let invalid = |detail: String| AppError::Usage(detail);
    let mut document = serde_json::to_value(config)
        .map_err(|e| invalid(format!("Could not read profile: {e}")))?;

    for (key, raw) in settings {
        let mut field = &mut document;
        for part in key.split('.') {
            field = field
                .as_object_mut()
                .and_then(|object| object.get_mut(part))
                .ok_or_else(|| invalid(format!("Unknown setting {key}")))?;
        }
        *field = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
    }

    serde_json::from_value(document).map_err(|e| invalid(format!("Invalid setting: {e}")))
}

/// What running a command produced
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A request was queued for the worker
    Submitted(Uuid),
    Done,
    /// Lines to show the user
    Report(Vec<String>),
    Quit,
}

pub struct App {
    profiles: ProfileStore,
    worker: WorkerHandle,
    match_count: usize,
}

impl App {
    /// Start the worker with the built-in index and every compiled-in model loader
    pub fn start(
        profiles: ProfileStore,
        engine: EngineConfig,
    ) -> Result<(Self, UnboundedReceiver<Notification>), AppError> {
        let (notifier, rx) = Notifier::channel();
        let worker = Worker::spawn(
            engine,
            ModelBackend::default(),
            Box::new(FlatIndexBackend),
            notifier,
        )?;
        Ok((Self::with_worker(profiles, worker), rx))
    }

    pub fn with_worker(profiles: ProfileStore, worker: WorkerHandle) -> Self {
        tracing::info!("Using profiles at {}", profiles.path().display());
        Self {
            profiles,
            worker,
            match_count: DEFAULT_MATCH_COUNT,
        }
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn match_count(&self) -> usize {
        self.match_count
    }

    pub fn execute(&mut self, command: Command) -> Result<Outcome, AppError> {
        match command {
            Command::LoadModel(name) => {
                if let Some(name) = name {
                    self.profiles.select_model(&name)?;
                    self.profiles.save()?;
                }
                let (_, config) = self
                    .profiles
                    .selected_model()
                    .ok_or_else(|| AppError::Usage("No model profile selected".to_string()))?;
                self.submit(Request::load_model(config.clone())?)
            }
            Command::AddModel {
                name,
                path,
                cpu_only,
            } => {
                let mut config = ModelConfig::new(path);
                if cpu_only {
                    config.use_cpu = true;
                    config.auto_device = false;
                }
                config.validate()?;
                self.profiles.add_model_profile(&name, config)?;
                if self.profiles.selected_model().is_none() {
                    self.profiles.select_model(name.trim())?;
                    self.profiles.save()?;
                }
                Ok(Outcome::Done)
            }
            Command::AddQueryProfile(name) => {
                self.profiles
                    .add_query_profile(&name, GenerationConfig::default())?;
                if self.profiles.selected_query_profile().is_none() {
                    self.profiles.select_query_profile(name.trim())?;
                    self.profiles.save()?;
                }
                Ok(Outcome::Done)
            }
            Command::EditModel { name, settings } => {
                let current = self
                    .profiles
                    .model_profile(&name)
                    .ok_or_else(|| StorageError::UnknownProfile(name.clone()))?;
                let config: ModelConfig = apply_settings(current, &settings)?;
                config.validate()?;
                self.profiles.update_model_profile(&name, config)?;
                Ok(Outcome::Done)
            }
            Command::RemoveModel(name) => {
                self.profiles
                    .remove_model_profile(&name)
                    .ok_or(StorageError::UnknownProfile(name))?;
                self.profiles.save()?;
                Ok(Outcome::Done)
            }
            Command::EditQueryProfile { name, settings } => {
                let current = self
                    .profiles
                    .profiles()
                    .query_profiles
                    .get(&name)
                    .ok_or_else(|| StorageError::UnknownProfile(name.clone()))?;
                let config: GenerationConfig = apply_settings(current, &settings)?;
                self.profiles.update_query_profile(&name, config)?;
                Ok(Outcome::Done)
            }
            Command::RemoveQueryProfile(name) => {
                self.profiles
                    .remove_query_profile(&name)
                    .ok_or(StorageError::UnknownProfile(name))?;
                self.profiles.save()?;
                Ok(Outcome::Done)
            }
            Command::SetMatchCount(count) => {
                self.match_count = count.clamp(1, MAX_MATCH_COUNT);
                Ok(Outcome::Done)
            }
            Command::SelectQueryProfile(name) => {
                self.profiles.select_query_profile(&name)?;
                self.profiles.save()?;
                Ok(Outcome::Done)
            }
            Command::LoadDocuments {
                chunk_size,
                chunk_overlap,
                sources,
                embedding_model,
            } => self.submit(Request::load_documents(
                sources,
                chunk_size,
                chunk_overlap,
                embedding_model,
            )?),
            Command::SaveIndex(path) => self.submit(Request::save_index(path)?),
            Command::LoadIndex {
                path,
                embedding_model,
            } => self.submit(Request::load_index(path, embedding_model)?),
            Command::Stop => {
                self.worker.cancel_query();
                Ok(Outcome::Done)
            }
            Command::ListProfiles => Ok(Outcome::Report(self.profile_summary())),
            Command::Quit => Ok(Outcome::Quit),
            Command::Query(text) => {
                let config = self
                    .profiles
                    .selected_query_profile()
                    .map(|(_, config)| config.clone())
                    .unwrap_or_default();
                self.submit(Request::query(text, config, self.match_count)?)
            }
        }
    }

    fn submit(&self, request: Request) -> Result<Outcome, AppError> {
        let kind = request.kind();
        let id = self.worker.submit(request)?;
        tracing::debug!(%id, %kind, "Queued request");
        Ok(Outcome::Submitted(id))
    }

    /// Model and query profiles, selected ones marked with `*`
    pub fn profile_summary(&self) -> Vec<String> {
        let profiles = self.profiles.profiles();
        let marker = |selected: &Option<String>, name: &str| {
            if selected.as_deref() == Some(name) {
                "*"
            } else {
                " "
            }
        };

        let mut lines = vec![format!("Matches per query: {}", self.match_count)];
        lines.push("Model profiles:".to_string());
        for (name, config) in &profiles.model_profiles {
            lines.push(format!(
                "{} {} ({})",
                marker(&profiles.selected_model, name),
                name,
                config.model_path.display()
            ));
        }
        lines.push("Query profiles:".to_string());
        for (name, config) in &profiles.query_profiles {
            lines.push(format!(
                "{} {} (temperature {}, max new tokens {})",
                marker(&profiles.selected_query_profile, name),
                name,
                config.temperature,
                config.max_new_tokens
            ));
        }
        lines
    }

    /// Terminate the worker, wait for it, then persist the profiles
    pub fn shutdown(self) -> Result<(), AppError> {
        self.worker.shutdown()?;
        self.profiles.save()?;
        tracing::info!("Shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::mock::{EventLog, MockLoader};

    fn test_app(
        dir: &tempfile::TempDir,
        tokens: &[&str],
    ) -> (App, UnboundedReceiver<Notification>, EventLog) {
        let events = EventLog::default();
        let (notifier, rx) = Notifier::channel();
        let engine = EngineConfig {
            bridge_poll_ms: 5,
            ..EngineConfig::default()
        };
        let worker = Worker::spawn(
            engine,
            ModelBackend::empty().with_loader(MockLoader::new(events.clone(), tokens)),
            Box::new(FlatIndexBackend),
            notifier,
        )
        .unwrap();
        let profiles = ProfileStore::open(dir.path().join("profiles.json"));
        (App::with_worker(profiles, worker), rx, events)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(
            Command::parse("What is Rust?").unwrap(),
            Some(Command::Query("What is Rust?".to_string()))
        );
        assert_eq!(
            Command::parse(":model").unwrap(),
            Some(Command::LoadModel(None))
        );
        assert_eq!(
            Command::parse(":add-model small /models/small.gguf cpu").unwrap(),
            Some(Command::AddModel {
                name: "small".to_string(),
                path: PathBuf::from("/models/small.gguf"),
                cpu_only: true,
            })
        );
        assert_eq!(
            Command::parse(":docs 1000 100 a.pdf b.txt").unwrap(),
            Some(Command::LoadDocuments {
                chunk_size: 1000,
                chunk_overlap: 100,
                sources: vec!["a.pdf".to_string(), "b.txt".to_string()],
                embedding_model: None,
            })
        );
        assert_eq!(
            Command::parse(":docs 500 50 embedding=ngram-hash-128 a.pdf").unwrap(),
            Some(Command::LoadDocuments {
                chunk_size: 500,
                chunk_overlap: 50,
                sources: vec!["a.pdf".to_string()],
                embedding_model: Some("ngram-hash-128".to_string()),
            })
        );
        assert_eq!(
            Command::parse(":load-index idx.json embedding=ngram-hash-128").unwrap(),
            Some(Command::LoadIndex {
                path: PathBuf::from("idx.json"),
                embedding_model: Some("ngram-hash-128".to_string()),
            })
        );
        assert_eq!(
            Command::parse(":set-query precise temperature=0.1 doSample=false").unwrap(),
            Some(Command::EditQueryProfile {
                name: "precise".to_string(),
                settings: vec![
                    ("temperature".to_string(), "0.1".to_string()),
                    ("doSample".to_string(), "false".to_string()),
                ],
            })
        );
        assert_eq!(
            Command::parse(":matches 8").unwrap(),
            Some(Command::SetMatchCount(8))
        );
        assert_eq!(Command::parse(":quit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        assert!(matches!(
            Command::parse(":docs many 100 a.pdf"),
            Err(AppError::Usage(_))
        ));
        assert!(Command::parse(":save-index").is_err());
        assert!(Command::parse(":matches 0").is_err());
        assert!(Command::parse(":matches 21").is_err());
        assert!(Command::parse(":set-query precise").is_err());
        assert!(Command::parse(":set-model m temperature").is_err());
        assert!(Command::parse(":frobnicate").is_err());
    }

    #[test]
    fn test_add_model_selects_first_profile() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("first.gguf");
        std::fs::write(&model, "weights").unwrap();
        let (mut app, _rx, _) = test_app(&dir, &[]);

        app.execute(Command::AddModel {
            name: "first".to_string(),
            path: model,
            cpu_only: true,
        })
        .unwrap();

        let (name, config) = app.profiles().selected_model().unwrap();
        assert_eq!(name, "first");
        assert!(config.use_cpu);
        assert!(!config.auto_device);

        let summary = app.profile_summary();
        assert!(summary.iter().any(|l| l.starts_with("* first")));
        app.shutdown().unwrap();

        let reopened = ProfileStore::open(dir.path().join("profiles.json"));
        assert_eq!(reopened.selected_model().unwrap().0, "first");
    }

    #[test]
    fn test_load_model_without_profile() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx, events) = test_app(&dir, &[]);
        assert!(matches!(
            app.execute(Command::LoadModel(None)),
            Err(AppError::Usage(_))
        ));
        app.shutdown().unwrap();
        assert!(events.events().is_empty());
    }

    #[test]
    fn test_commands_reach_worker() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("m.gguf");
        let doc = dir.path().join("notes.txt");
        std::fs::write(&model, "weights").unwrap();
        std::fs::write(&doc, "Tokio is an async runtime.").unwrap();
        let (mut app, mut rx, events) = test_app(&dir, &["An", " async", " runtime"]);

        app.execute(Command::AddModel {
            name: "m".to_string(),
            path: model,
            cpu_only: false,
        })
        .unwrap();
        app.execute(Command::AddQueryProfile("precise".to_string()))
            .unwrap();
        assert!(matches!(
            app.execute(Command::LoadModel(None)).unwrap(),
            Outcome::Submitted(_)
        ));
        app.execute(Command::LoadDocuments {
            chunk_size: 500,
            chunk_overlap: 50,
            sources: vec![doc.display().to_string()],
            embedding_model: None,
        })
        .unwrap();
        app.execute(Command::parse("What is Tokio?").unwrap().unwrap())
            .unwrap();
        assert_eq!(app.execute(Command::Quit).unwrap(), Outcome::Quit);
        app.shutdown().unwrap();

        let mut answer = String::new();
        while let Ok(n) = rx.try_recv() {
            if n.is_answer() {
                answer.push_str(&n.text);
            }
        }
        assert_eq!(answer, "\nWhat is Tokio?\nAn async runtime\n\n");
        assert_eq!(events.events()[0], "load:m.gguf");
    }

    #[test]
    fn test_edit_query_profile() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx, _) = test_app(&dir, &[]);
        app.execute(Command::AddQueryProfile("precise".to_string()))
            .unwrap();
        app.execute(
            Command::parse(":set-query precise temperature=0.1 topK=5 doSample=false maxNewTokens=64")
                .unwrap()
                .unwrap(),
        )
        .unwrap();

        let (_, config) = app.profiles().selected_query_profile().unwrap();
        assert!((config.temperature - 0.1).abs() < 0.001);
        assert_eq!(config.top_k, 5);
        assert!(!config.do_sample);
        assert_eq!(config.max_new_tokens, 64);

        // Out-of-range values are clamped on the way in
        app.execute(Command::parse(":set-query precise temperature=9").unwrap().unwrap())
            .unwrap();
        let (_, config) = app.profiles().selected_query_profile().unwrap();
        assert_eq!(config.temperature, 2.0);

        assert!(matches!(
            app.execute(Command::parse(":set-query precise warmth=1").unwrap().unwrap()),
            Err(AppError::Usage(_))
        ));
        assert!(matches!(
            app.execute(Command::parse(":set-query nobody topK=1").unwrap().unwrap()),
            Err(AppError::Storage(StorageError::UnknownProfile(_)))
        ));
        app.shutdown().unwrap();

        let reopened = ProfileStore::open(dir.path().join("profiles.json"));
        let (_, config) = reopened.selected_query_profile().unwrap();
        assert_eq!(config.top_k, 5);
    }

    #[test]
    fn test_edit_and_remove_model_profile() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("m.gguf");
        std::fs::write(&model, "weights").unwrap();
        let (mut app, _rx, _) = test_app(&dir, &[]);
        app.execute(Command::AddModel {
            name: "m".to_string(),
            path: model,
            cpu_only: false,
        })
        .unwrap();

        app.execute(
            Command::parse(":set-model m autoDevice=false gpuMemory={\"0\":8000} precision=float16 quantization.bits=8")
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        let config = app.profiles().model_profile("m").unwrap();
        assert!(!config.auto_device);
        assert_eq!(config.gpu_memory.get(&0), Some(&8000));
        assert_eq!(config.precision, crate::types::config::Precision::Float16);
        assert_eq!(config.quantization.bits, 8);

        // Validation still applies to edited profiles
        assert!(matches!(
            app.execute(Command::parse(":set-model m quantization.bits=5").unwrap().unwrap()),
            Err(AppError::Validation(_))
        ));
        assert_eq!(app.profiles().model_profile("m").unwrap().quantization.bits, 8);

        app.execute(Command::RemoveModel("m".to_string())).unwrap();
        assert!(app.profiles().model_profile("m").is_none());
        assert!(app.profiles().selected_model().is_none());
        assert!(app.execute(Command::RemoveModel("m".to_string())).is_err());
        app.shutdown().unwrap();
    }

    #[test]
    fn test_match_count_reaches_query() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("m.gguf");
        std::fs::write(&model, "weights").unwrap();
        let doc = dir.path().join("notes.txt");
        std::fs::write(&doc, "alpha one\n\nbeta two\n\ngamma three").unwrap();
        let (mut app, _rx, events) = test_app(&dir, &["ok"]);

        app.execute(Command::AddModel {
            name: "m".to_string(),
            path: model,
            cpu_only: false,
        })
        .unwrap();
        app.execute(Command::LoadModel(None)).unwrap();
        let docs = format!(":docs 12 0 embedding=ngram-hash-64 {}", doc.display());
        app.execute(Command::parse(&docs).unwrap().unwrap()).unwrap();
        app.execute(Command::SetMatchCount(1)).unwrap();
        assert_eq!(app.match_count(), 1);
        app.execute(Command::Query("alpha".to_string())).unwrap();
        app.shutdown().unwrap();

        let prompt = events
            .events()
            .into_iter()
            .find(|e| e.starts_with("prompt:"))
            .unwrap();
        // Only one of the three chunks made it into the context
        let included = ["alpha one", "beta two", "gamma three"]
            .iter()
            .filter(|chunk| prompt.contains(*chunk))
            .count();
        assert_eq!(included, 1);
    }

    #[test]
    fn test_apply_settings_rejects_bad_values() {
        let config = GenerationConfig::default();
        let edited =
            apply_settings(&config, &[("numBeams".to_string(), "3".to_string())]).unwrap();
        assert_eq!(edited.num_beams, 3);
        assert!(apply_settings(&config, &[("numBeams".to_string(), "many".to_string())]).is_err());
        assert!(apply_settings(&config, &[("topP.inner".to_string(), "1".to_string())]).is_err());
    }

    #[test]
    fn test_stop_is_harmless_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx, _) = test_app(&dir, &[]);
        assert_eq!(app.execute(Command::Stop).unwrap(), Outcome::Done);
        app.shutdown().unwrap();
    }
}
