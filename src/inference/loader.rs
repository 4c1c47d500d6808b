//! Loader selection
//!
//! A model path is mapped to a [`LoaderKind`] once, and the [`ModelBackend`]
//! dispatches to the loader registered for that kind.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::inference::model::{DeviceAllocation, LoadedModel, ModelError};
use crate::types::config::{ModelConfig, Precision, QuantizationParams};

/// Loading strategy for a model on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderKind {
    /// Pre-quantized GPTQ weights
    Gptq,
    /// Legacy llama.cpp ggmlv3 file, CPU only
    NativeCpu,
    /// llama.cpp GGUF file
    Gguf,
    /// Directory with a `config.json` and full weights
    Standard,
}

impl std::fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderKind::Gptq => write!(f, "GPTQ"),
            LoaderKind::NativeCpu => write!(f, "ggmlv3"),
            LoaderKind::Gguf => write!(f, "GGUF"),
            LoaderKind::Standard => write!(f, "standard"),
        }
    }
}

/// Substrings of the model path, checked in order
const PATH_MARKERS: &[(&[&str], LoaderKind)] = &[
    (&["GPTQ", "gptq"], LoaderKind::Gptq),
    (&["ggmlv3"], LoaderKind::NativeCpu),
    (&["gguf", "GGUF"], LoaderKind::Gguf),
];

impl LoaderKind {
    /// Pick a loader from the path alone. `None` means unknown model type.
    pub fn detect(path: &Path) -> Option<LoaderKind> {
        let text = path.to_string_lossy();
        for (markers, kind) in PATH_MARKERS {
            if markers.iter().any(|m| text.contains(m)) {
                return Some(*kind);
            }
        }

        if path.is_dir() && path.join("config.json").exists() {
            return Some(LoaderKind::Standard);
        }
        None
    }
}

/// How modules are spread over devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMode {
    /// The backend decides
    Auto,
    /// Placement follows the memory ceilings
    Mapped,
}

/// Device placement assembled from a model config
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePlacement {
    pub mode: PlacementMode,
    /// Ceilings keyed by GPU ordinal or `cpu`, e.g. `"8000MiB"`
    pub memory_limits: BTreeMap<String, String>,
    pub offload_folder: Option<PathBuf>,
    pub precision: Precision,
    pub quantization: QuantizationParams,
}

impl DevicePlacement {
    pub fn from_config(config: &ModelConfig) -> Self {
        let mut memory_limits: BTreeMap<String, String> = config
            .gpu_memory
            .iter()
            .map(|(index, mib)| (index.to_string(), format!("{mib}MiB")))
            .collect();
        if config.use_cpu {
            memory_limits.insert("cpu".to_string(), format!("{}MiB", config.max_cpu_memory));
        }

        let mode = if config.auto_device {
            PlacementMode::Auto
        } else {
            PlacementMode::Mapped
        };

        let offload_folder = if config.overflow_to_disk {
            config.overflow_path.clone()
        } else {
            None
        };

        Self {
            mode,
            memory_limits,
            offload_folder,
            precision: config.precision,
            quantization: config.quantization,
        }
    }

    /// Whether any module may land on a GPU
    pub fn uses_gpu(&self) -> bool {
        match self.mode {
            PlacementMode::Auto => true,
            PlacementMode::Mapped => self.memory_limits.keys().any(|k| k != "cpu"),
        }
    }
}

/// Resolve a GGUF model path. A directory stands for the first `*.gguf` file in it.
pub fn resolve_gguf_path(path: &Path) -> Result<PathBuf, ModelError> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }

    let pattern = path.join("*.gguf");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| ModelError::Load(e.to_string()))?
        .filter_map(Result::ok)
        .collect();
    files.sort();
    files
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::NoModelFile(path.to_path_buf()))
}

/// One loading strategy
pub trait ModelLoader: Send {
    fn kind(&self) -> LoaderKind;

    fn load(
        &self,
        config: &ModelConfig,
        placement: &DevicePlacement,
    ) -> Result<LoadedModel, ModelError>;
}

/// Registry of loaders, one per [`LoaderKind`]
pub struct ModelBackend {
    loaders: HashMap<LoaderKind, Box<dyn ModelLoader>>,
}

impl ModelBackend {
    /// A backend with no loaders registered
    pub fn empty() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Register `loader`, replacing any loader of the same kind
    pub fn with_loader(mut self, loader: impl ModelLoader + 'static) -> Self {
        self.loaders.insert(loader.kind(), Box::new(loader));
        self
    }

    pub fn supports(&self, kind: LoaderKind) -> bool {
        self.loaders.contains_key(&kind)
    }

    pub fn load(&self, config: &ModelConfig) -> Result<LoadedModel, ModelError> {
        let kind = LoaderKind::detect(&config.model_path)
            .ok_or_else(|| ModelError::UnknownModelType(config.model_path.clone()))?;
        let loader = self
            .loaders
            .get(&kind)
            .ok_or(ModelError::LoaderUnavailable(kind))?;

        let placement = DevicePlacement::from_config(config);
        tracing::debug!(
            "Loading {} model with {:?} placement, limits {:?}, precision {}",
            kind,
            placement.mode,
            placement.memory_limits,
            placement.precision
        );

        loader.load(config, &placement)
    }
}

impl Default for ModelBackend {
    /// Every loader compiled into this build
    fn default() -> Self {
        let backend = Self::empty();
        #[cfg(feature = "llama")]
        let backend = backend.with_loader(crate::inference::llama::GgufLoader);
        backend
    }
}

/// Log lines describing where a model's modules were placed
pub fn allocation_summary(allocation: &[DeviceAllocation]) -> Vec<String> {
    allocation
        .iter()
        .map(|a| format!("Model allocations: {a}"))
        .collect()
}
