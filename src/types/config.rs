//! Configuration types
//!
//! Model-loading, generation and engine configuration structures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::request::ValidationError;

/// Numeric precision (or weight quantization) used when placing a model on a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Float32,
    Float16,
    /// 8-bit weights, fp32 CPU offload allowed
    Int8,
    /// 4-bit NF4 weights with double quantization
    Int4,
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precision::Float32 => write!(f, "fp32"),
            Precision::Float16 => write!(f, "fp16"),
            Precision::Int8 => write!(f, "int8"),
            Precision::Int4 => write!(f, "int4"),
        }
    }
}

/// Parameters for pre-quantized (GPTQ) weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantizationParams {
    /// Weight bit width
    pub bits: u32,
    /// Quantization group size (0 = per-column)
    pub group_size: u32,
}

impl Default for QuantizationParams {
    fn default() -> Self {
        Self {
            bits: 4,
            group_size: 128,
        }
    }
}

/// Everything needed to load a model. Stored as a named model profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Model file or directory
    pub model_path: PathBuf,
    /// Directory that receives weights which do not fit in memory
    #[serde(default)]
    pub overflow_path: Option<PathBuf>,
    #[serde(default)]
    pub overflow_to_disk: bool,
    /// Let the backend decide module placement instead of using the memory ceilings
    #[serde(default = "default_true")]
    pub auto_device: bool,
    /// Allow modules to be placed in host memory
    #[serde(default, rename = "useCPU")]
    pub use_cpu: bool,
    /// Host memory ceiling in MiB
    #[serde(default = "default_cpu_memory")]
    pub max_cpu_memory: u64,
    /// Per-GPU memory ceilings in MiB, keyed by device ordinal
    #[serde(default)]
    pub gpu_memory: BTreeMap<u32, u64>,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub trust_remote_code: bool,
    /// Prefer safetensors serialization when both formats are present
    #[serde(default = "default_true")]
    pub use_safetensors: bool,
    #[serde(default)]
    pub use_triton: bool,
    #[serde(default)]
    pub quantization: QuantizationParams,
}

fn default_true() -> bool {
    true
}

fn default_cpu_memory() -> u64 {
    5000
}

impl ModelConfig {
    /// Create a config for `model_path` with default placement settings
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            overflow_path: None,
            overflow_to_disk: false,
            auto_device: true,
            use_cpu: false,
            max_cpu_memory: default_cpu_memory(),
            gpu_memory: BTreeMap::new(),
            precision: Precision::default(),
            trust_remote_code: false,
            use_safetensors: true,
            use_triton: false,
            quantization: QuantizationParams::default(),
        }
    }

    /// Check the config before a load request is queued
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(ValidationError::MissingField("model path"));
        }
        if !self.model_path.exists() {
            return Err(ValidationError::PathNotFound(self.model_path.clone()));
        }

        if self.overflow_to_disk {
            let overflow = self
                .overflow_path
                .as_ref()
                .ok_or(ValidationError::MissingField("overflow path"))?;
            if !overflow.exists() {
                return Err(ValidationError::PathNotFound(overflow.clone()));
            }
            if !overflow.is_dir() {
                return Err(ValidationError::NotADirectory(overflow.clone()));
            }
        }

        if !matches!(self.quantization.bits, 2 | 3 | 4 | 8) {
            return Err(ValidationError::OutOfRange {
                field: "quantization bits",
                detail: format!("{} (expected 2, 3, 4 or 8)", self.quantization.bits),
            });
        }

        Ok(())
    }
}

/// Sampling and decoding parameters for one query. Stored as a named query profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Nucleus sampling threshold (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling (0 = disabled)
    pub top_k: u32,
    /// Locally typical sampling threshold (1.0 = disabled)
    pub typical_p: f32,
    pub repetition_penalty: f32,
    pub encoder_repetition_penalty: f32,
    /// Forbid repeating n-grams of this size (0 = disabled)
    pub no_repeat_ngram_size: u32,
    pub min_length: u32,
    /// Contrastive search degeneration penalty (0.0 = disabled)
    pub penalty_alpha: f32,
    pub num_beams: u32,
    pub length_penalty: f32,
    pub early_stopping: bool,
    /// Sample from the distribution instead of greedy decoding
    pub do_sample: bool,
    pub max_new_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            typical_p: 1.0,
            repetition_penalty: 1.1,
            encoder_repetition_penalty: 1.0,
            no_repeat_ngram_size: 0,
            min_length: 0,
            penalty_alpha: 0.0,
            num_beams: 1,
            length_penalty: 1.0,
            early_stopping: false,
            do_sample: true,
            max_new_tokens: 512,
        }
    }
}

impl GenerationConfig {
    /// Clamp every parameter into its accepted range
    pub fn sanitize(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);
        self.typical_p = self.typical_p.clamp(0.0, 1.0);
        self.top_k = self.top_k.min(200);
        self.repetition_penalty = self.repetition_penalty.clamp(0.0, 2.0);
        self.encoder_repetition_penalty = self.encoder_repetition_penalty.clamp(0.0, 2.0);
        self.no_repeat_ngram_size = self.no_repeat_ngram_size.min(200);
        self.min_length = self.min_length.min(2000);
        self.penalty_alpha = self.penalty_alpha.clamp(0.0, 5.0);
        self.num_beams = self.num_beams.clamp(1, 20);
        self.length_penalty = self.length_penalty.clamp(-5.0, 5.0);
        self.max_new_tokens = self.max_new_tokens.clamp(1, 65536);

        // A minimum length longer than the budget could never be satisfied
        if self.min_length > self.max_new_tokens {
            tracing::warn!(
                "Minimum length {} exceeds max new tokens {}, capping",
                self.min_length,
                self.max_new_tokens
            );
            self.min_length = self.max_new_tokens;
        }
    }

    /// True when decoding should pick the most likely token at every step
    pub fn is_greedy(&self) -> bool {
        !self.do_sample || self.temperature < 0.01
    }
}

/// Tuning knobs for the request worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Tokens buffered between the generation thread and the relay before the producer waits
    pub bridge_capacity: usize,
    /// How long the relay waits for a token before re-checking the generation thread
    pub bridge_poll_ms: u64,
    /// Name given to the worker thread
    pub worker_thread_name: String,
    /// Name given to each per-query generation thread
    pub generation_thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bridge_capacity: 64,
            bridge_poll_ms: 250,
            worker_thread_name: "docassist-worker".to_string(),
            generation_thread_name: "docassist-generate".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn bridge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bridge_poll_ms.max(1))
    }
}
