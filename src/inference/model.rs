//! Model handles
//!
//! The traits a loaded language model and its tokenizer implement, plus the
//! error type shared by every model backend.

use std::path::PathBuf;

use thiserror::Error;

use crate::inference::loader::LoaderKind;
use crate::inference::streaming::CancelFlag;
use crate::types::config::GenerationConfig;

/// Errors raised by model loaders and loaded models
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unable to load model, unknown model type: {}", .0.display())]
    UnknownModelType(PathBuf),

    #[error("No {0} loader is available in this build")]
    LoaderUnavailable(LoaderKind),

    #[error("No model file found in {}", .0.display())]
    NoModelFile(PathBuf),

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    Load(String),

    #[error("Model has been released")]
    Released,

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Lazily produced answer tokens
pub type TokenStream<'a> = Box<dyn Iterator<Item = Result<String, ModelError>> + 'a>;

/// A model resident in memory, ready to generate.
///
/// `generate` is called on the generation thread while the worker waits for
/// it, so implementations must be shareable across threads.
pub trait LanguageModel: Send + Sync {
    /// Display name, normally the model file name
    fn name(&self) -> &str;

    /// Start generating a continuation of `prompt`.
    ///
    /// The returned stream should stop early once `cancel` is requested.
    fn generate<'a>(
        &'a self,
        prompt: &str,
        config: &GenerationConfig,
        cancel: CancelFlag,
    ) -> Result<TokenStream<'a>, ModelError>;

    /// Free every device and host allocation held by the model
    fn release(&mut self);
}

/// Tokenizer paired with a loaded model
pub trait Tokenizer: Send + Sync {
    fn token_count(&self, text: &str) -> Result<usize, ModelError>;
}

/// Modules (layers) a loader placed on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAllocation {
    pub device: String,
    pub modules: u32,
}

impl std::fmt::Display for DeviceAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device: {}, modules: {}", self.device, self.modules)
    }
}

/// Result of a successful load
pub struct LoadedModel {
    pub model: Box<dyn LanguageModel>,
    pub tokenizer: Option<Box<dyn Tokenizer>>,
    pub allocation: Vec<DeviceAllocation>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model", &self.model.name())
            .field("tokenizer", &self.tokenizer.is_some())
            .field("allocation", &self.allocation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_display() {
        let allocation = DeviceAllocation {
            device: "cuda:0".to_string(),
            modules: 32,
        };
        assert_eq!(allocation.to_string(), "device: cuda:0, modules: 32");
    }

    #[test]
    fn test_unknown_model_type_message() {
        let err = ModelError::UnknownModelType(PathBuf::from("/models/thing.bin"));
        assert_eq!(
            err.to_string(),
            "Unable to load model, unknown model type: /models/thing.bin"
        );
    }
}
