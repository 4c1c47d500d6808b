//! LLM inference
//!
//! Loader selection, the model and tokenizer interfaces, and the streaming
//! bridge that relays generated tokens off the generation thread.

#[cfg(feature = "llama")]
pub mod llama;
pub mod loader;
#[cfg(test)]
pub(crate) mod mock;
pub mod model;
pub mod prompt;
pub mod streaming;

pub use loader::{DevicePlacement, LoaderKind, ModelBackend, ModelLoader, PlacementMode};
pub use model::{DeviceAllocation, LanguageModel, LoadedModel, ModelError, Tokenizer};
pub use prompt::GenerationPrompt;
pub use streaming::{run_streamed, CancelFlag, StreamOutcome};
