//! GGUF models through llama.cpp
//!
//! The llama.cpp backend is initialized once per process. Each query gets a
//! fresh context that lives as long as its token stream.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use once_cell::sync::OnceCell;

use crate::inference::loader::{resolve_gguf_path, DevicePlacement, LoaderKind, ModelLoader};
use crate::inference::model::{
    DeviceAllocation, LanguageModel, LoadedModel, ModelError, TokenStream, Tokenizer,
};
use crate::inference::streaming::{take_utf8_prefix, CancelFlag};
use crate::types::config::{GenerationConfig, ModelConfig};

/// Offload every layer llama.cpp can place on the GPU
const ALL_LAYERS: u32 = 999;
const BATCH_SIZE: usize = 512;
const MIN_CONTEXT: u32 = 2048;
/// Window for the repetition penalty
const PENALTY_LAST_N: i32 = 64;

static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend() -> Result<&'static LlamaBackend, ModelError> {
    BACKEND.get_or_try_init(|| {
        tracing::info!("Initializing llama.cpp backend");
        LlamaBackend::init().map_err(|e| ModelError::BackendInit(e.to_string()))
    })
}

/// Loader for `.gguf` files
pub struct GgufLoader;

impl ModelLoader for GgufLoader {
    fn kind(&self) -> LoaderKind {
        LoaderKind::Gguf
    }

    fn load(
        &self,
        config: &ModelConfig,
        placement: &DevicePlacement,
    ) -> Result<LoadedModel, ModelError> {
        let path = resolve_gguf_path(&config.model_path)?;
        let backend = backend()?;

        let gpu_layers = if placement.uses_gpu() { ALL_LAYERS } else { 0 };
        let params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
        let model = LlamaModel::load_from_file(backend, &path, &params)
            .map_err(|e| ModelError::Load(e.to_string()))?;

        tracing::info!(
            "Loaded {} ({} params, {} vocab, {} ctx)",
            path.display(),
            model.n_params(),
            model.n_vocab(),
            model.n_ctx_train()
        );

        let layers = model.n_layer();
        let on_gpu = gpu_layers.min(layers);
        let mut allocation = Vec::new();
        if on_gpu > 0 {
            allocation.push(DeviceAllocation {
                device: "gpu".to_string(),
                modules: on_gpu,
            });
        }
        if layers > on_gpu {
            allocation.push(DeviceAllocation {
                device: "cpu".to_string(),
                modules: layers - on_gpu,
            });
        }

        let model = Arc::new(model);
        Ok(LoadedModel {
            model: Box::new(GgufModel {
                name: display_name(&path),
                model: Some(model.clone()),
            }),
            tokenizer: Some(Box::new(GgufTokenizer { model })),
            allocation,
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct GgufModel {
    name: String,
    model: Option<Arc<LlamaModel>>,
}

impl LanguageModel for GgufModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate<'a>(
        &'a self,
        prompt: &str,
        config: &GenerationConfig,
        cancel: CancelFlag,
    ) -> Result<TokenStream<'a>, ModelError> {
        let model = self.model.as_deref().ok_or(ModelError::Released)?;
        let backend = backend()?;

        let tokens = model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| ModelError::Tokenization(e.to_string()))?;
        if tokens.is_empty() {
            return Err(ModelError::Tokenization("empty prompt".to_string()));
        }

        let wanted = tokens.len() as u32 + config.max_new_tokens;
        let n_ctx = wanted.clamp(MIN_CONTEXT, model.n_ctx_train().max(MIN_CONTEXT));
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(BATCH_SIZE as u32);
        let mut ctx = model
            .new_context(backend, ctx_params)
            .map_err(|e| ModelError::Inference(format!("Failed to create context: {e}")))?;

        // Feed the prompt in batch-sized pieces; only the final token needs logits
        let mut logits_index = 0;
        let last = tokens.len() - 1;
        for (offset, piece) in tokens.chunks(BATCH_SIZE).enumerate() {
            let mut batch = LlamaBatch::new(BATCH_SIZE, 1);
            for (i, token) in piece.iter().enumerate() {
                let pos = offset * BATCH_SIZE + i;
                batch
                    .add(*token, pos as i32, &[0], pos == last)
                    .map_err(|e| ModelError::Inference(e.to_string()))?;
            }
            ctx.decode(&mut batch)
                .map_err(|e| ModelError::Inference(format!("Failed to decode prompt: {e}")))?;
            logits_index = batch.n_tokens() - 1;
        }

        Ok(Box::new(GgufTokens {
            ctx,
            model,
            sampler: build_sampler(config),
            position: tokens.len() as i32,
            logits_index,
            remaining: config.max_new_tokens,
            utf8: Vec::new(),
            cancel,
            done: false,
        }))
    }

    fn release(&mut self) {
        if self.model.take().is_some() {
            tracing::debug!("Released llama.cpp model {}", self.name);
        }
    }
}

fn build_sampler(config: &GenerationConfig) -> LlamaSampler {
    if config.is_greedy() {
        return LlamaSampler::greedy();
    }
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(PENALTY_LAST_N, config.repetition_penalty, 0.0, 0.0),
        LlamaSampler::top_k(config.top_k as i32),
        LlamaSampler::top_p(config.top_p, 1),
        LlamaSampler::temp(config.temperature),
        LlamaSampler::dist(seed()),
    ])
}

fn seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

struct GgufTokens<'a> {
    ctx: LlamaContext<'a>,
    model: &'a LlamaModel,
    sampler: LlamaSampler,
    position: i32,
    logits_index: i32,
    remaining: u32,
    utf8: Vec<u8>,
    cancel: CancelFlag,
    done: bool,
}

impl GgufTokens<'_> {
    fn finish(&mut self) -> Option<Result<String, ModelError>> {
        self.done = true;
        if self.utf8.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.utf8).into_owned();
        self.utf8.clear();
        Some(Ok(rest))
    }

    fn fail(&mut self, error: ModelError) -> Option<Result<String, ModelError>> {
        self.done = true;
        Some(Err(error))
    }

    fn advance(&mut self, token: LlamaToken) -> Result<(), ModelError> {
        let mut batch = LlamaBatch::new(1, 1);
        batch
            .add(token, self.position, &[0], true)
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        self.ctx
            .decode(&mut batch)
            .map_err(|e| ModelError::Inference(format!("Failed to decode: {e}")))?;
        self.position += 1;
        self.logits_index = 0;
        Ok(())
    }
}

impl Iterator for GgufTokens<'_> {
    type Item = Result<String, ModelError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.is_requested() || self.remaining == 0 {
                return self.finish();
            }

            let token = self.sampler.sample(&self.ctx, self.logits_index);
            self.sampler.accept(token);
            self.remaining -= 1;

            if self.model.is_eog_token(token) {
                return self.finish();
            }

            let bytes = match self.model.token_to_bytes(token, Special::Tokenize) {
                Ok(bytes) => bytes,
                Err(e) => return self.fail(ModelError::Inference(e.to_string())),
            };
            self.utf8.extend_from_slice(&bytes);
            let piece = take_utf8_prefix(&mut self.utf8);

            if let Err(e) = self.advance(token) {
                return self.fail(e);
            }
            if !piece.is_empty() {
                return Some(Ok(piece));
            }
        }
    }
}

struct GgufTokenizer {
    model: Arc<LlamaModel>,
}

impl Tokenizer for GgufTokenizer {
    fn token_count(&self, text: &str) -> Result<usize, ModelError> {
        self.model
            .str_to_token(text, AddBos::Never)
            .map(|tokens| tokens.len())
            .map_err(|e| ModelError::Tokenization(e.to_string()))
    }
}
