//! Scripted model backend for tests

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::inference::loader::{DevicePlacement, LoaderKind, ModelLoader};
use crate::inference::model::{
    DeviceAllocation, LanguageModel, LoadedModel, ModelError, TokenStream, Tokenizer,
};
use crate::inference::streaming::CancelFlag;
use crate::types::config::{GenerationConfig, ModelConfig};

/// Shared, ordered record of backend events such as `load:a.gguf`
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct MockModel {
    name: String,
    tokens: Vec<String>,
    delay: Duration,
    fail_after: Option<usize>,
    events: EventLog,
}

impl MockModel {
    pub fn new(name: &str, tokens: &[&str]) -> Self {
        Self::from_tokens(name, tokens.iter().map(|t| t.to_string()).collect())
    }

    pub fn from_tokens(name: &str, tokens: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            tokens,
            delay: Duration::ZERO,
            fail_after: None,
            events: EventLog::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Yield `count` tokens, then an inference error
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }
}

impl LanguageModel for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate<'a>(
        &'a self,
        prompt: &str,
        _config: &GenerationConfig,
        cancel: CancelFlag,
    ) -> Result<TokenStream<'a>, ModelError> {
        self.events.push(format!("generate:{}", self.name));
        self.events.push(format!("prompt:{prompt}"));

        let delay = self.delay;
        let fail_after = self.fail_after;
        let stream = self
            .tokens
            .iter()
            .enumerate()
            .take_while(move |_| !cancel.is_requested())
            .map(move |(i, token)| {
                if fail_after == Some(i) {
                    return Err(ModelError::Inference("scripted failure".to_string()));
                }
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                Ok(token.clone())
            });
        Ok(Box::new(stream))
    }

    fn release(&mut self) {
        self.events.push(format!("release:{}", self.name));
    }
}

pub struct MockTokenizer;

impl Tokenizer for MockTokenizer {
    fn token_count(&self, text: &str) -> Result<usize, ModelError> {
        Ok(text.split_whitespace().count())
    }
}

/// Loader producing [`MockModel`]s named after the model file
pub struct MockLoader {
    pub kind: LoaderKind,
    pub tokens: Vec<String>,
    pub delay: Duration,
    pub events: EventLog,
}

impl MockLoader {
    pub fn new(events: EventLog, tokens: &[&str]) -> Self {
        Self {
            kind: LoaderKind::Gguf,
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            delay: Duration::ZERO,
            events,
        }
    }
}

impl ModelLoader for MockLoader {
    fn kind(&self) -> LoaderKind {
        self.kind
    }

    fn load(
        &self,
        config: &ModelConfig,
        placement: &DevicePlacement,
    ) -> Result<LoadedModel, ModelError> {
        let name = file_name(&config.model_path);
        self.events.push(format!("load:{name}"));
        if name.contains("panic") {
            panic!("loader crashed on {name}");
        }
        if name.contains("broken") {
            return Err(ModelError::Load(format!("{name} is corrupt")));
        }

        let mut model = MockModel::from_tokens(&name, self.tokens.clone())
            .with_delay(self.delay)
            .with_events(self.events.clone());
        if name.contains("flaky") {
            model = model.failing_after(1);
        }
        let device = if placement.uses_gpu() { "cuda:0" } else { "cpu" };
        Ok(LoadedModel {
            model: Box::new(model),
            tokenizer: Some(Box::new(MockTokenizer)),
            allocation: vec![DeviceAllocation {
                device: device.to_string(),
                modules: 32,
            }],
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
