//! Streaming bridge
//!
//! Runs generation on its own thread and relays tokens through a bounded
//! channel to the caller, which drains it with a bounded wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;

use crate::inference::model::{LanguageModel, ModelError};
use crate::types::config::{EngineConfig, GenerationConfig};

/// Cooperative cancellation flag shared by the foreground and the generation loop
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a streamed generation ended
#[derive(Debug)]
pub enum StreamOutcome {
    Completed { tokens: usize },
    /// Stopped on request; not an error
    Cancelled { tokens: usize },
    Failed(ModelError),
}

/// Generate on a dedicated thread and hand each token to `on_token` in
/// production order. Returns once the generation thread has been joined.
pub fn run_streamed(
    model: &dyn LanguageModel,
    prompt: &str,
    config: &GenerationConfig,
    cancel: &CancelFlag,
    engine: &EngineConfig,
    mut on_token: impl FnMut(String),
) -> StreamOutcome {
    let poll = engine.bridge_poll_interval();
    let (tx, rx) = mpsc::sync_channel::<String>(engine.bridge_capacity.max(1));

    thread::scope(|scope| {
        let producer_cancel = cancel.clone();
        let spawned = thread::Builder::new()
            .name(engine.generation_thread_name.clone())
            .spawn_scoped(scope, move || {
                produce_tokens(model, prompt, config, producer_cancel, tx)
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return StreamOutcome::Failed(ModelError::Inference(format!(
                    "Failed to spawn generation thread: {e}"
                )))
            }
        };

        let mut tokens = 0;
        loop {
            match rx.recv_timeout(poll) {
                Ok(token) => {
                    tokens += 1;
                    on_token(token);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        match handle.join() {
            Ok(Ok(false)) => StreamOutcome::Completed { tokens },
            Ok(Ok(true)) => StreamOutcome::Cancelled { tokens },
            Ok(Err(e)) => StreamOutcome::Failed(e),
            Err(_) => StreamOutcome::Failed(ModelError::Inference(
                "generation thread panicked".to_string(),
            )),
        }
    })
}

/// Returns whether generation stopped because cancellation was requested
fn produce_tokens(
    model: &dyn LanguageModel,
    prompt: &str,
    config: &GenerationConfig,
    cancel: CancelFlag,
    tx: SyncSender<String>,
) -> Result<bool, ModelError> {
    let mut stream = model.generate(prompt, config, cancel.clone())?;
    loop {
        if cancel.is_requested() {
            tracing::debug!("Generation stopped by user");
            return Ok(true);
        }
        match stream.next() {
            Some(Ok(token)) => {
                if tx.send(token).is_err() {
                    tracing::debug!("Receiver dropped, stopping generation");
                    return Ok(false);
                }
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(cancel.is_requested()),
        }
    }
}

/// Take the longest decodable prefix of `buffer`, keeping an incomplete
/// trailing sequence for the next token. Invalid bytes are replaced.
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
pub(crate) fn take_utf8_prefix(buffer: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buffer) {
        Ok(text) => {
            let text = text.to_string();
            buffer.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&buffer[..valid]).into_owned();
            buffer.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(buffer).into_owned();
            buffer.clear();
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::mock::MockModel;
    use std::time::Duration;

    fn engine() -> EngineConfig {
        EngineConfig {
            bridge_capacity: 2,
            bridge_poll_ms: 5,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        let shared = flag.clone();
        assert!(!flag.is_requested());
        shared.request();
        assert!(flag.is_requested());
        flag.reset();
        assert!(!shared.is_requested());
    }

    #[test]
    fn test_stream_preserves_order() {
        let model = MockModel::new("m", &["The", " answer", " is", " 42"]);
        let mut received = Vec::new();
        let outcome = run_streamed(
            &model,
            "prompt",
            &GenerationConfig::default(),
            &CancelFlag::new(),
            &engine(),
            |t| received.push(t),
        );
        assert!(matches!(outcome, StreamOutcome::Completed { tokens: 4 }));
        assert_eq!(received.concat(), "The answer is 42");
    }

    #[test]
    fn test_cancel_stops_within_bounded_steps() {
        let tokens: Vec<String> = (0..1000).map(|i| format!("t{i} ")).collect();
        let model = MockModel::from_tokens("slow", tokens).with_delay(Duration::from_millis(1));
        let cancel = CancelFlag::new();
        let mut received = 0;
        let outcome = run_streamed(
            &model,
            "prompt",
            &GenerationConfig::default(),
            &cancel,
            &engine(),
            |_| {
                received += 1;
                if received == 3 {
                    cancel.request();
                }
            },
        );
        match outcome {
            StreamOutcome::Cancelled { tokens } => {
                // At most the channel capacity plus the token in flight
                assert!(tokens <= 3 + 2 + 1, "got {tokens} tokens");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_generation_error_is_reported() {
        let model = MockModel::new("m", &["a", "b", "c"]).failing_after(1);
        let mut received = Vec::new();
        let outcome = run_streamed(
            &model,
            "prompt",
            &GenerationConfig::default(),
            &CancelFlag::new(),
            &engine(),
            |t| received.push(t),
        );
        assert!(matches!(outcome, StreamOutcome::Failed(ModelError::Inference(_))));
        assert_eq!(received, ["a"]);
    }

    #[test]
    fn test_take_utf8_prefix_keeps_incomplete_suffix() {
        // "é" is 0xC3 0xA9
        let mut buffer = vec![b'o', b'k', 0xC3];
        assert_eq!(take_utf8_prefix(&mut buffer), "ok");
        assert_eq!(buffer, [0xC3]);
        buffer.push(0xA9);
        assert_eq!(take_utf8_prefix(&mut buffer), "é");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_utf8_prefix_replaces_invalid_bytes() {
        let mut buffer = vec![0xFF, b'a'];
        assert_eq!(take_utf8_prefix(&mut buffer), "\u{FFFD}a");
        assert!(buffer.is_empty());
    }
}
