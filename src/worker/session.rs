//! Session state
//!
//! The model, tokenizer and index currently held by the worker. Only the
//! worker thread mutates it; the generation thread borrows the model while
//! the worker waits on it.

use crate::documents::DocumentIndex;
use crate::inference::{CancelFlag, LanguageModel, LoadedModel, Tokenizer};

pub struct SessionState {
    model: Option<Box<dyn LanguageModel>>,
    tokenizer: Option<Box<dyn Tokenizer>>,
    index: Option<Box<dyn DocumentIndex>>,
    cancel: CancelFlag,
}

impl SessionState {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            model: None,
            tokenizer: None,
            index: None,
            cancel,
        }
    }

    /// Release and drop the current model and tokenizer, if any
    pub fn release_model(&mut self) {
        if let Some(mut model) = self.model.take() {
            tracing::debug!("Releasing model {}", model.name());
            model.release();
        }
        self.tokenizer = None;
    }

    /// Install a freshly loaded model. The previous one must already be released.
    pub fn install_model(&mut self, loaded: LoadedModel) {
        self.release_model();
        self.model = Some(loaded.model);
        self.tokenizer = loaded.tokenizer;
    }

    pub fn replace_index(&mut self, index: Box<dyn DocumentIndex>) {
        self.index = Some(index);
    }

    pub fn model(&self) -> Option<&dyn LanguageModel> {
        self.model.as_deref()
    }

    pub fn tokenizer(&self) -> Option<&dyn Tokenizer> {
        self.tokenizer.as_deref()
    }

    pub fn index(&self) -> Option<&dyn DocumentIndex> {
        self.index.as_deref()
    }

    pub fn cancel(&self) -> &CancelFlag {
        &self.cancel
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.release_model();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{FlatIndexBackend, IndexBackend};
    use crate::inference::mock::{EventLog, MockModel};

    fn loaded(name: &str, events: &EventLog) -> LoadedModel {
        LoadedModel {
            model: Box::new(MockModel::new(name, &[]).with_events(events.clone())),
            tokenizer: None,
            allocation: Vec::new(),
        }
    }

    #[test]
    fn test_install_releases_previous_model() {
        let events = EventLog::default();
        let mut session = SessionState::new(CancelFlag::new());
        session.install_model(loaded("a", &events));
        session.install_model(loaded("b", &events));

        assert_eq!(events.events(), ["release:a"]);
        assert_eq!(session.model().unwrap().name(), "b");
    }

    #[test]
    fn test_release_clears_model_and_tokenizer() {
        let events = EventLog::default();
        let mut session = SessionState::new(CancelFlag::new());
        session.install_model(loaded("a", &events));
        session.release_model();
        session.release_model();

        assert!(session.model().is_none());
        assert!(session.tokenizer().is_none());
        assert_eq!(events.events(), ["release:a"]);
    }

    #[test]
    fn test_drop_releases_model() {
        let events = EventLog::default();
        {
            let mut session = SessionState::new(CancelFlag::new());
            session.install_model(loaded("a", &events));
        }
        assert_eq!(events.events(), ["release:a"]);
    }

    #[test]
    fn test_replace_index() {
        let mut session = SessionState::new(CancelFlag::new());
        assert!(session.index().is_none());
        session.replace_index(FlatIndexBackend.build(vec!["x".into()], None).unwrap());
        assert_eq!(session.index().unwrap().len(), 1);
    }
}
