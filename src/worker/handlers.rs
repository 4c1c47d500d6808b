//! Request handlers
//!
//! One method per request kind. Each runs on the worker thread with exclusive
//! access to the session and reports progress as log lines.

use std::time::Instant;

use crate::documents::{convert, IndexBackend, RecursiveSplitter};
use crate::inference::loader::allocation_summary;
use crate::inference::{run_streamed, GenerationPrompt, ModelBackend, StreamOutcome};
use crate::types::config::EngineConfig;
use crate::types::notification::Notifier;
use crate::types::request::{LoadDocuments, LoadIndex, LoadModel, Query, Request, SaveIndex};
use crate::worker::session::SessionState;
use crate::worker::WorkerError;

pub struct Handlers {
    pub(crate) models: ModelBackend,
    pub(crate) indexes: Box<dyn IndexBackend>,
    pub(crate) notifier: Notifier,
    pub(crate) engine: EngineConfig,
}

impl Handlers {
    /// Run one request. `Terminate` is handled by the worker loop and is a no-op here.
    pub fn handle(&self, session: &mut SessionState, request: &Request) -> Result<(), WorkerError> {
        match request {
            Request::LoadModel(load) => self.load_model(session, load),
            Request::LoadDocuments(load) => self.load_documents(session, load),
            Request::Query(query) => self.query(session, query),
            Request::SaveIndex(save) => self.save_index(session, save),
            Request::LoadIndex(load) => self.load_index(session, load),
            Request::Terminate => Ok(()),
        }
    }

    fn load_model(&self, session: &mut SessionState, request: &LoadModel) -> Result<(), WorkerError> {
        // Free the old weights before the new ones are allocated, even if this load fails
        session.release_model();

        let config = request.config();
        self.notifier.log("Loading model and tokenizer");
        let start = Instant::now();

        let loaded = self.models.load(config)?;
        for line in allocation_summary(&loaded.allocation) {
            self.notifier.log(line);
        }
        let name = loaded.model.name().to_string();
        session.install_model(loaded);

        self.notifier.log(format!(
            "Loaded model and tokenizer in {:.3} seconds",
            start.elapsed().as_secs_f64()
        ));
        tracing::debug!("Resident model is now {}", name);
        Ok(())
    }

    fn load_documents(
        &self,
        session: &mut SessionState,
        request: &LoadDocuments,
    ) -> Result<(), WorkerError> {
        self.notifier.log("Loading documents");
        let start = Instant::now();

        let mut text = String::new();
        for source in request.sources() {
            if let Some(document) = convert(source)? {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&document);
            }
        }
        self.notifier.log(format!(
            "Loaded documents in {:.3} seconds",
            start.elapsed().as_secs_f64()
        ));

        self.notifier.log("Splitting text into chunks");
        let start = Instant::now();
        let chunks =
            RecursiveSplitter::new(request.chunk_size(), request.chunk_overlap()).split(&text);
        self.notifier.log(format!(
            "Split text in {:.3} seconds",
            start.elapsed().as_secs_f64()
        ));

        self.notifier.log("Converting text chunks to vectorstore");
        let start = Instant::now();
        let chunk_count = chunks.len();
        let index = self.indexes.build(chunks, request.embedding_model())?;
        session.replace_index(index);
        self.notifier.log(format!(
            "Converted text chunks to vectorstore in {:.3} seconds",
            start.elapsed().as_secs_f64()
        ));
        tracing::debug!("Indexed {} chunks", chunk_count);
        Ok(())
    }

    fn query(&self, session: &mut SessionState, request: &Query) -> Result<(), WorkerError> {
        let Some(index) = session.index() else {
            self.notifier.log("No documents loaded");
            return Ok(());
        };
        let Some(model) = session.model() else {
            self.notifier.log("No model loaded");
            return Ok(());
        };
        let cancel = session.cancel();
        cancel.reset();

        self.notifier.log("Starting similarity search");
        let start = Instant::now();
        let chunks = index.search(request.text(), request.match_count());
        self.notifier.log(format!(
            "Completed similarity search in {:.3} seconds",
            start.elapsed().as_secs_f64()
        ));
        if chunks.is_empty() {
            self.notifier.log("No matching documents found");
            return Ok(());
        }

        let prompt = GenerationPrompt::new(&chunks, request.text()).render();
        if let Some(tokenizer) = session.tokenizer() {
            match tokenizer.token_count(&prompt) {
                Ok(count) => self.notifier.log(format!("Prompt is {count} tokens")),
                Err(e) => tracing::warn!("Could not count prompt tokens: {}", e),
            }
        }

        self.notifier.log("Starting query");
        // The answer stream opens with the question and closes with a blank line
        self.notifier.answer(format!("\n{}\n", request.text()));
        let start = Instant::now();
        let outcome = run_streamed(
            model,
            &prompt,
            request.config(),
            cancel,
            &self.engine,
            |token| self.notifier.answer(token),
        );
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            StreamOutcome::Completed { tokens } => {
                tracing::debug!("Generated {} tokens", tokens);
                self.notifier.answer("\n\n");
                self.notifier
                    .log(format!("Completed query in {elapsed:.3} seconds"));
            }
            StreamOutcome::Cancelled { tokens } => {
                self.notifier.answer("\n\n");
                self.notifier.log(format!(
                    "Query cancelled after {tokens} tokens in {elapsed:.3} seconds"
                ));
            }
            StreamOutcome::Failed(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn save_index(&self, session: &mut SessionState, request: &SaveIndex) -> Result<(), WorkerError> {
        let Some(index) = session.index() else {
            self.notifier.log("No document index loaded");
            return Ok(());
        };

        index.save(request.path())?;
        self.notifier.log(format!(
            "Saved document index ({} chunks) to {}",
            index.len(),
            request.path().display()
        ));
        Ok(())
    }

    fn load_index(&self, session: &mut SessionState, request: &LoadIndex) -> Result<(), WorkerError> {
        let start = Instant::now();
        let index = self
            .indexes
            .load(request.path(), request.embedding_model())?;
        self.notifier.log(format!(
            "Loaded document index ({} chunks) from {} in {:.3} seconds",
            index.len(),
            request.path().display(),
            start.elapsed().as_secs_f64()
        ));
        session.replace_index(index);
        Ok(())
    }
}
