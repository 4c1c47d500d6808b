//! Request worker
//!
//! A single dedicated thread dequeues requests and runs them one at a time
//! against the session state. Failures and panics are reported as log lines
//! and never stop the loop; only `Terminate` (or every sender going away) does.

pub mod handlers;
pub mod queue;
pub mod session;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use uuid::Uuid;

use crate::documents::{DocumentError, IndexBackend, IndexError};
use crate::inference::{CancelFlag, ModelBackend, ModelError};
use crate::storage::StorageError;
use crate::types::config::EngineConfig;
use crate::types::notification::Notifier;
use crate::types::request::{Request, ValidationError};

pub use handlers::Handlers;
pub use queue::{request_queue, QueuedRequest, RequestReceiver, RequestSender};
pub use session::SessionState;

/// Errors surfaced by handlers and by the worker handle
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Worker is not running")]
    NotRunning,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    #[error("Worker thread panicked")]
    Panicked,
}

/// Lifecycle of the worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next request
    Idle,
    Running,
    Stopped,
}

type SharedState = Arc<Mutex<WorkerState>>;

fn set_state(state: &SharedState, next: WorkerState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// The worker thread's owned state
pub struct Worker {
    receiver: RequestReceiver,
    handlers: Handlers,
    session: SessionState,
    state: SharedState,
}

impl Worker {
    /// Start the worker thread
    pub fn spawn(
        engine: EngineConfig,
        models: ModelBackend,
        indexes: Box<dyn IndexBackend>,
        notifier: Notifier,
    ) -> Result<WorkerHandle, WorkerError> {
        let (sender, receiver) = request_queue();
        let cancel = CancelFlag::new();
        let state: SharedState = Arc::new(Mutex::new(WorkerState::Idle));
        let thread_name = engine.worker_thread_name.clone();

        let worker = Worker {
            receiver,
            handlers: Handlers {
                models,
                indexes,
                notifier,
                engine,
            },
            session: SessionState::new(cancel.clone()),
            state: state.clone(),
        };

        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run())
            .map_err(WorkerError::Spawn)?;

        tracing::info!("Request worker started");
        Ok(WorkerHandle {
            sender: Some(sender),
            cancel,
            state,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        loop {
            set_state(&self.state, WorkerState::Idle);
            let Some(queued) = self.receiver.dequeue() else {
                tracing::debug!("Request queue closed, worker exiting");
                break;
            };
            set_state(&self.state, WorkerState::Running);

            let kind = queued.request.kind();
            if matches!(queued.request, Request::Terminate) {
                tracing::info!(id = %queued.id, "Terminate requested");
                break;
            }

            tracing::info!(
                id = %queued.id,
                %kind,
                waited_ms = (chrono::Utc::now() - queued.submitted_at).num_milliseconds(),
                "Processing request"
            );
            let handlers = &self.handlers;
            let session = &mut self.session;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                handlers.handle(session, &queued.request)
            }));

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(id = %queued.id, %kind, "Request failed: {}", e);
                    handlers.notifier.log(format!("{e}"));
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(id = %queued.id, %kind, "Request panicked: {}", message);
                    handlers
                        .notifier
                        .log(format!("Request {kind} encountered an internal error: {message}"));
                }
            }
        }

        let abandoned = self.receiver.pending();
        if abandoned > 0 {
            tracing::info!("Abandoned {} queued requests at shutdown", abandoned);
        }
        self.session.release_model();
        set_state(&self.state, WorkerState::Stopped);
        tracing::info!("Request worker stopped");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Foreground side of the worker. Dropping it terminates and joins the thread.
pub struct WorkerHandle {
    sender: Option<RequestSender>,
    cancel: CancelFlag,
    state: SharedState,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Queue a request without blocking
    pub fn submit(&self, request: Request) -> Result<Uuid, WorkerError> {
        self.sender
            .as_ref()
            .and_then(|sender| sender.enqueue(request))
            .ok_or(WorkerError::NotRunning)
    }

    /// Ask the running query, if any, to stop after its current token
    pub fn cancel_query(&self) {
        self.cancel.request();
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `Terminate` and wait for the worker thread to exit
    pub fn shutdown(mut self) -> Result<(), WorkerError> {
        self.terminate_and_join()
    }

    fn terminate_and_join(&mut self) -> Result<(), WorkerError> {
        if let Some(sender) = self.sender.take() {
            let _ = sender.enqueue(Request::terminate());
        }
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| WorkerError::Panicked)?;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.terminate_and_join();
    }
}
