//! Request queue
//!
//! Unbounded FIFO between any number of submitters and the single worker.

use std::sync::mpsc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::request::Request;

/// A request together with its bookkeeping
#[derive(Debug)]
pub struct QueuedRequest {
    pub id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub request: Request,
}

/// Submitting half. Cloneable; never blocks.
#[derive(Debug, Clone)]
pub struct RequestSender {
    tx: mpsc::Sender<QueuedRequest>,
}

/// Consuming half, owned by the worker
#[derive(Debug)]
pub struct RequestReceiver {
    rx: mpsc::Receiver<QueuedRequest>,
}

pub fn request_queue() -> (RequestSender, RequestReceiver) {
    let (tx, rx) = mpsc::channel();
    (RequestSender { tx }, RequestReceiver { rx })
}

impl RequestSender {
    /// Append to the tail. Returns `None` once the worker has gone away.
    pub fn enqueue(&self, request: Request) -> Option<Uuid> {
        let id = Uuid::new_v4();
        let queued = QueuedRequest {
            id,
            submitted_at: Utc::now(),
            request,
        };
        self.tx.send(queued).ok().map(|_| id)
    }
}

impl RequestReceiver {
    /// Block until a request is available. `None` when every sender is gone.
    pub fn dequeue(&self) -> Option<QueuedRequest> {
        self.rx.recv().ok()
    }

    /// Requests still waiting; used to report what a shutdown abandoned
    pub fn pending(&self) -> usize {
        self.rx.try_iter().count()
    }
}
