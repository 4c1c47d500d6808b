//! Notification types
//!
//! Messages delivered from the worker to the foreground actor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What a notification carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Progress, timing and failure reports
    LogLine,
    /// A piece of a generated answer
    AnswerChunk,
}

/// A single message for the foreground actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub text: String,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn log_line(text: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::LogLine,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn answer_chunk(text: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::AnswerChunk,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_answer(&self) -> bool {
        self.kind == NotificationKind::AnswerChunk
    }
}

/// Sending half of the foreground notification channel.
///
/// Delivery is fire-and-forget: if the foreground actor has gone away the
/// notification is dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report progress. Also written to the tracing log under the `notification` target.
    pub fn log(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!(target: "notification", "{}", text);
        let _ = self.tx.send(Notification::log_line(text));
    }

    /// Forward a generated token
    pub fn answer(&self, text: impl Into<String>) {
        let _ = self.tx.send(Notification::answer_chunk(text));
    }
}
