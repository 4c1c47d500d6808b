//! Shared type definitions
//!
//! Requests, notifications and configuration records exchanged between the
//! foreground actor and the worker.

pub mod config;
pub mod notification;
pub mod request;

pub use config::{EngineConfig, GenerationConfig, ModelConfig, Precision, QuantizationParams};
pub use notification::{Notification, NotificationKind, Notifier};
pub use request::{Request, RequestKind, ValidationError};
