//! DocAssist Library
//!
//! Question answering over local documents with a locally loaded model. A
//! single background worker runs every heavy operation in submission order
//! and streams answers back as notifications.

pub mod app;
pub mod documents;
pub mod inference;
pub mod storage;
pub mod system;
pub mod types;
pub mod worker;
