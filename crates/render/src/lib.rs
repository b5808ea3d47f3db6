//! REST client for the external render server.
//!
//! Provides typed wrappers over the server's HTTP surface (graph
//! submission, live queue, per-prompt history, output download,
//! cancellation) plus the [`backend::RenderBackend`] trait the
//! orchestrator is written against.
//!
//! Completion tracking is poll-based on purpose: the server's push
//! channel does not survive client restarts, so the queue and history
//! endpoints are the source of truth.

pub mod api;
pub mod backend;
pub mod error;
pub mod types;

pub use api::RenderApi;
pub use backend::RenderBackend;
pub use error::RenderError;
pub use types::{HistoryEntry, OutputFile, QueueSnapshot};
