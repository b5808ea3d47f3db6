//! The Smart Create execution engine: turns a batch of prompts into
//! render-server submissions, tracks their completion by polling, and
//! persists finished outputs into the artifact store.
//!
//! The engine survives process crashes without duplicating work: the
//! embedded job list is the recovery record, and the artifact store's
//! content-hash dedup absorbs any double processing that slips through.

pub mod builder;
pub mod engine;
pub mod error;
pub mod graph;
mod monitor;

pub use builder::SubmissionBuilder;
pub use engine::{BatchEngine, EngineConfig, ExecuteOptions};
pub use error::EngineError;
pub use graph::{GraphError, JobGraph};
