//! Scribe Server Library
//!
//! Transcription job tracking: the job store, the engine host, the job
//! runner, the HTTP endpoints and the client-side synchronizer.

pub mod config;
pub mod engine;
pub mod job_store;
pub mod jobs;
pub mod server;
pub mod sqlite_persistence;
pub mod sync;

// Re-export commonly used types for convenience
pub use engine::{EngineHost, EngineState};
pub use job_store::{JobStore, SqliteJobStore};
pub use jobs::{JobRunner, JobStatusInfo};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
