//! Speech-to-text engines and the process-wide owner of the loaded engine.
//!
//! Engines are expensive to construct and not reentrant: they are loaded once,
//! lazily, and used by one job at a time through [`EngineHost::acquire`].

mod command;
mod hook;
mod host;
mod simulated;

pub use command::{CommandEngine, CommandEngineConfig, CommandEngineLoader};
pub use hook::{noop_hook, ProgressHook, ProgressSlot, ProgressTick};
pub use host::{EngineGuard, EngineHost, EngineState};
pub use simulated::{SimulatedEngine, SimulatedEngineConfig, SimulatedEngineLoader};

use crate::job_store::TranscriptSegment;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be constructed. Transient; loading is retried.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine ran and failed on this input.
    #[error("engine execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub media_path: PathBuf,
    /// Per-job directory for temporary artifacts; removed by the caller.
    pub scratch_dir: PathBuf,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
}

pub trait TranscriptionEngine: Send + Sync {
    fn name(&self) -> &str;

    /// The hook slot the engine reports progress through during `transcribe`.
    fn progress_slot(&self) -> &ProgressSlot;

    /// Runs a full transcription. Blocking; may take minutes.
    fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcript, EngineError>;
}

/// Builds an engine on first use.
pub trait EngineLoader: Send + Sync {
    /// Human-readable description, for logs and the stats endpoint.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Box<dyn TranscriptionEngine>, EngineError>;
}
