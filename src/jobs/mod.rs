//! Transcription job execution: starting jobs, running them on the blocking
//! pool and capturing engine progress into the job store.

mod audit;
mod info;
mod progress;
mod resources;
mod runner;

pub use audit::JobEventLogger;
pub use info::JobStatusInfo;
pub use progress::{capture_hook, Interception, ProgressCell, ProgressMapping, ProgressSampler};
pub use resources::{
    is_valid_resource_id, DirectoryResourceLocator, ResourceLocator, DEFAULT_MEDIA_EXTENSIONS,
};
pub use runner::{JobRunError, JobRunner, RunnerSettings, StartError};
