//! Audit logging for transcription jobs.
//!
//! Thin layer over [`JobStore::log_job_event`] that builds the event details.
//! Audit failures are logged and swallowed; they never affect the job.

use crate::job_store::{JobEventType, JobFailure, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct JobEventLogger {
    store: Arc<dyn JobStore>,
}

impl JobEventLogger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    fn log(
        &self,
        job_id: &str,
        event_type: JobEventType,
        duration: Option<Duration>,
        details: Option<serde_json::Value>,
        error: Option<&str>,
    ) {
        let duration_ms = duration.map(|d| d.as_millis() as i64);
        if let Err(e) =
            self.store
                .log_job_event(job_id, event_type, duration_ms, details.as_ref(), error)
        {
            warn!(
                "Failed to log {} event for job {}: {}",
                event_type.as_str(),
                job_id,
                e
            );
        }
    }

    pub fn log_started(&self, job_id: &str, engine_ready: bool) {
        self.log(
            job_id,
            JobEventType::Started,
            None,
            Some(serde_json::json!({ "engine_ready": engine_ready })),
            None,
        );
    }

    /// The job got the engine after waiting `waited` for it.
    pub fn log_engine_ready(&self, job_id: &str, waited: Duration, attempts: u32) {
        self.log(
            job_id,
            JobEventType::EngineReady,
            Some(waited),
            Some(serde_json::json!({ "load_attempts": attempts })),
            None,
        );
    }

    pub fn log_completed(&self, job_id: &str, duration: Duration, output_count: u64) {
        self.log(
            job_id,
            JobEventType::Completed,
            Some(duration),
            Some(serde_json::json!({ "output_count": output_count })),
            None,
        );
    }

    pub fn log_failed(&self, job_id: &str, duration: Duration, failure: &JobFailure) {
        self.log(
            job_id,
            JobEventType::Failed,
            Some(duration),
            Some(serde_json::json!({ "kind": failure.kind })),
            Some(&failure.message),
        );
    }

    /// A terminal write found the record no longer PROCESSING.
    pub fn log_write_conflict(&self, job_id: &str, attempted: &str) {
        self.log(
            job_id,
            JobEventType::WriteConflict,
            None,
            Some(serde_json::json!({ "attempted_status": attempted })),
            None,
        );
    }
}
