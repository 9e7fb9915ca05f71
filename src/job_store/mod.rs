mod models;
mod schema;
mod sqlite_job_store;

pub use models::*;
pub use schema::JOB_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use anyhow::Result;

/// Persistent job state; the single source of truth for the read model.
///
/// Exactly one writer exists per resource id at any time (the worker running
/// its job), so writes are last-write-wins per id. The store still refuses
/// progress and terminal writes for records that are no longer PROCESSING.
pub trait JobStore: Send + Sync {
    fn get_job(&self, id: &str) -> Result<Option<JobRecord>>;

    /// Returns the stored record, or the NOT_STARTED default for unknown ids.
    fn get_job_or_default(&self, id: &str) -> Result<JobRecord> {
        Ok(self
            .get_job(id)?
            .unwrap_or_else(|| JobRecord::not_started(id)))
    }

    /// Atomically flips the record to PROCESSING unless it already is.
    ///
    /// A terminal record is re-created: error, completion time, output count
    /// and previous segments are cleared.
    fn begin_job(&self, id: &str, progress: f64, stage: JobStage) -> Result<BeginOutcome>;

    /// Raises the progress of a PROCESSING record. Lower values are ignored,
    /// and so is the stage that came with them. Returns whether the record was
    /// PROCESSING.
    fn record_progress(&self, id: &str, progress: f64, stage: JobStage) -> Result<bool>;

    /// PROCESSING → COMPLETED. Returns false if the record was not PROCESSING.
    fn complete_job(&self, id: &str, output_count: u64) -> Result<bool>;

    /// PROCESSING → FAILED. Returns false if the record was not PROCESSING.
    fn fail_job(&self, id: &str, failure: &JobFailure) -> Result<bool>;

    fn get_processing_jobs(&self) -> Result<Vec<JobRecord>>;

    /// Relabels PROCESSING records other than `except_id` that still show
    /// "loading engine" as "queued". Progress is left as is. Returns the
    /// number of records changed.
    fn mark_engine_waiters_queued(&self, except_id: &str) -> Result<usize>;

    // Transcript output
    fn replace_segments(&self, id: &str, segments: &[TranscriptSegment]) -> Result<usize>;
    fn get_segments(&self, id: &str) -> Result<Vec<TranscriptSegment>>;

    // Job audit log
    fn log_job_event(
        &self,
        job_id: &str,
        event_type: JobEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64>;
    fn get_job_events(&self, job_id: &str, limit: usize) -> Result<Vec<JobEvent>>;
}
