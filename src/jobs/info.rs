use crate::job_store::{JobFailure, JobRecord, JobStatus};
use serde::{Deserialize, Serialize};

/// Wire representation of a job record, shared by the server and the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusInfo {
    pub id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub stage: Option<String>,
    pub output_count: u64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

impl JobStatusInfo {
    pub fn not_started(id: &str) -> Self {
        JobRecord::not_started(id).into()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<JobRecord> for JobStatusInfo {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            progress: record.progress,
            stage: record.stage,
            output_count: record.output_count,
            started_at: record.started_at.map(|t| t.to_rfc3339()),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
            error: record.error,
        }
    }
}
