use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NotStarted => "not_started",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(JobStatus::NotStarted),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-phase label of a processing job.
///
/// The labels are part of the read model; they must never carry error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Queued,
    LoadingEngine,
    PreparingInput,
    Transcribing,
    Finalizing,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::LoadingEngine => "loading engine",
            JobStage::PreparingInput => "preparing input",
            JobStage::Transcribing => "running core computation",
            JobStage::Finalizing => "finalizing output",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable category, e.g. "engine_execution".
    pub kind: String,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Persisted lifecycle state of the job for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub stage: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<JobFailure>,
    pub output_count: u64,
}

impl JobRecord {
    /// The record reported for a resource that was never started.
    pub fn not_started(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::NotStarted,
            progress: 0.0,
            stage: None,
            started_at: None,
            completed_at: None,
            error: None,
            output_count: 0,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.status == JobStatus::Processing
    }
}

/// Result of asking the store to begin a job.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// A fresh PROCESSING record was written; the caller owns the worker.
    Started(JobRecord),
    /// A job was already processing; nothing was written.
    AlreadyProcessing(JobRecord),
}

impl BeginOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            BeginOutcome::Started(record) | BeginOutcome::AlreadyProcessing(record) => record,
        }
    }

    pub fn into_record(self) -> JobRecord {
        match self {
            BeginOutcome::Started(record) | BeginOutcome::AlreadyProcessing(record) => record,
        }
    }
}

/// One unit of transcription output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Event types for the job audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    Started,
    EngineReady,
    Completed,
    Failed,
    WriteConflict,
}

impl JobEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventType::Started => "started",
            JobEventType::EngineReady => "engine_ready",
            JobEventType::Completed => "completed",
            JobEventType::Failed => "failed",
            JobEventType::WriteConflict => "write_conflict",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(JobEventType::Started),
            "engine_ready" => Some(JobEventType::EngineReady),
            "completed" => Some(JobEventType::Completed),
            "failed" => Some(JobEventType::Failed),
            "write_conflict" => Some(JobEventType::WriteConflict),
            _ => None,
        }
    }
}

/// An entry in the job audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: String,
    pub event_type: JobEventType,
    /// Unix timestamp when the event occurred
    pub timestamp: i64,
    pub duration_ms: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
}
