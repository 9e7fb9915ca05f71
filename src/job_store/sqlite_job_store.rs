use super::models::{
    BeginOutcome, JobEvent, JobEventType, JobFailure, JobRecord, JobStage, JobStatus,
    TranscriptSegment,
};
use super::schema::JOB_VERSIONED_SCHEMAS;
use super::JobStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const JOB_RECORD_COLUMNS: &str = "id, status, progress, stage, started_at, completed_at, \
     error_kind, error_message, output_count";

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, JOB_VERSIONED_SCHEMAS, "job")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
        s.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
    }

    fn row_to_job_record(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let status_str: String = row.get("status")?;
        // Unknown statuses only come from a foreign writer; treat them as failed
        // rather than resurrecting the job as not started.
        let status = JobStatus::parse(&status_str).unwrap_or(JobStatus::Failed);

        let error_kind: Option<String> = row.get("error_kind")?;
        let error_message: Option<String> = row.get("error_message")?;
        let error = match (error_kind, error_message) {
            (Some(kind), message) => Some(JobFailure {
                kind,
                message: message.unwrap_or_default(),
            }),
            (None, Some(message)) => Some(JobFailure::new("unknown", message)),
            (None, None) => None,
        };

        let output_count: i64 = row.get("output_count")?;

        Ok(JobRecord {
            id: row.get("id")?,
            status,
            progress: row.get("progress")?,
            stage: row.get("stage")?,
            started_at: Self::parse_datetime(row.get("started_at")?),
            completed_at: Self::parse_datetime(row.get("completed_at")?),
            error,
            output_count: output_count.max(0) as u64,
        })
    }

    fn row_to_segment(row: &rusqlite::Row) -> rusqlite::Result<TranscriptSegment> {
        let index: i64 = row.get("segment_index")?;
        let start_ms: i64 = row.get("start_ms")?;
        let end_ms: i64 = row.get("end_ms")?;
        Ok(TranscriptSegment {
            index: index as u32,
            start_ms: start_ms as u64,
            end_ms: end_ms as u64,
            text: row.get("text")?,
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<JobEvent> {
        let event_type_str: String = row.get("event_type")?;
        let event_type =
            JobEventType::parse(&event_type_str).unwrap_or(JobEventType::WriteConflict);

        let timestamp_str: String = row.get("timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|dt| dt.with_timezone(&Utc).timestamp())
            .unwrap_or_else(|_| Utc::now().timestamp());

        let details_str: Option<String> = row.get("details")?;
        let details = details_str.and_then(|s| serde_json::from_str(&s).ok());

        Ok(JobEvent {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type,
            timestamp,
            duration_ms: row.get("duration_ms")?,
            details,
            error: row.get("error")?,
        })
    }

    fn query_job(conn: &Connection, id: &str) -> Result<Option<JobRecord>> {
        let record = conn
            .query_row(
                &format!("SELECT {JOB_RECORD_COLUMNS} FROM job_records WHERE id = ?1"),
                params![id],
                Self::row_to_job_record,
            )
            .optional()?;
        Ok(record)
    }
}

impl JobStore for SqliteJobStore {
    fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::query_job(&conn, id)
    }

    fn begin_job(&self, id: &str, progress: f64, stage: JobStage) -> Result<BeginOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if let Some(existing) = Self::query_job(&tx, id)? {
            if existing.is_processing() {
                return Ok(BeginOutcome::AlreadyProcessing(existing));
            }
        }

        let now = Utc::now();
        let now_str = Self::format_datetime(&now);
        let progress = progress.clamp(0.0, 1.0);
        tx.execute(
            "INSERT INTO job_records
                (id, status, progress, stage, started_at, completed_at,
                 error_kind, error_message, output_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, 0, ?5)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                stage = excluded.stage,
                started_at = excluded.started_at,
                completed_at = NULL,
                error_kind = NULL,
                error_message = NULL,
                output_count = 0,
                updated_at = excluded.updated_at",
            params![
                id,
                JobStatus::Processing.as_str(),
                progress,
                stage.as_str(),
                now_str
            ],
        )?;
        tx.execute(
            "DELETE FROM transcript_segments WHERE job_id = ?1",
            params![id],
        )?;
        tx.commit().context("Failed to commit job start")?;

        Ok(BeginOutcome::Started(JobRecord {
            id: id.to_string(),
            status: JobStatus::Processing,
            progress,
            stage: Some(stage.as_str().to_string()),
            started_at: Some(now),
            completed_at: None,
            error: None,
            output_count: 0,
        }))
    }

    fn record_progress(&self, id: &str, progress: f64, stage: JobStage) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        // All right-hand sides read the pre-update row, so the stage only moves
        // together with a non-decreasing progress value.
        let updated = conn.execute(
            "UPDATE job_records SET
                stage = CASE WHEN ?2 >= progress THEN ?3 ELSE stage END,
                progress = MAX(progress, ?2),
                updated_at = ?4
             WHERE id = ?1 AND status = ?5",
            params![
                id,
                progress.clamp(0.0, 1.0),
                stage.as_str(),
                now,
                JobStatus::Processing.as_str()
            ],
        )?;
        Ok(updated > 0)
    }

    fn complete_job(&self, id: &str, output_count: u64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let updated = conn.execute(
            "UPDATE job_records SET
                status = ?2, progress = 1.0, completed_at = ?3, output_count = ?4,
                error_kind = NULL, error_message = NULL, updated_at = ?3
             WHERE id = ?1 AND status = ?5",
            params![
                id,
                JobStatus::Completed.as_str(),
                now,
                output_count as i64,
                JobStatus::Processing.as_str()
            ],
        )?;
        Ok(updated > 0)
    }

    fn fail_job(&self, id: &str, failure: &JobFailure) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let updated = conn.execute(
            "UPDATE job_records SET
                status = ?2, completed_at = ?3, error_kind = ?4, error_message = ?5,
                updated_at = ?3
             WHERE id = ?1 AND status = ?6",
            params![
                id,
                JobStatus::Failed.as_str(),
                now,
                failure.kind,
                failure.message,
                JobStatus::Processing.as_str()
            ],
        )?;
        Ok(updated > 0)
    }

    fn get_processing_jobs(&self) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_RECORD_COLUMNS} FROM job_records WHERE status = ?1 ORDER BY started_at"
        ))?;
        let jobs = stmt
            .query_map(
                params![JobStatus::Processing.as_str()],
                Self::row_to_job_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn mark_engine_waiters_queued(&self, except_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let updated = conn.execute(
            "UPDATE job_records SET stage = ?1, updated_at = ?2
             WHERE status = ?3 AND stage = ?4 AND id != ?5",
            params![
                JobStage::Queued.as_str(),
                now,
                JobStatus::Processing.as_str(),
                JobStage::LoadingEngine.as_str(),
                except_id
            ],
        )?;
        Ok(updated)
    }

    fn replace_segments(&self, id: &str, segments: &[TranscriptSegment]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM transcript_segments WHERE job_id = ?1",
            params![id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transcript_segments (job_id, segment_index, start_ms, end_ms, text)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for segment in segments {
                stmt.execute(params![
                    id,
                    segment.index as i64,
                    segment.start_ms as i64,
                    segment.end_ms as i64,
                    segment.text
                ])?;
            }
        }
        tx.commit().context("Failed to commit transcript segments")?;
        Ok(segments.len())
    }

    fn get_segments(&self, id: &str) -> Result<Vec<TranscriptSegment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT segment_index, start_ms, end_ms, text FROM transcript_segments
             WHERE job_id = ?1 ORDER BY segment_index",
        )?;
        let segments = stmt
            .query_map(params![id], Self::row_to_segment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(segments)
    }

    fn log_job_event(
        &self,
        job_id: &str,
        event_type: JobEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let details_str = details.map(|d| d.to_string());
        conn.execute(
            "INSERT INTO job_events (job_id, event_type, timestamp, duration_ms, details, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                event_type.as_str(),
                now,
                duration_ms,
                details_str,
                error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_job_events(&self, job_id: &str, limit: usize) -> Result<Vec<JobEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_events WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let events = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteJobStore,
        _temp_dir: TempDir, // Keep temp dir alive
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        let store = SqliteJobStore::new(&db_path).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn segment(index: u32, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            index,
            start_ms: index as u64 * 1000,
            end_ms: index as u64 * 1000 + 900,
            text: text.to_string(),
        }
    }

    #[test]
    fn unknown_job_defaults_to_not_started() {
        let test = create_test_store();
        assert!(test.store.get_job("missing").unwrap().is_none());

        let record = test.store.get_job_or_default("missing").unwrap();
        assert_eq!(record.status, JobStatus::NotStarted);
        assert_eq!(record.progress, 0.0);
    }

    #[test]
    fn begin_job_writes_processing_record() {
        let test = create_test_store();
        let outcome = test
            .store
            .begin_job("res-1", 0.05, JobStage::LoadingEngine)
            .unwrap();

        let BeginOutcome::Started(record) = outcome else {
            panic!("expected a fresh job");
        };
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, 0.05);
        assert_eq!(record.stage.as_deref(), Some("loading engine"));

        let stored = test.store.get_job("res-1").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.progress, 0.05);
        assert_eq!(stored.stage.as_deref(), Some("loading engine"));
        assert!(stored.started_at.is_some());
    }

    #[test]
    fn begin_job_is_idempotent_while_processing() {
        let test = create_test_store();
        test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();
        test.store
            .record_progress("res-1", 0.4, JobStage::Transcribing)
            .unwrap();

        let outcome = test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();
        let BeginOutcome::AlreadyProcessing(record) = outcome else {
            panic!("second begin must not restart the job");
        };
        assert_eq!(record.progress, 0.4);
        assert_eq!(record.stage.as_deref(), Some("running core computation"));
    }

    #[test]
    fn engine_waiters_are_relabeled_queued() {
        let test = create_test_store();
        test.store
            .begin_job("loader", 0.05, JobStage::LoadingEngine)
            .unwrap();
        test.store
            .begin_job("waiter", 0.05, JobStage::LoadingEngine)
            .unwrap();
        test.store
            .begin_job("done", 0.05, JobStage::LoadingEngine)
            .unwrap();
        test.store.complete_job("done", 0).unwrap();
        test.store
            .begin_job("running", 0.0, JobStage::Queued)
            .unwrap();
        test.store
            .record_progress("running", 0.4, JobStage::Transcribing)
            .unwrap();

        let changed = test.store.mark_engine_waiters_queued("loader").unwrap();
        assert_eq!(changed, 1);

        let waiter = test.store.get_job("waiter").unwrap().unwrap();
        assert_eq!(waiter.stage.as_deref(), Some("queued"));
        assert_eq!(waiter.progress, 0.05);
        let loader = test.store.get_job("loader").unwrap().unwrap();
        assert_eq!(loader.stage.as_deref(), Some("loading engine"));
        let running = test.store.get_job("running").unwrap().unwrap();
        assert_eq!(running.stage.as_deref(), Some("running core computation"));
        let done = test.store.get_job("done").unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.stage.as_deref(), Some("loading engine"));
    }

    #[test]
    fn progress_never_decreases_with_out_of_order_samples() {
        let test = create_test_store();
        test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();

        let samples = [0.2, 0.5, 0.3, 0.5, 0.45, 0.7, 0.1, 0.71];
        let mut high_water: f64 = 0.0;
        for sample in samples {
            test.store
                .record_progress("res-1", sample, JobStage::Transcribing)
                .unwrap();
            high_water = high_water.max(sample);
            let stored = test.store.get_job("res-1").unwrap().unwrap();
            assert_eq!(stored.progress, high_water);
        }
    }

    #[test]
    fn stale_sample_does_not_regress_stage() {
        let test = create_test_store();
        test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();
        test.store
            .record_progress("res-1", 0.85, JobStage::Finalizing)
            .unwrap();
        test.store
            .record_progress("res-1", 0.6, JobStage::Transcribing)
            .unwrap();

        let stored = test.store.get_job("res-1").unwrap().unwrap();
        assert_eq!(stored.progress, 0.85);
        assert_eq!(stored.stage.as_deref(), Some("finalizing output"));
    }

    #[test]
    fn complete_job_sets_full_progress_and_output_count() {
        let test = create_test_store();
        test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();
        assert!(test.store.complete_job("res-1", 12).unwrap());

        let stored = test.store.get_job("res-1").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 1.0);
        assert_eq!(stored.output_count, 12);
        assert!(stored.completed_at.is_some());
        assert!(stored.error.is_none());
    }

    #[test]
    fn failed_job_is_not_overwritten_by_late_progress() {
        let test = create_test_store();
        test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();
        test.store
            .record_progress("res-1", 0.3, JobStage::Transcribing)
            .unwrap();
        let failure = JobFailure::new("engine_execution", "decoder crashed");
        assert!(test.store.fail_job("res-1", &failure).unwrap());

        assert!(!test
            .store
            .record_progress("res-1", 0.9, JobStage::Transcribing)
            .unwrap());
        assert!(!test.store.complete_job("res-1", 3).unwrap());

        let stored = test.store.get_job("res-1").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.progress, 0.3);
        assert_eq!(stored.error, Some(failure));
    }

    #[test]
    fn terminal_writes_require_processing_record() {
        let test = create_test_store();
        assert!(!test.store.complete_job("never-started", 1).unwrap());
        assert!(!test
            .store
            .fail_job("never-started", &JobFailure::new("x", "y"))
            .unwrap());
        assert!(test.store.get_job("never-started").unwrap().is_none());
    }

    #[test]
    fn restarting_terminal_job_clears_previous_run() {
        let test = create_test_store();
        test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();
        test.store
            .replace_segments("res-1", &[segment(0, "hello"), segment(1, "world")])
            .unwrap();
        test.store.complete_job("res-1", 2).unwrap();

        let outcome = test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();
        assert!(matches!(outcome, BeginOutcome::Started(_)));

        let stored = test.store.get_job("res-1").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.progress, 0.0);
        assert_eq!(stored.output_count, 0);
        assert!(stored.completed_at.is_none());
        assert!(test.store.get_segments("res-1").unwrap().is_empty());
    }

    #[test]
    fn segments_are_replaced_and_returned_in_order() {
        let test = create_test_store();
        test.store.begin_job("res-1", 0.0, JobStage::Queued).unwrap();
        test.store
            .replace_segments("res-1", &[segment(1, "b"), segment(0, "a")])
            .unwrap();
        let segments = test.store.get_segments("res-1").unwrap();
        assert_eq!(segments, vec![segment(0, "a"), segment(1, "b")]);

        test.store
            .replace_segments("res-1", &[segment(0, "only")])
            .unwrap();
        assert_eq!(
            test.store.get_segments("res-1").unwrap(),
            vec![segment(0, "only")]
        );
    }

    #[test]
    fn processing_jobs_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        {
            let store = SqliteJobStore::new(&db_path).unwrap();
            store.begin_job("a", 0.0, JobStage::Queued).unwrap();
            store.record_progress("a", 0.42, JobStage::Transcribing).unwrap();
            store.begin_job("b", 0.0, JobStage::Queued).unwrap();
            store.complete_job("b", 1).unwrap();
        }

        let store = SqliteJobStore::new(&db_path).unwrap();
        let processing = store.get_processing_jobs().unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, "a");
        assert_eq!(processing[0].progress, 0.42);
    }

    #[test]
    fn job_events_are_listed_newest_first() {
        let test = create_test_store();
        test.store
            .log_job_event("res-1", JobEventType::Started, None, None, None)
            .unwrap();
        let details = serde_json::json!({"segments": 4});
        test.store
            .log_job_event(
                "res-1",
                JobEventType::Completed,
                Some(1500),
                Some(&details),
                None,
            )
            .unwrap();
        test.store
            .log_job_event("other", JobEventType::Failed, None, None, Some("boom"))
            .unwrap();

        let events = test.store.get_job_events("res-1", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, JobEventType::Completed);
        assert_eq!(events[0].duration_ms, Some(1500));
        assert_eq!(events[0].details, Some(details));
        assert_eq!(events[1].event_type, JobEventType::Started);
    }
}
