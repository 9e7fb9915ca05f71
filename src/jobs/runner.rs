use super::audit::JobEventLogger;
use super::progress::{Interception, ProgressCell, ProgressMapping, ProgressSampler};
use super::resources::{is_valid_resource_id, ResourceLocator};
use crate::engine::{EngineError, EngineGuard, EngineHost, TranscriptionRequest};
use crate::job_store::{BeginOutcome, JobFailure, JobStage, JobStore};
use crate::server::metrics;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Granularity of shutdown checks while waiting between engine load attempts.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub sample_interval: Duration,
    pub engine_retry_initial: Duration,
    pub engine_retry_max: Duration,
    /// Parent of the per-job scratch directories.
    pub scratch_dir: PathBuf,
    pub language: Option<String>,
    pub mapping: ProgressMapping,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            engine_retry_initial: Duration::from_secs(2),
            engine_retry_max: Duration::from_secs(60),
            scratch_dir: std::env::temp_dir(),
            language: None,
            mapping: ProgressMapping::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid resource id: {0:?}")]
    InvalidResourceId(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("job store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Reasons a started job did not complete.
#[derive(Debug, Error)]
pub enum JobRunError {
    #[error("resource {0} is no longer available")]
    ResourceUnavailable(String),

    #[error(transparent)]
    Engine(EngineError),

    #[error("job store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("server is shutting down")]
    ShuttingDown,
}

impl JobRunError {
    /// Machine-readable kind stored with a failed record.
    pub fn kind(&self) -> &'static str {
        match self {
            JobRunError::ResourceUnavailable(_) => "resource_unavailable",
            JobRunError::Engine(EngineError::Unavailable(_)) => "engine_unavailable",
            JobRunError::Engine(EngineError::Execution(_)) => "engine_execution",
            JobRunError::Store(_) => "store",
            JobRunError::Io(_) => "io",
            JobRunError::Panicked(_) => "panic",
            JobRunError::ShuttingDown => "shutdown",
        }
    }
}

/// Starts transcription jobs and drives them to a terminal state.
///
/// Cheap to clone; every worker owns a clone.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    engine: Arc<EngineHost>,
    resources: Arc<dyn ResourceLocator>,
    audit: JobEventLogger,
    settings: RunnerSettings,
    shutdown: CancellationToken,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<EngineHost>,
        resources: Arc<dyn ResourceLocator>,
        settings: RunnerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            audit: JobEventLogger::new(store.clone()),
            store,
            engine,
            resources,
            settings,
            shutdown,
        }
    }

    pub fn engine(&self) -> &Arc<EngineHost> {
        &self.engine
    }

    /// Starts a job for `resource_id` unless one is already processing.
    ///
    /// Must be called from within a tokio runtime; the job itself runs on the
    /// blocking pool. The returned record is what the status endpoint reports
    /// right after this call.
    pub fn start(&self, resource_id: &str) -> Result<BeginOutcome, StartError> {
        if !is_valid_resource_id(resource_id) {
            return Err(StartError::InvalidResourceId(resource_id.to_string()));
        }

        if let Some(existing) = self.store.get_job(resource_id)? {
            if existing.is_processing() {
                debug!("Job {} already processing, not starting", resource_id);
                metrics::record_job_start("already_processing");
                return Ok(BeginOutcome::AlreadyProcessing(existing));
            }
        }

        let media_path = self
            .resources
            .locate(resource_id)
            .ok_or_else(|| StartError::ResourceNotFound(resource_id.to_string()))?;

        let engine_ready = self.engine.is_ready();
        let (progress, stage) = self.settings.mapping.initial(engine_ready);
        let outcome = self.store.begin_job(resource_id, progress, stage)?;

        match &outcome {
            BeginOutcome::Started(_) => {
                info!(
                    "Starting job {} ({}, engine {})",
                    resource_id,
                    media_path.display(),
                    self.engine.state().as_str()
                );
                metrics::record_job_start("started");
                self.audit.log_started(resource_id, engine_ready);

                let runner = self.clone();
                let job_id = resource_id.to_string();
                tokio::task::spawn_blocking(move || runner.run_job(&job_id, &media_path));
            }
            BeginOutcome::AlreadyProcessing(_) => {
                metrics::record_job_start("already_processing");
            }
        }

        Ok(outcome)
    }

    /// Logs records left PROCESSING by a previous process. They are not healed.
    pub fn report_stale_jobs(&self) -> anyhow::Result<Vec<String>> {
        let stale: Vec<String> = self
            .store
            .get_processing_jobs()?
            .into_iter()
            .map(|record| record.id)
            .collect();
        for id in &stale {
            warn!(
                "Job {} was left processing by a previous run; it will not be resumed",
                id
            );
        }
        Ok(stale)
    }

    /// Worker entry point. Never panics and never returns an error: every
    /// outcome ends up in the store.
    fn run_job(&self, job_id: &str, media_path: &Path) {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(job_id, media_path)))
            .unwrap_or_else(|payload| Err(JobRunError::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(output_count) => self.finish_completed(job_id, output_count, started.elapsed()),
            Err(JobRunError::ShuttingDown) => {
                info!("Job {} interrupted by shutdown, left processing", job_id);
            }
            Err(err) => self.finish_failed(job_id, &err, started.elapsed()),
        }
    }

    fn execute(&self, job_id: &str, media_path: &Path) -> Result<u64, JobRunError> {
        let mapping = self.settings.mapping;
        let engine = self.acquire_engine(job_id)?;

        self.store
            .record_progress(job_id, mapping.preparing_input, JobStage::PreparingInput)?;
        if !media_path.is_file() {
            return Err(JobRunError::ResourceUnavailable(job_id.to_string()));
        }
        std::fs::create_dir_all(&self.settings.scratch_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", job_id))
            .tempdir_in(&self.settings.scratch_dir)?;
        let request = TranscriptionRequest {
            media_path: media_path.to_path_buf(),
            scratch_dir: scratch.path().to_path_buf(),
            language: self.settings.language.clone(),
        };

        self.store
            .record_progress(job_id, mapping.core(0.0), JobStage::Transcribing)?;
        let cell = Arc::new(ProgressCell::new());
        let transcript = {
            let _interception = Interception::install(engine.progress_slot(), cell.clone());
            let sampler = ProgressSampler::start(
                self.store.clone(),
                job_id,
                cell,
                mapping,
                self.settings.sample_interval,
            )?;
            let result = engine.transcribe(&request);
            let writes = sampler.stop();
            debug!("Job {} engine run done after {} progress writes", job_id, writes);
            result
        };
        drop(engine);
        let transcript = transcript.map_err(JobRunError::Engine)?;

        self.store
            .record_progress(job_id, mapping.core_end, JobStage::Finalizing)?;
        let output_count = self.store.replace_segments(job_id, &transcript.segments)?;
        self.store
            .record_progress(job_id, mapping.finalized, JobStage::Finalizing)?;

        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch directory for {}: {}", job_id, e);
        }
        Ok(output_count as u64)
    }

    /// Acquires the engine, retrying loads with capped exponential backoff.
    ///
    /// Only [`EngineError::Unavailable`] is retried; the record stays at
    /// "loading engine" meanwhile.
    fn acquire_engine(&self, job_id: &str) -> Result<EngineGuard<'_>, JobRunError> {
        let wait_started = Instant::now();
        let mut delay = self.settings.engine_retry_initial;
        let mut attempts = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(JobRunError::ShuttingDown);
            }
            attempts += 1;
            match self.engine.acquire() {
                Ok(guard) => {
                    metrics::record_engine_lock_wait(guard.waited());
                    self.audit
                        .log_engine_ready(job_id, wait_started.elapsed(), attempts);
                    self.requeue_engine_waiters(job_id);
                    return Ok(guard);
                }
                Err(EngineError::Unavailable(reason)) => {
                    warn!(
                        "Engine unavailable for job {} (attempt {}): {}. Retrying in {:?}",
                        job_id, attempts, reason, delay
                    );
                    self.sleep_unless_shutdown(delay);
                    delay = (delay * 2).min(self.settings.engine_retry_max);
                }
                Err(err) => return Err(JobRunError::Engine(err)),
            }
        }
    }

    /// Jobs created while the engine was cold keep "loading engine" until they
    /// get the engine. Once a job holds a loaded engine the others are only
    /// waiting for the lock.
    fn requeue_engine_waiters(&self, job_id: &str) {
        match self.store.mark_engine_waiters_queued(job_id) {
            Ok(0) => {}
            Ok(count) => debug!("{} job(s) now queued behind {}", count, job_id),
            Err(e) => warn!("Failed to relabel jobs waiting for the engine: {}", e),
        }
    }

    fn sleep_unless_shutdown(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SHUTDOWN_POLL.min(deadline - now));
        }
    }

    fn finish_completed(&self, job_id: &str, output_count: u64, elapsed: Duration) {
        match self.store.complete_job(job_id, output_count) {
            Ok(true) => {
                info!(
                    "Job {} completed in {:?} with {} segments",
                    job_id, elapsed, output_count
                );
                metrics::record_job_finished("completed", elapsed);
                self.audit.log_completed(job_id, elapsed, output_count);
            }
            Ok(false) => self.report_write_conflict(job_id, "completed"),
            Err(e) => error!("Failed to mark job {} completed: {}", job_id, e),
        }
    }

    fn finish_failed(&self, job_id: &str, err: &JobRunError, elapsed: Duration) {
        let failure = JobFailure::new(err.kind(), err.to_string());
        error!("Job {} failed after {:?}: {}", job_id, elapsed, err);
        match self.store.fail_job(job_id, &failure) {
            Ok(true) => {
                metrics::record_job_finished("failed", elapsed);
                self.audit.log_failed(job_id, elapsed, &failure);
            }
            Ok(false) => self.report_write_conflict(job_id, "failed"),
            Err(e) => error!("Failed to mark job {} failed: {}", job_id, e),
        }
    }

    fn report_write_conflict(&self, job_id: &str, attempted: &str) {
        error!(
            "Job {} was no longer processing when writing {}; record left untouched",
            job_id, attempted
        );
        self.audit.log_write_conflict(job_id, attempted);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
