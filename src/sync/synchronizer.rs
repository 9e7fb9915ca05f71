use super::api::{ApiError, JobsApi};
use super::cache::{JobCache, MergeDecision};
use crate::job_store::JobStatus;
use crate::jobs::JobStatusInfo;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// How long an optimistic entry wins over conflicting poll results.
    pub optimistic_grace: Duration,
    /// Upper bound for the poll interval multiplier after failed polls.
    pub max_backoff_factor: u32,
    /// Processing longer than this is flagged as overdue; `None` disables it.
    pub overdue_after: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            optimistic_grace: Duration::from_secs(1),
            max_backoff_factor: 4,
            overdue_after: Some(Duration::from_secs(30 * 60)),
        }
    }
}

impl SyncSettings {
    /// Delay before the next poll after `failures` consecutive failed polls.
    pub fn poll_delay(&self, failures: u32) -> Duration {
        let factor = 2u32
            .saturating_pow(failures)
            .min(self.max_backoff_factor.max(1));
        self.poll_interval * factor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    OptimisticProcessing,
    ConfirmedProcessing,
    Settled,
}

impl SyncPhase {
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            SyncPhase::OptimisticProcessing | SyncPhase::ConfirmedProcessing
        )
    }
}

/// What the client displays for the tracked resource.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJob {
    pub resource_id: String,
    pub phase: SyncPhase,
    pub info: Option<JobStatusInfo>,
    /// Error of the last failed poll; cleared by the next successful one.
    pub last_error: Option<String>,
    /// Error of the last start request; cleared by the next start.
    pub start_error: Option<String>,
    pub overdue: bool,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no resource is being tracked")]
    NotTracking,

    #[error("tracked resource changed while the request was in flight")]
    Superseded,

    #[error(transparent)]
    Api(#[from] ApiError),
}

struct SyncInner {
    /// Bumped whenever the tracked resource changes; results carrying an
    /// older generation are dropped.
    generation: u64,
    tracked: Option<String>,
    cache: JobCache,
    poll_task: Option<JoinHandle<()>>,
    failures: u32,
    last_error: Option<String>,
    start_error: Option<String>,
    processing_since: Option<Instant>,
}

impl SyncInner {
    fn switch_to(&mut self, resource_id: Option<&str>) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        if let Some(old) = self.tracked.take() {
            self.cache.remove(&old);
        }
        self.generation += 1;
        self.tracked = resource_id.map(str::to_string);
        self.failures = 0;
        self.last_error = None;
        self.start_error = None;
        self.processing_since = None;
    }

    fn phase(&self) -> SyncPhase {
        let Some(entry) = self.tracked.as_deref().and_then(|id| self.cache.get(id)) else {
            return SyncPhase::Idle;
        };
        if entry.is_optimistic() {
            return SyncPhase::OptimisticProcessing;
        }
        match entry.info.status {
            JobStatus::NotStarted => SyncPhase::Idle,
            JobStatus::Processing => SyncPhase::ConfirmedProcessing,
            JobStatus::Completed | JobStatus::Failed => SyncPhase::Settled,
        }
    }

    fn needs_polling(&self) -> bool {
        let Some(id) = self.tracked.as_deref() else {
            return false;
        };
        match self.cache.get(id) {
            None => self.failures > 0,
            Some(entry) => entry.is_optimistic() || entry.info.status == JobStatus::Processing,
        }
    }

    fn view(&mut self, settings: &SyncSettings, now: Instant) -> Option<TrackedJob> {
        let phase = self.phase();
        if phase.is_processing() {
            self.processing_since.get_or_insert(now);
        } else {
            self.processing_since = None;
        }
        let overdue = match (settings.overdue_after, self.processing_since) {
            (Some(limit), Some(since)) => now.saturating_duration_since(since) >= limit,
            _ => false,
        };

        let resource_id = self.tracked.clone()?;
        Some(TrackedJob {
            info: self.cache.get(&resource_id).map(|e| e.info.clone()),
            resource_id,
            phase,
            last_error: self.last_error.clone(),
            start_error: self.start_error.clone(),
            overdue,
        })
    }
}

struct Shared {
    api: Arc<dyn JobsApi>,
    settings: SyncSettings,
    inner: Mutex<SyncInner>,
    view_tx: watch::Sender<Option<TrackedJob>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncInner> {
        self.inner.lock().unwrap()
    }

    fn publish(&self, inner: &mut SyncInner, now: Instant) {
        let view = inner.view(&self.settings, now);
        let previous_phase = self.view_tx.borrow().as_ref().map(|v| v.phase);
        if let Some(view) = &view {
            if view.phase == SyncPhase::Settled && previous_phase != Some(SyncPhase::Settled) {
                info!(
                    "Job {} settled as {}",
                    view.resource_id,
                    view.info
                        .as_ref()
                        .map(|i| i.status.as_str())
                        .unwrap_or("unknown")
                );
            }
        }
        self.view_tx.send_replace(view);
    }

    /// Spawns the poll task for the tracked resource unless one is running.
    fn ensure_poller(self: &Arc<Self>, inner: &mut SyncInner) -> bool {
        let Some(resource_id) = inner.tracked.clone() else {
            return false;
        };
        if inner
            .poll_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return false;
        }
        let generation = inner.generation;
        let shared = Arc::clone(self);
        inner.poll_task = Some(tokio::spawn(async move {
            shared.poll_loop(resource_id, generation).await
        }));
        true
    }

    async fn poll_loop(self: Arc<Self>, resource_id: String, generation: u64) {
        let mut delay = Duration::ZERO;
        loop {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = self.api.job_status(&resource_id).await;

            let next_delay = {
                let mut inner = self.lock();
                if inner.generation != generation {
                    return;
                }
                let now = Instant::now();
                match result {
                    Ok(info) => {
                        inner.failures = 0;
                        inner.last_error = None;
                        if inner.cache.merge_poll(&resource_id, info, now)
                            == MergeDecision::KeptOptimistic
                        {
                            debug!("Ignored stale status for {} inside grace window", resource_id);
                        }
                    }
                    Err(err) => {
                        inner.failures = inner.failures.saturating_add(1);
                        warn!(
                            "Status poll for {} failed ({} in a row): {}",
                            resource_id, inner.failures, err
                        );
                        inner.last_error = Some(err.to_string());
                    }
                }
                self.publish(&mut inner, now);

                if !inner.needs_polling() {
                    inner.poll_task = None;
                    None
                } else {
                    Some(self.settings.poll_delay(inner.failures))
                }
            };

            match next_delay {
                Some(d) => delay = d,
                None => {
                    debug!("Stopped polling {}", resource_id);
                    return;
                }
            }
        }
    }
}

/// Client-side view of a single tracked job.
///
/// Polls the status endpoint while the job is processing, applies a start
/// request optimistically and drops any result that belongs to a resource
/// that is no longer tracked. Requires a tokio runtime.
pub struct JobSynchronizer {
    shared: Arc<Shared>,
}

impl JobSynchronizer {
    pub fn new(api: Arc<dyn JobsApi>, settings: SyncSettings) -> Self {
        let (view_tx, _) = watch::channel(None);
        let inner = SyncInner {
            generation: 0,
            tracked: None,
            cache: JobCache::new(settings.optimistic_grace),
            poll_task: None,
            failures: 0,
            last_error: None,
            start_error: None,
            processing_since: None,
        };
        Self {
            shared: Arc::new(Shared {
                api,
                settings,
                inner: Mutex::new(inner),
                view_tx,
            }),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.shared.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TrackedJob>> {
        self.shared.view_tx.subscribe()
    }

    pub fn snapshot(&self) -> Option<TrackedJob> {
        self.shared.view_tx.borrow().clone()
    }

    pub fn tracked(&self) -> Option<String> {
        self.shared.lock().tracked.clone()
    }

    /// Switches the view to `resource_id` and fetches its status.
    ///
    /// State of the previously tracked resource is discarded, including any
    /// response still in flight for it.
    pub fn track(&self, resource_id: &str) {
        let mut inner = self.shared.lock();
        if inner.tracked.as_deref() != Some(resource_id) {
            debug!("Tracking {}", resource_id);
            inner.switch_to(Some(resource_id));
            self.shared.publish(&mut inner, Instant::now());
        }
        self.shared.ensure_poller(&mut inner);
    }

    pub fn untrack(&self) {
        let mut inner = self.shared.lock();
        inner.switch_to(None);
        self.shared.publish(&mut inner, Instant::now());
    }

    /// Starts polling the tracked resource if no poll task is running.
    /// Returns whether a new task was spawned.
    pub fn ensure_polling(&self) -> bool {
        let mut inner = self.shared.lock();
        self.shared.ensure_poller(&mut inner)
    }

    /// Requests a start for the tracked resource.
    ///
    /// The view flips to processing before the request is sent. The response
    /// refreshes the optimistic entry and the next poll confirms it. If a poll
    /// that read the server before the start already settled the view, the
    /// response replaces it and polling resumes.
    pub async fn request_start(&self) -> Result<JobStatusInfo, SyncError> {
        let (resource_id, generation) = {
            let mut inner = self.shared.lock();
            let Some(resource_id) = inner.tracked.clone() else {
                return Err(SyncError::NotTracking);
            };
            let now = Instant::now();
            inner.cache.apply_optimistic(&resource_id, now);
            inner.start_error = None;
            self.shared.publish(&mut inner, now);
            self.shared.ensure_poller(&mut inner);
            (resource_id, inner.generation)
        };

        let result = self.shared.api.start_job(&resource_id).await;

        let mut inner = self.shared.lock();
        if inner.generation != generation {
            debug!("Dropped start response for untracked {}", resource_id);
            return Err(SyncError::Superseded);
        }
        let now = Instant::now();
        match result {
            Ok(info) => {
                inner.cache.apply_start_response(&resource_id, info.clone());
                self.shared.publish(&mut inner, now);
                // A slow poll may have stopped the poller before the start landed.
                if inner.needs_polling() {
                    self.shared.ensure_poller(&mut inner);
                }
                Ok(info)
            }
            Err(err) => {
                warn!("Start request for {} failed: {}", resource_id, err);
                inner.cache.revert_optimistic(&resource_id);
                inner.start_error = Some(err.to_string());
                self.shared.publish(&mut inner, now);
                Err(err.into())
            }
        }
    }
}

impl Drop for JobSynchronizer {
    fn drop(&mut self) {
        if let Some(task) = self.shared.lock().poll_task.take() {
            task.abort();
        }
    }
}
