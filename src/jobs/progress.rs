//! Captures progress from inside an engine run and feeds it to the job store.
//!
//! The engine reports "N of Total" ticks through its [`ProgressSlot`]. For the
//! duration of one invocation an [`Interception`] swaps in a wrapper that
//! records the outermost fraction into a [`ProgressCell`], and a
//! [`ProgressSampler`] thread periodically persists the mapped value.

use crate::engine::{ProgressHook, ProgressSlot, ProgressTick};
use crate::job_store::{JobStage, JobStore};
use crate::server::metrics;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed mapping from job phases to overall progress.
///
/// Setup occupies [0, core_start), the engine run [core_start, core_end] and
/// finalization (core_end, 1.0].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressMapping {
    pub loading_engine: f64,
    pub preparing_input: f64,
    pub core_start: f64,
    pub core_end: f64,
    /// Reached once output has been persisted, before the job completes.
    pub finalized: f64,
}

impl Default for ProgressMapping {
    fn default() -> Self {
        Self {
            loading_engine: 0.05,
            preparing_input: 0.10,
            core_start: 0.15,
            core_end: 0.85,
            finalized: 0.95,
        }
    }
}

impl ProgressMapping {
    /// Progress and stage written when a job is (re)created.
    pub fn initial(&self, engine_ready: bool) -> (f64, JobStage) {
        if engine_ready {
            (0.0, JobStage::Queued)
        } else {
            (self.loading_engine, JobStage::LoadingEngine)
        }
    }

    /// Maps an engine fraction in [0, 1] to overall progress.
    pub fn core(&self, engine_progress: f64) -> f64 {
        let engine_progress = engine_progress.clamp(0.0, 1.0);
        self.core_start + engine_progress * (self.core_end - self.core_start)
    }
}

/// Lock-free monotonic maximum of the engine's outermost fraction.
#[derive(Debug, Default)]
pub struct ProgressCell {
    bits: AtomicU64,
}

impl ProgressCell {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Raises the stored value to `value` if it is greater. NaN is ignored.
    pub fn raise(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        let _ = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if value > f64::from_bits(current) {
                    Some(value.to_bits())
                } else {
                    None
                }
            });
    }
}

/// Wraps `original` so outermost ticks are recorded into `cell`.
///
/// The wrapper closes over the hook it was given and forwards every tick to
/// it; it never looks the slot up again.
pub fn capture_hook(original: ProgressHook, cell: Arc<ProgressCell>) -> ProgressHook {
    Arc::new(move |tick: &ProgressTick| {
        if tick.is_outermost() {
            if let Some(fraction) = tick.fraction() {
                cell.raise(fraction);
            }
        }
        original(tick);
    })
}

/// Scoped installation of a capturing hook; restores the captured hook on drop.
pub struct Interception<'a> {
    slot: &'a ProgressSlot,
    original: Option<ProgressHook>,
}

impl<'a> Interception<'a> {
    pub fn install(slot: &'a ProgressSlot, cell: Arc<ProgressCell>) -> Self {
        let original = slot.current();
        slot.replace(capture_hook(original.clone(), cell));
        Self {
            slot,
            original: Some(original),
        }
    }
}

impl Drop for Interception<'_> {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            self.slot.replace(original);
        }
    }
}

/// Background thread persisting the cell's value while the engine runs.
///
/// Writes only when the value changed since the previous write. Dropping the
/// sampler stops and joins it.
pub struct ProgressSampler {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl ProgressSampler {
    pub fn start(
        store: Arc<dyn JobStore>,
        job_id: &str,
        cell: Arc<ProgressCell>,
        mapping: ProgressMapping,
        interval: Duration,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let job_id = job_id.to_string();

        let handle = thread::Builder::new()
            .name(format!("sampler-{}", job_id))
            .spawn(move || {
                let mut last_written: Option<f64> = None;
                let mut writes = 0u64;
                loop {
                    let stopping = match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => false,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                    };

                    let engine_progress = cell.get();
                    if last_written != Some(engine_progress) {
                        let progress = mapping.core(engine_progress);
                        match store.record_progress(&job_id, progress, JobStage::Transcribing) {
                            Ok(true) => {
                                debug!("Job {} progress {:.3}", job_id, progress);
                                metrics::record_progress_write();
                                writes += 1;
                            }
                            Ok(false) => {
                                debug!("Job {} no longer processing, sample dropped", job_id)
                            }
                            Err(e) => warn!("Failed to record progress for {}: {}", job_id, e),
                        }
                        last_written = Some(engine_progress);
                    }

                    if stopping {
                        break;
                    }
                }
                writes
            })
            .context("Failed to spawn progress sampler thread")?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Flushes the latest value, stops the thread and waits for it.
    ///
    /// Returns the number of progress writes made.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for ProgressSampler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
