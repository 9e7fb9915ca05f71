use super::{EngineError, EngineLoader, TranscriptionEngine};
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Cold,
    Loading,
    Ready,
    Unavailable,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Loading,
            2 => EngineState::Ready,
            3 => EngineState::Unavailable,
            _ => EngineState::Cold,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            EngineState::Cold => 0,
            EngineState::Loading => 1,
            EngineState::Ready => 2,
            EngineState::Unavailable => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Cold => "cold",
            EngineState::Loading => "loading",
            EngineState::Ready => "ready",
            EngineState::Unavailable => "unavailable",
        }
    }
}

/// Owns the process-wide engine instance.
///
/// The engine is loaded on the first [`acquire`](Self::acquire) and kept for
/// the lifetime of the host. Holding an [`EngineGuard`] is the only way to
/// use it, so at most one job runs inside the engine at any time.
pub struct EngineHost {
    loader: Box<dyn EngineLoader>,
    engine: Mutex<Option<Arc<dyn TranscriptionEngine>>>,
    state: AtomicU8,
}

/// Exclusive access to the loaded engine; released on drop.
pub struct EngineGuard<'a> {
    _lock: MutexGuard<'a, Option<Arc<dyn TranscriptionEngine>>>,
    engine: Arc<dyn TranscriptionEngine>,
    waited: Duration,
}

impl EngineGuard<'_> {
    /// Time spent waiting for the engine lock, excluding loading.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Deref for EngineGuard<'_> {
    type Target = dyn TranscriptionEngine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

impl EngineHost {
    pub fn new(loader: Box<dyn EngineLoader>) -> Self {
        Self {
            loader,
            engine: Mutex::new(None),
            state: AtomicU8::new(EngineState::Cold.as_u8()),
        }
    }

    /// Lock-free snapshot; never waits for a running job.
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    pub fn describe(&self) -> String {
        self.loader.describe()
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state.as_u8(), Ordering::Release);
        crate::server::metrics::set_engine_state(state);
    }

    /// Blocks until the engine is free, loading it first if needed.
    pub fn acquire(&self) -> Result<EngineGuard<'_>, EngineError> {
        let wait_started = Instant::now();
        let mut slot = match self.engine.lock() {
            Ok(slot) => slot,
            Err(poisoned) => {
                // A job panicked inside the engine; its internal state is suspect.
                warn!("Engine lock poisoned by a panicking job, discarding loaded engine");
                self.engine.clear_poison();
                let mut slot = poisoned.into_inner();
                *slot = None;
                self.set_state(EngineState::Cold);
                slot
            }
        };
        let waited = wait_started.elapsed();

        let engine = match slot.as_ref() {
            Some(engine) => engine.clone(),
            None => {
                self.set_state(EngineState::Loading);
                info!("Loading engine: {}", self.loader.describe());
                let load_started = Instant::now();
                match self.loader.load() {
                    Ok(engine) => {
                        let engine: Arc<dyn TranscriptionEngine> = Arc::from(engine);
                        *slot = Some(engine.clone());
                        self.set_state(EngineState::Ready);
                        info!(
                            "Engine '{}' ready in {:?}",
                            engine.name(),
                            load_started.elapsed()
                        );
                        engine
                    }
                    Err(err) => {
                        self.set_state(EngineState::Unavailable);
                        error!("Failed to load engine: {}", err);
                        return Err(err);
                    }
                }
            }
        };

        Ok(EngineGuard {
            _lock: slot,
            engine,
            waited,
        })
    }

    /// Loads the engine ahead of the first job.
    pub fn preload(&self) -> Result<(), EngineError> {
        self.acquire().map(|_| ())
    }
}
