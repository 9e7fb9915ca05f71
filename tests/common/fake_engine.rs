//! Scripted transcription engine for end-to-end tests
//!
//! Loading blocks until the gate is opened, transcription reports outer
//! progress ticks and then succeeds or fails as scripted.

use scribe_server::engine::{
    EngineError, EngineLoader, ProgressSlot, ProgressTick, Transcript, TranscriptionEngine,
    TranscriptionRequest,
};
use scribe_server::job_store::TranscriptSegment;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::constants::FAKE_SEGMENT_COUNT;

#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Transcribe,
    Fail(String),
}

/// Shared handle used by tests to steer and inspect the engine
pub struct FakeEngineControl {
    gate: (Mutex<bool>, Condvar),
    outcome: Mutex<FakeOutcome>,
    step_delay: Duration,
    loads: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeEngineControl {
    pub fn new(gate_open: bool, outcome: FakeOutcome, step_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            gate: (Mutex::new(gate_open), Condvar::new()),
            outcome: Mutex::new(outcome),
            step_delay,
            loads: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// Lets pending and future loads complete
    pub fn open_gate(&self) {
        let (open, cvar) = &self.gate;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn set_outcome(&self, outcome: FakeOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    /// Number of completed engine loads
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of transcribe invocations
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn wait_for_gate(&self) {
        let (open, cvar) = &self.gate;
        let mut open = open.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

pub struct FakeLoader {
    pub control: Arc<FakeEngineControl>,
}

impl EngineLoader for FakeLoader {
    fn describe(&self) -> String {
        "fake engine".to_string()
    }

    fn load(&self) -> Result<Box<dyn TranscriptionEngine>, EngineError> {
        self.control.wait_for_gate();
        self.control.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngine {
            control: self.control.clone(),
            slot: ProgressSlot::new(),
        }))
    }
}

struct FakeEngine {
    control: Arc<FakeEngineControl>,
    slot: ProgressSlot,
}

impl TranscriptionEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn progress_slot(&self) -> &ProgressSlot {
        &self.slot
    }

    fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcript, EngineError> {
        self.control.calls.fetch_add(1, Ordering::SeqCst);

        let total = FAKE_SEGMENT_COUNT as u64;
        for step in 1..=total {
            std::thread::sleep(self.control.step_delay);
            self.slot.emit(ProgressTick::outer(step, total));
        }

        match self.control.outcome.lock().unwrap().clone() {
            FakeOutcome::Transcribe => Ok(Transcript {
                segments: (0..FAKE_SEGMENT_COUNT)
                    .map(|index| TranscriptSegment {
                        index,
                        start_ms: index as u64 * 1000,
                        end_ms: (index as u64 + 1) * 1000,
                        text: format!(
                            "segment {} of {}",
                            index,
                            request.media_path.display()
                        ),
                    })
                    .collect(),
            }),
            FakeOutcome::Fail(message) => Err(EngineError::Execution(message)),
        }
    }
}
