use super::{
    EngineError, EngineLoader, ProgressSlot, ProgressTick, Transcript, TranscriptionEngine,
    TranscriptionRequest,
};
use crate::job_store::TranscriptSegment;
use std::thread;
use std::time::Duration;

/// Timings of the development engine.
#[derive(Debug, Clone)]
pub struct SimulatedEngineConfig {
    pub warmup: Duration,
    pub run_time: Duration,
    pub steps: u32,
    /// Inner ticks emitted per outer step, reported with depth 1.
    pub inner_steps: u32,
}

impl Default for SimulatedEngineConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(3),
            run_time: Duration::from_secs(20),
            steps: 20,
            inner_steps: 4,
        }
    }
}

/// Caps on the configured step counts.
const MAX_STEPS: u32 = 10_000;
const MAX_INNER_STEPS: u32 = 100;

impl SimulatedEngineConfig {
    /// Outer steps, inner steps and the sleep before each inner tick.
    fn schedule(&self) -> (u32, u32, Duration) {
        let steps = self.steps.clamp(1, MAX_STEPS);
        let inner_steps = self.inner_steps.clamp(1, MAX_INNER_STEPS);
        (steps, inner_steps, self.run_time / (steps * inner_steps))
    }
}

pub struct SimulatedEngineLoader {
    config: SimulatedEngineConfig,
}

impl SimulatedEngineLoader {
    pub fn new(config: SimulatedEngineConfig) -> Self {
        Self { config }
    }
}

impl EngineLoader for SimulatedEngineLoader {
    fn describe(&self) -> String {
        format!(
            "simulated (warmup {:?}, run {:?})",
            self.config.warmup, self.config.run_time
        )
    }

    fn load(&self) -> Result<Box<dyn TranscriptionEngine>, EngineError> {
        thread::sleep(self.config.warmup);
        Ok(Box::new(SimulatedEngine {
            config: self.config.clone(),
            slot: ProgressSlot::new(),
        }))
    }
}

/// Sleeps through a fixed schedule and emits one segment per step.
///
/// Reads the input file so missing media fails the way a real engine would.
pub struct SimulatedEngine {
    config: SimulatedEngineConfig,
    slot: ProgressSlot,
}

impl TranscriptionEngine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    fn progress_slot(&self) -> &ProgressSlot {
        &self.slot
    }

    fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcript, EngineError> {
        let metadata = std::fs::metadata(&request.media_path).map_err(|e| {
            EngineError::Execution(format!(
                "cannot read {}: {}",
                request.media_path.display(),
                e
            ))
        })?;
        if metadata.len() == 0 {
            return Err(EngineError::Execution("input media is empty".to_string()));
        }

        let (steps, inner_steps, tick_sleep) = self.config.schedule();
        let segment_ms = 2_000u64;
        let mut segments = Vec::with_capacity(steps as usize);

        self.slot.emit(ProgressTick::outer(0, steps as u64));
        for step in 0..steps {
            for inner in 0..inner_steps {
                thread::sleep(tick_sleep);
                self.slot.emit(ProgressTick::nested(
                    (inner + 1) as u64,
                    inner_steps as u64,
                    1,
                ));
            }
            let start_ms = step as u64 * segment_ms;
            segments.push(TranscriptSegment {
                index: step,
                start_ms,
                end_ms: start_ms + segment_ms,
                text: format!("simulated segment {}", step + 1),
            });
            self.slot
                .emit(ProgressTick::outer((step + 1) as u64, steps as u64));
        }

        Ok(Transcript { segments })
    }
}
