//! Engine backed by a whisper.cpp style command line program.
//!
//! The program is invoked once per job with progress printing enabled:
//! progress lines (`... progress = 42%`) arrive on stderr, timestamped
//! segments (`[00:00:01.000 --> 00:00:03.500]  text`) on stdout.

use super::{
    EngineError, EngineLoader, ProgressSlot, ProgressTick, Transcript, TranscriptionEngine,
    TranscriptionRequest,
};
use crate::job_store::TranscriptSegment;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

lazy_static! {
    static ref PROGRESS_LINE: Regex = Regex::new(r"progress\s*=\s*(\d{1,3})\s*%").unwrap();
    static ref SEGMENT_LINE: Regex = Regex::new(
        r"^\[(\d+):(\d{2}):(\d{2})\.(\d{3})\s*-->\s*(\d+):(\d{2}):(\d{2})\.(\d{3})\]\s*(.*)$"
    )
    .unwrap();
}

#[derive(Debug, Clone)]
pub struct CommandEngineConfig {
    pub program: PathBuf,
    pub model_path: PathBuf,
    /// Extra arguments appended after the standard ones.
    pub extra_args: Vec<String>,
    pub threads: Option<usize>,
}

pub struct CommandEngineLoader {
    config: CommandEngineConfig,
}

impl CommandEngineLoader {
    pub fn new(config: CommandEngineConfig) -> Self {
        Self { config }
    }
}

impl EngineLoader for CommandEngineLoader {
    fn describe(&self) -> String {
        format!(
            "command {} (model {})",
            self.config.program.display(),
            self.config.model_path.display()
        )
    }

    fn load(&self) -> Result<Box<dyn TranscriptionEngine>, EngineError> {
        if !self.config.model_path.is_file() {
            return Err(EngineError::Unavailable(format!(
                "model file {} not found",
                self.config.model_path.display()
            )));
        }

        let status = Command::new(&self.config.program)
            .arg("--help")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                EngineError::Unavailable(format!(
                    "cannot run {}: {}",
                    self.config.program.display(),
                    e
                ))
            })?;
        debug!(
            "{} --help exited with {}",
            self.config.program.display(),
            status
        );

        Ok(Box::new(CommandEngine {
            config: self.config.clone(),
            slot: ProgressSlot::new(),
        }))
    }
}

pub struct CommandEngine {
    config: CommandEngineConfig,
    slot: ProgressSlot,
}

impl CommandEngine {
    fn build_command(&self, request: &TranscriptionRequest) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .arg("-m")
            .arg(&self.config.model_path)
            .arg("-f")
            .arg(&request.media_path)
            .arg("--print-progress");
        if let Some(language) = &request.language {
            command.arg("-l").arg(language);
        }
        if let Some(threads) = self.config.threads {
            command.arg("-t").arg(threads.to_string());
        }
        command
            .args(&self.config.extra_args)
            .current_dir(&request.scratch_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl TranscriptionEngine for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    fn progress_slot(&self) -> &ProgressSlot {
        &self.slot
    }

    fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcript, EngineError> {
        let mut child = self.build_command(request).spawn().map_err(|e| {
            EngineError::Execution(format!(
                "failed to spawn {}: {}",
                self.config.program.display(),
                e
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Execution("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Execution("child stderr not captured".to_string()))?;

        // Both pipes must be drained concurrently or the child can block on a
        // full stderr buffer while we wait on stdout.
        let (segments, stderr_tail) = thread::scope(|scope| {
            let stderr_reader = scope.spawn(|| {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                for_each_line(stderr, |line| {
                    if let Some(percent) = parse_progress_line(line) {
                        self.slot.emit(ProgressTick::outer(percent, 100));
                        return;
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                });
                tail
            });

            let mut segments = Vec::new();
            for_each_line(stdout, |line| {
                if let Some(segment) = parse_segment_line(line, segments.len() as u32) {
                    segments.push(segment);
                }
            });

            let tail = stderr_reader.join().unwrap_or_default();
            (segments, tail)
        });

        let status = child
            .wait()
            .map_err(|e| EngineError::Execution(format!("failed to wait for engine: {}", e)))?;
        if !status.success() {
            let details = stderr_tail.into_iter().collect::<Vec<_>>().join("\n");
            return Err(EngineError::Execution(format!(
                "engine exited with {}: {}",
                status, details
            )));
        }

        Ok(Transcript { segments })
    }
}

/// Calls `handle` for every line until EOF.
///
/// Invalid UTF-8 is replaced rather than treated as an error: the engine can
/// split a multi-byte character across segments, and the pipe has to be
/// drained to the end either way.
fn for_each_line(output: impl Read, mut handle: impl FnMut(&str)) {
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                handle(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Stopped reading engine output: {}", e);
                break;
            }
        }
    }
}

fn parse_progress_line(line: &str) -> Option<u64> {
    let captures = PROGRESS_LINE.captures(line)?;
    let percent: u64 = captures[1].parse().ok()?;
    Some(percent.min(100))
}

fn timestamp_ms(hours: &str, minutes: &str, seconds: &str, millis: &str) -> Option<u64> {
    let hours: u64 = hours.parse().ok()?;
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    let millis: u64 = millis.parse().ok()?;
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

fn parse_segment_line(line: &str, index: u32) -> Option<TranscriptSegment> {
    let c = SEGMENT_LINE.captures(line.trim())?;
    let start_ms = timestamp_ms(&c[1], &c[2], &c[3], &c[4])?;
    let end_ms = timestamp_ms(&c[5], &c[6], &c[7], &c[8])?;
    let text = c[9].trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some(TranscriptSegment {
        index,
        start_ms,
        end_ms,
        text,
    })
}
