mod file_config;

pub use file_config::{EngineConfig, FileConfig, RunnerConfig};

use crate::engine::{
    CommandEngineConfig, CommandEngineLoader, EngineLoader, SimulatedEngineConfig,
    SimulatedEngineLoader,
};
use crate::jobs::{RunnerSettings, DEFAULT_MEDIA_EXTENSIONS};
use crate::server::RequestsLoggingLevel;
use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ENGINE_PROGRAM: &str = "whisper-cli";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EngineKind {
    /// An external whisper.cpp style program
    #[default]
    Command,
    /// Development engine that only sleeps
    Simulated,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub engine: EngineKind,
    pub engine_program: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub language: Option<String>,
    pub preload_engine: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub media_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Feature configs (with defaults)
    pub engine: EngineSettings,
    pub runner: RunnerSettings,
    pub media_extensions: Vec<String>,
    /// How long shutdown waits for running workers before exiting.
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub kind: EngineKind,
    pub preload: bool,
    /// Only set for [`EngineKind::Command`].
    pub command: Option<CommandEngineConfig>,
    pub simulated: SimulatedEngineConfig,
}

impl EngineSettings {
    pub fn loader(&self) -> Box<dyn EngineLoader> {
        match (&self.kind, &self.command) {
            (EngineKind::Command, Some(command)) => {
                Box::new(CommandEngineLoader::new(command.clone()))
            }
            _ => Box::new(SimulatedEngineLoader::new(self.simulated.clone())),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_dir = file
            .media_dir
            .map(PathBuf::from)
            .or_else(|| cli.media_dir.clone())
            .unwrap_or_else(|| db_dir.join("media"));
        if !media_dir.is_dir() {
            bail!("Media directory does not exist: {:?}", media_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let engine_file = file.engine.unwrap_or_default();
        let engine = resolve_engine(cli, &engine_file)?;

        let runner_file = file.runner.unwrap_or_default();
        let defaults = RunnerSettings::default();
        let runner = RunnerSettings {
            sample_interval: runner_file
                .sample_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sample_interval),
            engine_retry_initial: runner_file
                .engine_retry_initial_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine_retry_initial),
            engine_retry_max: runner_file
                .engine_retry_max_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine_retry_max),
            scratch_dir: runner_file
                .scratch_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| db_dir.join("scratch")),
            language: engine_file.language.or_else(|| cli.language.clone()),
            mapping: defaults.mapping,
        };
        if runner.sample_interval.is_zero() {
            bail!("runner.sample_interval_ms must be greater than zero");
        }

        let media_extensions = runner_file.media_extensions.unwrap_or_else(|| {
            DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect()
        });
        let shutdown_grace = Duration::from_secs(runner_file.shutdown_grace_secs.unwrap_or(10));

        Ok(Self {
            db_dir,
            media_dir,
            port,
            metrics_port,
            logging_level,
            engine,
            runner,
            media_extensions,
            shutdown_grace,
        })
    }

    pub fn job_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }
}

fn resolve_engine(cli: &CliConfig, file: &EngineConfig) -> Result<EngineSettings> {
    let kind = match &file.kind {
        Some(kind) => EngineKind::from_str(kind, true)
            .map_err(|_| anyhow!("Unknown engine kind in config file: {:?}", kind))?,
        None => cli.engine,
    };
    let preload = file.preload.unwrap_or(cli.preload_engine);

    let command = match kind {
        EngineKind::Command => {
            let model_path = file
                .model_path
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| cli.model_path.clone())
                .ok_or_else(|| {
                    anyhow!("model_path must be specified via --model-path or in [engine]")
                })?;
            let program = file
                .program
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| cli.engine_program.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_PROGRAM));
            let extra_args = match &file.args {
                Some(args) => shlex::split(args)
                    .ok_or_else(|| anyhow!("Invalid quoting in [engine] args: {:?}", args))?,
                None => Vec::new(),
            };
            Some(CommandEngineConfig {
                program,
                model_path,
                extra_args,
                threads: file.threads,
            })
        }
        EngineKind::Simulated => None,
    };

    let mut simulated = SimulatedEngineConfig::default();
    if let Some(secs) = file.simulated_warmup_secs {
        simulated.warmup = Duration::from_secs_f64(secs.max(0.0));
    }
    if let Some(secs) = file.simulated_run_secs {
        simulated.run_time = Duration::from_secs_f64(secs.max(0.0));
    }
    if let Some(steps) = file.simulated_steps {
        simulated.steps = steps.max(1);
    }

    Ok(EngineSettings {
        kind,
        preload,
        command,
        simulated,
    })
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
