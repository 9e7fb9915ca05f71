use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scribe_server::config::{AppConfig, CliConfig, EngineKind, FileConfig};
use scribe_server::engine::EngineHost;
use scribe_server::jobs::{DirectoryResourceLocator, JobRunner, ResourceLocator};
use scribe_server::server::metrics;
use scribe_server::{run_server, JobStore, RequestsLoggingLevel, ServerConfig, SqliteJobStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the job database (jobs.db).
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory with the media files to transcribe. Defaults to <db-dir>/media.
    #[clap(long, value_parser = parse_path)]
    pub media_dir: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3010)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9092)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Transcription engine implementation.
    #[clap(long, value_enum, default_value_t = EngineKind::Command)]
    pub engine: EngineKind,

    /// Engine program for the command engine. Defaults to whisper-cli on PATH.
    #[clap(long)]
    pub engine_program: Option<PathBuf>,

    /// Model file passed to the command engine.
    #[clap(long, value_parser = parse_path)]
    pub model_path: Option<PathBuf>,

    /// Spoken language hint passed to the engine.
    #[clap(long)]
    pub language: Option<String>,

    /// Load the engine at startup instead of on the first job.
    #[clap(long)]
    pub preload_engine: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            media_dir: self.media_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            engine: self.engine,
            engine_program: self.engine_program.clone(),
            model_path: self.model_path.clone(),
            language: self.language.clone(),
            preload_engine: self.preload_engine,
        }
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let shutdown_grace = config.shutdown_grace;
    let result = runtime.block_on(serve(config));

    // Workers still running get a bounded amount of time; whatever is cut
    // short stays PROCESSING and is reported on the next start.
    info!("Waiting up to {:?} for running jobs...", shutdown_grace);
    runtime.shutdown_timeout(shutdown_grace);
    result
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("Initializing metrics...");
    metrics::init_metrics();

    let job_db_path = config.job_db_path();
    info!("Opening SQLite job database at {:?}...", job_db_path);
    let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(&job_db_path)?);

    let engine = Arc::new(EngineHost::new(config.engine.loader()));
    info!("Transcription engine: {}", engine.describe());

    let resources: Arc<dyn ResourceLocator> = Arc::new(
        DirectoryResourceLocator::new(&config.media_dir)
            .with_extensions(config.media_extensions.clone()),
    );
    info!("Serving media from {:?}", config.media_dir);

    let shutdown = CancellationToken::new();
    let job_runner = Arc::new(JobRunner::new(
        job_store.clone(),
        engine.clone(),
        resources,
        config.runner.clone(),
        shutdown.clone(),
    ));

    let stale = job_runner.report_stale_jobs()?;
    if !stale.is_empty() {
        warn!("{} job(s) were interrupted by the previous shutdown", stale.len());
    }

    if config.engine.preload {
        let preload_engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            info!("Preloading transcription engine...");
            if let Err(e) = preload_engine.preload() {
                error!("Engine preload failed, will retry on first job: {}", e);
            }
        });
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal_shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
    };
    run_server(server_config, job_store, job_runner, shutdown).await
}
