//! Follows a transcription job from the terminal.

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scribe_server::job_store::JobStatus;
use scribe_server::sync::{
    HttpJobsApi, JobSynchronizer, SyncError, SyncPhase, SyncSettings, TrackedJob,
};

const BAR_LENGTH: u64 = 1000;
const BAR_TEMPLATE: &str = "{spinner} [{elapsed_precise}] [{bar:40}] {percent:>3}% {msg}";

fn get_styles() -> Styles {
    let header = Style::new()
        .bold()
        .fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
    Styles::styled()
        .usage(header)
        .header(header)
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    /// Resource whose job to follow.
    pub resource_id: String,

    /// Base URL of the scribe server.
    #[clap(long, default_value = "http://localhost:3010")]
    pub server_url: String,

    /// Request a start before following the job.
    #[clap(long)]
    pub start: bool,

    /// Status poll interval in milliseconds.
    #[clap(long, default_value_t = 2000)]
    pub poll_interval_ms: u64,

    /// Per-request timeout in seconds.
    #[clap(long, default_value_t = 10)]
    pub timeout_sec: u64,
}

fn main() -> Result<ExitCode> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::ERROR.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(follow(cli_args))
}

async fn follow(args: CliArgs) -> Result<ExitCode> {
    let api = HttpJobsApi::new(&args.server_url, Duration::from_secs(args.timeout_sec))?;
    let settings = SyncSettings {
        poll_interval: Duration::from_millis(args.poll_interval_ms.max(100)),
        ..SyncSettings::default()
    };
    let sync = JobSynchronizer::new(Arc::new(api), settings);
    let mut views = sync.subscribe();

    sync.track(&args.resource_id);
    if args.start {
        match sync.request_start().await {
            Ok(_) => {}
            Err(SyncError::Api(e)) => bail!("Could not start {}: {}", args.resource_id, e),
            Err(e) => bail!(e),
        }
    }

    let bar = ProgressBar::new(BAR_LENGTH);
    bar.set_style(ProgressStyle::with_template(BAR_TEMPLATE)?.progress_chars("=> "));
    bar.enable_steady_tick(Duration::from_millis(120));

    loop {
        let view = views.borrow_and_update().clone();
        if let Some(view) = view {
            render(&bar, &view);
            if let Some(code) = finished(&bar, &view) {
                return Ok(code);
            }
        }

        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    bar.abandon_with_message("synchronizer stopped");
                    return Ok(ExitCode::FAILURE);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                bar.abandon_with_message("interrupted");
                return Ok(ExitCode::from(130));
            }
        }
    }
}

fn render(bar: &ProgressBar, view: &TrackedJob) {
    let Some(info) = &view.info else {
        bar.set_message("fetching status...");
        return;
    };
    bar.set_position((info.progress.clamp(0.0, 1.0) * BAR_LENGTH as f64) as u64);

    let mut message = match view.phase {
        SyncPhase::OptimisticProcessing => "starting".to_string(),
        _ => info.stage.clone().unwrap_or_else(|| info.status.as_str().to_string()),
    };
    if view.overdue {
        message.push_str(" (taking longer than usual)");
    }
    if let Some(err) = view.start_error.as_ref().or(view.last_error.as_ref()) {
        message.push_str(&format!(" [{}]", err));
    }
    bar.set_message(message);
}

fn finished(bar: &ProgressBar, view: &TrackedJob) -> Option<ExitCode> {
    let info = view.info.as_ref()?;
    match (view.phase, info.status) {
        (SyncPhase::Settled, JobStatus::Completed) => {
            bar.set_position(BAR_LENGTH);
            bar.finish_with_message(format!("completed, {} segments", info.output_count));
            Some(ExitCode::SUCCESS)
        }
        (SyncPhase::Settled, _) => {
            let reason = info
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or_else(|| "unknown error".to_string());
            bar.abandon_with_message(format!("failed ({})", reason));
            Some(ExitCode::FAILURE)
        }
        (SyncPhase::Idle, JobStatus::NotStarted) => {
            bar.abandon_with_message("not started (use --start)");
            Some(ExitCode::from(2))
        }
        _ => None,
    }
}
