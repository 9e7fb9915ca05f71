use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "slowdown")]
use super::slowdown_request;
use super::{job_routes::make_job_routes, log_requests, metrics, state::*, ServerConfig};
use crate::engine::EngineState;
use crate::job_store::JobStore;
use crate::jobs::JobRunner;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub engine_state: EngineState,
    pub engine: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let engine = state.job_runner.engine();
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        engine_state: engine.state(),
        engine: engine.describe(),
    })
}

impl ServerState {
    fn new(config: ServerConfig, job_store: GuardedJobStore, job_runner: GuardedJobRunner) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            job_store,
            job_runner,
            hash: env!("GIT_HASH").to_owned(),
        }
    }
}

pub fn make_app(
    config: ServerConfig,
    job_store: Arc<dyn JobStore>,
    job_runner: Arc<JobRunner>,
) -> Result<Router> {
    let state = ServerState::new(config, job_store, job_runner);

    let home_router: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone());

    let mut app: Router = home_router.nest("/jobs", make_job_routes(state.clone()));

    #[cfg(feature = "slowdown")]
    {
        app = app.layer(middleware::from_fn(slowdown_request));
    }
    app = app.layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    let app: Router = Router::new().route("/metrics", get(metrics::metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Serves the API and the metrics endpoint until `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    job_store: Arc<dyn JobStore>,
    job_runner: Arc<JobRunner>,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, job_store, job_runner)?;

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;

    let metrics_shutdown = shutdown.clone();
    let metrics_task = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_port, metrics_shutdown).await {
            tracing::error!("Metrics server failed: {:#}", e);
        }
    });

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    let _ = metrics_task.await;
    Ok(())
}
