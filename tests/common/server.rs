//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own job database, media
//! directory and fake engine.

use super::constants::*;
use super::fake_engine::{FakeEngineControl, FakeLoader, FakeOutcome};
use scribe_server::engine::EngineHost;
use scribe_server::jobs::{DirectoryResourceLocator, JobRunner, RunnerSettings};
use scribe_server::{make_app, JobStore, RequestsLoggingLevel, ServerConfig, SqliteJobStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Knobs for [`TestServer::spawn_with`]
pub struct TestServerOptions {
    /// When false, engine loading blocks until `engine.open_gate()`.
    pub engine_gate_open: bool,
    pub outcome: FakeOutcome,
    /// Delay between the fake engine's progress ticks
    pub step_delay: Duration,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            engine_gate_open: true,
            outcome: FakeOutcome::Transcribe,
            step_delay: Duration::from_millis(20),
        }
    }
}

/// Test server instance with isolated state
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Job store for direct database access in tests
    pub job_store: Arc<dyn JobStore>,

    /// Handle on the fake engine behind the server
    pub engine: Arc<FakeEngineControl>,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a server whose engine loads immediately and succeeds
    pub async fn spawn() -> Self {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the temp dirs, the database or the listener cannot be set
    /// up, or if the server doesn't become ready within the timeout.
    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let media_dir = temp_dir.path().join("media");
        std::fs::create_dir_all(&media_dir).expect("Failed to create media dir");
        for id in [MEDIA_1_ID, MEDIA_2_ID] {
            std::fs::write(media_dir.join(format!("{}.wav", id)), b"RIFF....WAVEfmt ")
                .expect("Failed to write media file");
        }

        let job_store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(temp_dir.path().join("jobs.db"))
                .expect("Failed to open job store"),
        );

        let engine = FakeEngineControl::new(
            options.engine_gate_open,
            options.outcome,
            options.step_delay,
        );
        let engine_host = Arc::new(EngineHost::new(Box::new(FakeLoader {
            control: engine.clone(),
        })));

        let runner = Arc::new(JobRunner::new(
            job_store.clone(),
            engine_host,
            Arc::new(DirectoryResourceLocator::new(&media_dir)),
            RunnerSettings {
                sample_interval: Duration::from_millis(SAMPLE_INTERVAL_MS),
                scratch_dir: temp_dir.path().join("scratch"),
                ..Default::default()
            },
            CancellationToken::new(),
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        let app = make_app(config, job_store.clone(), runner).expect("Failed to build app");

        // Spawn server in background task with graceful shutdown
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            job_store,
            engine,
            _temp_dir: temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Workers parked on the engine gate would otherwise outlive the test
        self.engine.open_gate();
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
