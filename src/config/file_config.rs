use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Feature configs
    pub engine: Option<EngineConfig>,
    pub runner: Option<RunnerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine implementation: "command" or "simulated"
    pub kind: Option<String>,
    pub program: Option<String>,
    pub model_path: Option<String>,
    /// Extra program arguments, shell-quoted
    pub args: Option<String>,
    pub threads: Option<usize>,
    pub language: Option<String>,
    /// Load the engine at startup instead of on the first job
    pub preload: Option<bool>,
    // Simulated engine timings
    pub simulated_warmup_secs: Option<f64>,
    pub simulated_run_secs: Option<f64>,
    pub simulated_steps: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RunnerConfig {
    pub sample_interval_ms: Option<u64>,
    pub engine_retry_initial_secs: Option<u64>,
    pub engine_retry_max_secs: Option<u64>,
    pub scratch_dir: Option<String>,
    pub shutdown_grace_secs: Option<u64>,
    pub media_extensions: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: FileConfig = toml::from_str(
            r#"
            db_dir = "/var/lib/scribe"
            port = 4000
            logging_level = "headers"

            [engine]
            kind = "command"
            program = "/opt/whisper/whisper-cli"
            model_path = "/opt/whisper/ggml-base.bin"
            args = "--beam-size 5 --prompt 'Hello there'"
            preload = true

            [runner]
            sample_interval_ms = 500
            media_extensions = ["wav", "flac"]
            "#,
        )
        .unwrap();

        assert_eq!(config.db_dir.as_deref(), Some("/var/lib/scribe"));
        assert_eq!(config.port, Some(4000));
        let engine = config.engine.unwrap();
        assert_eq!(engine.kind.as_deref(), Some("command"));
        assert_eq!(engine.preload, Some(true));
        let runner = config.runner.unwrap();
        assert_eq!(runner.sample_interval_ms, Some(500));
        assert_eq!(
            runner.media_extensions,
            Some(vec!["wav".to_string(), "flac".to_string()])
        );
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.db_dir.is_none());
        assert!(config.engine.is_none());
        assert!(config.runner.is_none());
    }
}
