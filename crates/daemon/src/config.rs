use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

use engine::EngineConfig;

/// Daemon configuration, read from `CUTLINE_*` environment variables.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    /// Validated manifests are written here, one file per run.
    pub manifest_dir: PathBuf,
    /// OpenAI-compatible text-generation server. Unset means heuristic anchors.
    pub text_engine_url: Option<String>,
    pub text_model: String,
    /// Embedding service. Unset means zones by position only.
    pub embedding_url: Option<String>,
    pub request_timeout: Duration,
    pub log_level: LevelFilter,
    pub engine: EngineConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|s| s.parse().ok())
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            db_path: PathBuf::from(".cache/cutline.db"),
            manifest_dir: PathBuf::from(".cache/manifests"),
            text_engine_url: None,
            text_model: "local".to_string(),
            embedding_url: None,
            request_timeout: Duration::from_secs(30),
            log_level: LevelFilter::INFO,
            engine: EngineConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let defaults = DaemonConfig::default();
        let mut engine = defaults.engine.clone();
        if let Some(secs) = env_parse("CUTLINE_CHUNK_TIMEOUT_SECS") {
            engine.chunk_timeout_secs = secs;
        }

        DaemonConfig {
            bind_addr: env_parse("CUTLINE_BIND").unwrap_or(defaults.bind_addr),
            db_path: env_var("CUTLINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            manifest_dir: env_var("CUTLINE_MANIFEST_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.manifest_dir),
            text_engine_url: env_var("CUTLINE_TEXT_ENGINE_URL"),
            text_model: env_var("CUTLINE_TEXT_MODEL").unwrap_or(defaults.text_model),
            embedding_url: env_var("CUTLINE_EMBEDDING_URL"),
            request_timeout: env_parse("CUTLINE_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            log_level: env_parse("CUTLINE_LOG").unwrap_or(defaults.log_level),
            engine,
        }
    }
}
