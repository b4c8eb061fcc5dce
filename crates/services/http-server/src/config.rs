//! Configuration for the StreamRelay server
//!
//! Configuration can be loaded from a TOML file and/or environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use streamrelay_core::SupervisorConfig;

/// Main configuration for the StreamRelay server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Transcoding session configuration
    #[serde(default)]
    pub streams: StreamsConfig,

    /// Overlay store configuration
    #[serde(default)]
    pub overlays: OverlayConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Transcoding session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsConfig {
    /// Base directory for HLS output, one subdirectory per stream key
    #[serde(default = "default_hls_dir")]
    pub hls_dir: PathBuf,

    /// ffmpeg executable (name on PATH or absolute path)
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Segment duration used when a start request does not specify one
    #[serde(default = "default_segment_seconds")]
    pub default_segment_seconds: u32,

    /// Seconds after start before checking for an early exit
    #[serde(default = "default_health_check_delay")]
    pub health_check_delay_secs: u64,

    /// Seconds a stopping process gets before it is killed
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Re-encode fallbacks allowed per start
    #[serde(default = "default_fallback_attempts")]
    pub fallback_attempts: u32,
}

fn default_hls_dir() -> PathBuf {
    PathBuf::from("hls")
}

fn default_engine() -> String {
    "ffmpeg".to_string()
}

fn default_segment_seconds() -> u32 {
    2
}

fn default_health_check_delay() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_fallback_attempts() -> u32 {
    1
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            hls_dir: default_hls_dir(),
            engine: default_engine(),
            default_segment_seconds: default_segment_seconds(),
            health_check_delay_secs: default_health_check_delay(),
            stop_timeout_secs: default_stop_timeout(),
            fallback_attempts: default_fallback_attempts(),
        }
    }
}

impl StreamsConfig {
    /// Supervisor configuration derived from these settings
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::default()
            .with_engine(self.engine.clone())
            .with_output_dir(self.hls_dir.clone())
            .with_health_check_delay(Duration::from_secs(self.health_check_delay_secs))
            .with_stop_timeout(Duration::from_secs(self.stop_timeout_secs))
            .with_fallback_attempts(self.fallback_attempts)
    }
}

/// Overlay store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// JSON file backing the overlay store
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
}

fn default_db_file() -> PathBuf {
    PathBuf::from("overlays.json")
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();

        // Server
        if let Ok(host) = std::env::var("STREAMRELAY_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("STREAMRELAY_PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }

        // Streams
        if let Ok(dir) = std::env::var("STREAMRELAY_HLS_DIR") {
            config.streams.hls_dir = PathBuf::from(dir);
        }
        if let Ok(engine) = std::env::var("STREAMRELAY_FFMPEG") {
            config.streams.engine = engine;
        }
        if let Ok(delay) = std::env::var("STREAMRELAY_HEALTH_CHECK_DELAY_SECS") {
            if let Ok(d) = delay.parse() {
                config.streams.health_check_delay_secs = d;
            }
        }
        if let Ok(timeout) = std::env::var("STREAMRELAY_STOP_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse() {
                config.streams.stop_timeout_secs = t;
            }
        }
        if let Ok(attempts) = std::env::var("STREAMRELAY_FALLBACK_ATTEMPTS") {
            if let Ok(a) = attempts.parse() {
                config.streams.fallback_attempts = a;
            }
        }

        // Overlays
        if let Ok(file) = std::env::var("STREAMRELAY_OVERLAY_DB") {
            config.overlays.db_file = PathBuf::from(file);
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }

    /// Address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
