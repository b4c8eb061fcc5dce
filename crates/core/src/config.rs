//! Supervisor configuration and per-start options

use std::path::PathBuf;
use std::time::Duration;

/// Default segment length in seconds
pub const DEFAULT_SEGMENT_SECONDS: u32 = 2;

/// Number of segments kept in the live playlist window
pub const DEFAULT_PLAYLIST_SIZE: u32 = 6;

/// Configuration for a [`crate::Supervisor`]
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Transcoding engine program, resolved on PATH unless it is a path
    pub engine: String,

    /// Base directory holding one subdirectory per stream key
    pub output_dir: PathBuf,

    /// Delay between a start and its early-exit health check
    pub health_check_delay: Duration,

    /// How long a stopped process gets to exit after SIGTERM
    pub stop_timeout: Duration,

    /// Re-encode relaunches allowed after early exits (0 disables fallback)
    pub fallback_attempts: u32,

    /// Playlist window in segments
    pub playlist_size: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            engine: "ffmpeg".to_string(),
            output_dir: PathBuf::from("hls"),
            health_check_delay: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            fallback_attempts: 1,
            playlist_size: DEFAULT_PLAYLIST_SIZE,
        }
    }
}

impl SupervisorConfig {
    /// Set the engine program
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    /// Set the base output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the health check delay
    pub fn with_health_check_delay(mut self, delay: Duration) -> Self {
        self.health_check_delay = delay;
        self
    }

    /// Set the graceful stop timeout
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set how many re-encode fallbacks a session may use
    pub fn with_fallback_attempts(mut self, attempts: u32) -> Self {
        self.fallback_attempts = attempts;
        self
    }
}

/// Options for a single start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Target segment duration in seconds
    pub segment_duration_secs: u32,

    /// Keep the audio track (dropped by default)
    pub with_audio: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            segment_duration_secs: DEFAULT_SEGMENT_SECONDS,
            with_audio: false,
        }
    }
}
