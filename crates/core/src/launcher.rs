//! Transcoding process launcher
//!
//! Builds ffmpeg command lines for the two encoding modes and spawns them as
//! detached children in their own process group, so that stopping a session
//! takes down everything the engine forked.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DEFAULT_PLAYLIST_SIZE;
use crate::output::{PLAYLIST_FILE, SEGMENT_PATTERN};
use crate::{Error, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How the engine treats the source video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeMode {
    /// Repackage the source bitstream without decoding
    Copy,
    /// Decode and re-encode with libx264 (compatibility fallback)
    Reencode,
}

impl TranscodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeMode::Copy => "copy",
            TranscodeMode::Reencode => "reencode",
        }
    }
}

impl fmt::Display for TranscodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to build one engine command line
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    /// Source stream URL (RTSP, HTTP, file...)
    pub source_url: String,

    /// Directory receiving the playlist and segments
    pub output_dir: PathBuf,

    /// Encoding mode
    pub mode: TranscodeMode,

    /// Target segment duration in seconds
    pub segment_duration_secs: u32,

    /// Keep the audio track
    pub with_audio: bool,

    /// Playlist window in segments
    pub playlist_size: u32,
}

impl TranscodeRequest {
    /// Create a request with default segment duration, window and no audio
    pub fn new(source_url: impl Into<String>, output_dir: impl Into<PathBuf>, mode: TranscodeMode) -> Self {
        Self {
            source_url: source_url.into(),
            output_dir: output_dir.into(),
            mode,
            segment_duration_secs: crate::config::DEFAULT_SEGMENT_SECONDS,
            with_audio: false,
            playlist_size: DEFAULT_PLAYLIST_SIZE,
        }
    }

    /// Same request with a different mode
    pub fn with_mode(&self, mode: TranscodeMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    /// Engine arguments (without the program name)
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(32);

        // RTSP over TCP interleaving avoids UDP packet loss artifacts
        if is_rtsp(&self.source_url) {
            args.extend(["-rtsp_transport", "tcp"].map(String::from));
        }
        args.extend(["-i".to_string(), self.source_url.clone()]);
        args.extend(["-fflags", "nobuffer", "-flags", "low_delay"].map(String::from));

        match self.mode {
            TranscodeMode::Copy => {
                args.extend(["-c:v", "copy"].map(String::from));
            }
            TranscodeMode::Reencode => {
                args.extend(["-c:v", "libx264", "-preset", "veryfast"].map(String::from));
            }
        }

        if !self.with_audio {
            args.push("-an".to_string());
        }

        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.segment_duration_secs.to_string(),
            "-hls_list_size".to_string(),
            self.playlist_size.to_string(),
            "-hls_flags".to_string(),
            "delete_segments+append_list".to_string(),
            "-hls_segment_filename".to_string(),
            path_arg(&self.output_dir.join(SEGMENT_PATTERN)),
            path_arg(&self.output_dir.join(PLAYLIST_FILE)),
        ]);

        args
    }
}

fn is_rtsp(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Handle to one spawned engine process
///
/// Each handle carries a unique id so that deferred work (the health check)
/// can tell whether the session it was created for is still the registered
/// one.
pub struct SessionHandle {
    id: Uuid,
    stream_key: String,
    mode: TranscodeMode,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    child: Mutex<Child>,
    health_check: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    fn new(stream_key: &str, mode: TranscodeMode, child: Child) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream_key: stream_key.to_string(),
            mode,
            pid: child.id(),
            started_at: Utc::now(),
            child: Mutex::new(child),
            health_check: Mutex::new(None),
        }
    }

    /// Unique id of this process instance
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn mode(&self) -> TranscodeMode {
        self.mode
    }

    /// OS process id (also the process group id on Unix)
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Non-blocking liveness probe
    pub fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    /// Terminate the process group: SIGTERM, wait up to `grace_period`, then SIGKILL
    pub async fn terminate(&self, grace_period: Duration) {
        self.cancel_health_check();

        if !self.is_alive() {
            tracing::debug!(
                stream_key = %self.stream_key,
                pid = ?self.pid,
                "Process already exited, nothing to terminate"
            );
            return;
        }

        tracing::info!(
            stream_key = %self.stream_key,
            pid = ?self.pid,
            mode = %self.mode,
            "Terminating transcoding process"
        );

        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGTERM);

        #[cfg(not(unix))]
        {
            // No SIGTERM equivalent, the graceful phase is skipped
            let _ = self.child.lock().start_kill();
        }

        if self.wait_for_exit(grace_period).await {
            tracing::info!(stream_key = %self.stream_key, pid = ?self.pid, "Transcoding process exited");
            return;
        }

        tracing::warn!(
            stream_key = %self.stream_key,
            pid = ?self.pid,
            "Process did not terminate within {:?}, forcing kill",
            grace_period
        );

        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
        if let Err(e) = self.child.lock().start_kill() {
            tracing::debug!(stream_key = %self.stream_key, "start_kill failed: {}", e);
        }

        if !self.wait_for_exit(KILL_REAP_TIMEOUT).await {
            tracing::error!(stream_key = %self.stream_key, pid = ?self.pid, "Process survived SIGKILL");
        }
    }

    /// Poll until the process has exited or `timeout` elapses
    async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if !self.is_alive() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
                tracing::debug!(stream_key = %self.stream_key, pid, "killpg({:?}) failed: {}", signal, e);
            }
        }
    }

    pub(crate) fn set_health_check(&self, task: JoinHandle<()>) {
        if let Some(previous) = self.health_check.lock().replace(task) {
            previous.abort();
        }
    }

    /// Abort the pending health check, if any
    pub(crate) fn cancel_health_check(&self) {
        if let Some(task) = self.health_check.lock().take() {
            task.abort();
        }
    }

    /// Forget the pending health check without aborting it; used by the
    /// check itself before it tears down its own session.
    pub(crate) fn detach_health_check(&self) {
        self.health_check.lock().take();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("stream_key", &self.stream_key)
            .field("mode", &self.mode)
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Spawns engine processes
#[derive(Debug, Clone)]
pub struct Launcher {
    engine: String,
}

impl Launcher {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Resolve the engine on PATH (or check it directly if it is a path)
    pub fn resolve(&self) -> Result<PathBuf> {
        which::which(&self.engine).map_err(|_| Error::EngineNotFound {
            engine: self.engine.clone(),
        })
    }

    /// Spawn the engine for `request`
    ///
    /// The child runs in its own process group with all standard streams
    /// detached. Registration is the caller's job.
    pub fn launch(&self, request: &TranscodeRequest, stream_key: &str) -> Result<SessionHandle> {
        let program = self.resolve()?;

        let mut command = Command::new(&program);
        command
            .args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::EngineNotFound {
                engine: self.engine.clone(),
            },
            _ => Error::Spawn(e),
        })?;

        let handle = SessionHandle::new(stream_key, request.mode, child);
        tracing::info!(
            stream_key,
            pid = ?handle.pid(),
            mode = %request.mode,
            session_id = %handle.id(),
            "Transcoding process spawned"
        );
        Ok(handle)
    }
}
