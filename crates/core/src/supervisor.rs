//! Session supervisor
//!
//! Orchestrates start/stop/status per stream key. A start stops whatever is
//! running for the key, wipes the key's output directory, launches a
//! stream-copy job and schedules a health check. If the copy job has already
//! died when the check fires, the directory is wiped again and a re-encode
//! job takes its place.
//!
//! All mutations for one key are serialized through a per-key async mutex;
//! different keys never wait on each other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::{StartOptions, SupervisorConfig};
use crate::launcher::{Launcher, SessionHandle, TranscodeMode, TranscodeRequest};
use crate::output::OutputDirs;
use crate::registry::SessionRegistry;
use crate::{Error, Result};

/// Externally visible session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic snapshot of a registered session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub stream_key: String,
    pub session_id: Uuid,
    pub mode: TranscodeMode,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
}

struct Inner {
    config: SupervisorConfig,
    launcher: Launcher,
    registry: SessionRegistry,
    outputs: OutputDirs,
    key_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Supervises one transcoding process per stream key
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor with its own empty registry
    ///
    /// Fails only if the base output directory cannot be created.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        Self::with_registry(config, SessionRegistry::new())
    }

    /// Create a supervisor around an existing registry
    pub fn with_registry(config: SupervisorConfig, registry: SessionRegistry) -> Result<Self> {
        let outputs = OutputDirs::new(&config.output_dir)?;
        let launcher = Launcher::new(config.engine.clone());

        tracing::info!(
            engine = %config.engine,
            output_dir = %config.output_dir.display(),
            health_check_delay = ?config.health_check_delay,
            fallback_attempts = config.fallback_attempts,
            "Session supervisor created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                launcher,
                registry,
                outputs,
                key_locks: parking_lot::Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Output directory for a stream key
    pub fn output_dir(&self, stream_key: &str) -> PathBuf {
        self.inner.outputs.path(stream_key)
    }

    /// Start (or restart) the session for `stream_key`
    ///
    /// Returns the playlist path relative to the output base directory,
    /// always `{stream_key}/index.m3u8`.
    pub async fn start(&self, stream_key: &str, source_url: &str, options: StartOptions) -> Result<String> {
        if source_url.trim().is_empty() {
            return Err(Error::EmptySourceUrl);
        }

        let _guard = self.inner.lock_key(stream_key).await;

        self.inner.stop_locked(stream_key).await;

        let dir = self.inner.reset_dir(stream_key).await;
        let request = TranscodeRequest {
            source_url: source_url.to_string(),
            output_dir: dir,
            mode: TranscodeMode::Copy,
            segment_duration_secs: options.segment_duration_secs,
            with_audio: options.with_audio,
            playlist_size: self.inner.config.playlist_size,
        };

        let handle = Arc::new(self.inner.launcher.launch(&request, stream_key)?);
        self.inner.registry.set(stream_key, handle.clone()).await;
        Inner::schedule_health_check(&self.inner, &handle, request, self.inner.config.fallback_attempts);

        tracing::info!(
            stream_key,
            session_id = %handle.id(),
            "Stream started"
        );

        Ok(OutputDirs::playlist_relative(stream_key))
    }

    /// Stop the session for `stream_key`; a no-op if nothing is registered
    pub async fn stop(&self, stream_key: &str) {
        let _guard = self.inner.lock_key(stream_key).await;
        self.inner.stop_locked(stream_key).await;
    }

    /// Liveness of the registered process, without waiting on it
    pub async fn status(&self, stream_key: &str) -> SessionStatus {
        match self.inner.registry.get(stream_key).await {
            Some(handle) if handle.is_alive() => SessionStatus::Running,
            _ => SessionStatus::Stopped,
        }
    }

    /// Snapshot of every registered session
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::new();
        for handle in self.inner.registry.handles().await {
            let status = if handle.is_alive() {
                SessionStatus::Running
            } else {
                SessionStatus::Stopped
            };
            infos.push(SessionInfo {
                stream_key: handle.stream_key().to_string(),
                session_id: handle.id(),
                mode: handle.mode(),
                pid: handle.pid(),
                started_at: handle.started_at(),
                status,
            });
        }
        infos.sort_by(|a, b| a.stream_key.cmp(&b.stream_key));
        infos
    }

    /// Stop every registered session
    pub async fn shutdown(&self) {
        let keys = self.inner.registry.keys().await;
        tracing::info!("Stopping {} stream session(s)", keys.len());

        futures::future::join_all(keys.iter().map(|key| self.stop(key))).await;
    }
}

/// Exclusive hold on one stream key
///
/// Dropping the guard releases the key and evicts its lock entry once no
/// other caller holds or waits on it.
struct KeyGuard<'a> {
    locks: &'a parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    key: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.locks.lock();
        // Remaining references: the map entry and `self.lock`
        if Arc::strong_count(&self.lock) == 2
            && locks
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.lock))
        {
            locks.remove(&self.key);
        }
    }
}

impl Inner {
    async fn lock_key(&self, stream_key: &str) -> KeyGuard<'_> {
        let lock = self
            .key_locks
            .lock()
            .entry(stream_key.to_string())
            .or_default()
            .clone();
        let guard = lock.clone().lock_owned().await;

        KeyGuard {
            locks: &self.key_locks,
            key: stream_key.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    /// Remove and terminate the registered handle. Caller holds the key lock.
    async fn stop_locked(&self, stream_key: &str) {
        if let Some(handle) = self.registry.remove(stream_key).await {
            handle.terminate(self.config.stop_timeout).await;
            tracing::info!(stream_key, session_id = %handle.id(), "Stream stopped");
        }
    }

    async fn reset_dir(&self, stream_key: &str) -> PathBuf {
        match self.outputs.reset(stream_key).await {
            Ok(dir) => dir,
            Err(e) => {
                // The engine reports its own error if it cannot write here
                tracing::warn!(stream_key, "Could not recreate output directory: {}", e);
                self.outputs.path(stream_key)
            }
        }
    }

    /// Spawn the deferred early-exit check for `handle`
    fn schedule_health_check(
        this: &Arc<Self>,
        handle: &Arc<SessionHandle>,
        request: TranscodeRequest,
        attempts_left: u32,
    ) {
        let inner = this.clone();
        let stream_key = handle.stream_key().to_string();
        let session_id = handle.id();

        let task = tokio::spawn(async move {
            tokio::time::sleep(inner.config.health_check_delay).await;
            inner
                .run_health_check(&stream_key, session_id, request, attempts_left)
                .await;
        });
        handle.set_health_check(task);
    }

    async fn run_health_check(
        self: &Arc<Self>,
        stream_key: &str,
        session_id: Uuid,
        request: TranscodeRequest,
        attempts_left: u32,
    ) {
        let _guard = self.lock_key(stream_key).await;

        let current = match self.registry.get(stream_key).await {
            Some(handle) if handle.id() == session_id => handle,
            _ => {
                tracing::debug!(stream_key, %session_id, "Health check for superseded session, skipping");
                return;
            }
        };

        if current.is_alive() {
            tracing::debug!(stream_key, %session_id, mode = %current.mode(), "Health check passed");
            return;
        }

        if attempts_left == 0 {
            tracing::warn!(
                stream_key,
                %session_id,
                mode = %current.mode(),
                "Transcoding process exited early, no fallback attempts left"
            );
            return;
        }

        tracing::warn!(
            stream_key,
            %session_id,
            mode = %current.mode(),
            "Transcoding process exited early, retrying with re-encoding"
        );

        // This task is the pending check of `current`; keep stop from aborting it
        current.detach_health_check();
        self.stop_locked(stream_key).await;
        self.reset_dir(stream_key).await;

        let fallback = request.with_mode(TranscodeMode::Reencode);
        match self.launcher.launch(&fallback, stream_key) {
            Ok(handle) => {
                let handle = Arc::new(handle);
                self.registry.set(stream_key, handle.clone()).await;
                let remaining = attempts_left - 1;
                if remaining > 0 {
                    Inner::schedule_health_check(self, &handle, fallback, remaining);
                }
                tracing::info!(stream_key, session_id = %handle.id(), "Re-encode fallback started");
            }
            Err(e) => {
                tracing::error!(stream_key, "Re-encode fallback failed to launch: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn supervisor(temp: &TempDir, engine: &str) -> Supervisor {
        let config = SupervisorConfig::default()
            .with_engine(engine)
            .with_output_dir(temp.path().join("hls"));
        Supervisor::new(config).unwrap()
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&SessionStatus::Running).unwrap(), "\"running\"");
        assert_eq!(SessionStatus::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn test_status_of_unknown_key() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, "ffmpeg");

        assert_eq!(supervisor.status("nothing").await, SessionStatus::Stopped);
        assert!(supervisor.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, "ffmpeg");

        supervisor.stop("cam1").await;
        supervisor.stop("cam1").await;
        assert_eq!(supervisor.status("cam1").await, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_key_locks_released_after_use() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, "streamrelay-missing-engine");

        for i in 0..1000 {
            supervisor.stop(&format!("unknown-{}", i)).await;
        }
        let _ = supervisor
            .start("cam1", "rtsp://cam.local/live", StartOptions::default())
            .await;

        assert_eq!(supervisor.inner.key_locks.lock().len(), 0);
    }

    #[tokio::test]
    async fn test_key_lock_kept_while_contended() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, "ffmpeg");

        let held = supervisor.inner.lock_key("cam1").await;
        let waiter = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.stop("cam1").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // Releasing with a waiter queued keeps the shared entry
        drop(held);
        assert_eq!(supervisor.inner.key_locks.lock().len(), 1);

        waiter.await.unwrap();
        assert_eq!(supervisor.inner.key_locks.lock().len(), 0);
    }

    #[tokio::test]
    async fn test_empty_source_url_fails_fast() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, "ffmpeg");

        let result = supervisor.start("cam1", "  ", StartOptions::default()).await;
        assert!(matches!(result, Err(Error::EmptySourceUrl)));
        // No directory work happens before validation
        assert!(!supervisor.output_dir("cam1").exists());
    }

    #[tokio::test]
    async fn test_engine_not_found_registers_nothing() {
        let temp = TempDir::new().unwrap();
        let supervisor = supervisor(&temp, "streamrelay-missing-engine");

        let result = supervisor
            .start("cam1", "rtsp://cam.local/live", StartOptions::default())
            .await;

        match result {
            Err(Error::EngineNotFound { engine }) => assert_eq!(engine, "streamrelay-missing-engine"),
            other => panic!("Expected EngineNotFound, got {:?}", other),
        }
        assert_eq!(supervisor.status("cam1").await, SessionStatus::Stopped);
        assert!(supervisor.sessions().await.is_empty());
    }
}
