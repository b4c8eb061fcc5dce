//! Supervisor integration tests
//!
//! These drive the real spawn/terminate paths with a shell script standing
//! in for ffmpeg. The script writes the playlist named by its last argument,
//! records its arguments in `args.txt`, and then idles. Magic words in the
//! source URL change its behaviour:
//!
//! - `fail-always`: exit immediately in every mode
//! - `fail-copy`: exit immediately in stream-copy mode only
//! - `ignore-term`: ignore SIGTERM so stop has to escalate

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use streamrelay_core::{
    Error, SessionStatus, StartOptions, Supervisor, SupervisorConfig, TranscodeMode,
};
use tempfile::TempDir;

const FAKE_ENGINE: &str = r#"#!/bin/sh
[ "$1" = "--probe" ] && exit 0
for arg in "$@"; do last="$arg"; done
dir=$(dirname "$last")
args="$*"

case "$args" in
  *fail-always*) exit 1 ;;
  *ignore-term*) trap '' TERM ;;
esac
case "$args" in
  *fail-copy*)
    case "$args" in
      *"-c:v copy"*) touch "$dir/copy_attempt"; exit 1 ;;
    esac
    ;;
esac

printf '%s\n' "$args" > "$dir/args.txt"
printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n' > "$last"

case "$args" in
  *ignore-term*) while :; do sleep 1; done ;;
esac
exec sleep 30
"#;

const HEALTH_CHECK_DELAY: Duration = Duration::from_millis(400);

struct Fixture {
    temp: TempDir,
    supervisor: Supervisor,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(|config| config)
    }

    fn with_config(customize: impl FnOnce(SupervisorConfig) -> SupervisorConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("streamrelay_core=debug")
            .with_test_writer()
            .try_init();

        let temp = TempDir::new().unwrap();
        let engine = temp.path().join("fake-ffmpeg.sh");
        std::fs::write(&engine, FAKE_ENGINE).unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        wait_until_executable(&engine);

        let config = SupervisorConfig::default()
            .with_engine(engine.to_string_lossy().into_owned())
            .with_output_dir(temp.path().join("hls"))
            .with_health_check_delay(HEALTH_CHECK_DELAY)
            .with_stop_timeout(Duration::from_secs(2));
        let supervisor = Supervisor::new(customize(config)).unwrap();

        Self { temp, supervisor }
    }

    fn base(&self) -> PathBuf {
        self.temp.path().join("hls")
    }

    fn args_of(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.base().join(key).join("args.txt")).ok()
    }
}

/// A freshly written script can briefly fail with ETXTBSY while a process
/// forked concurrently by another test still holds the write descriptor.
fn wait_until_executable(script: &Path) {
    for _ in 0..100 {
        match std::process::Command::new(script).arg("--probe").status() {
            Ok(_) => return,
            Err(e) if e.raw_os_error() == Some(nix::libc::ETXTBSY) => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("cannot run fake engine: {}", e),
        }
    }
    panic!("fake engine stayed busy");
}

/// Poll `condition` every 50ms until it holds or `timeout` elapses
async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn file_appears(path: &Path) -> bool {
    path.is_file()
}

#[tokio::test]
async fn test_start_returns_playlist_path_and_runs() {
    let fx = Fixture::new();

    let playlist = fx
        .supervisor
        .start("cam1", "rtsp://camera/live", StartOptions::default())
        .await
        .unwrap();

    assert_eq!(playlist, "cam1/index.m3u8");
    assert_eq!(fx.supervisor.status("cam1").await, SessionStatus::Running);

    let playlist_file = fx.base().join(&playlist);
    assert!(eventually(Duration::from_secs(3), || async { file_appears(&playlist_file) }).await);

    let args = fx.args_of("cam1").unwrap();
    assert!(args.contains("-rtsp_transport tcp"));
    assert!(args.contains("-c:v copy"));
    assert!(args.contains("-an"));
    assert!(args.contains("-hls_list_size 6"));

    fx.supervisor.stop("cam1").await;
}

#[tokio::test]
async fn test_options_reach_the_command_line() {
    let fx = Fixture::new();
    let options = StartOptions {
        segment_duration_secs: 4,
        with_audio: true,
    };

    fx.supervisor.start("cam1", "rtsp://camera/live", options).await.unwrap();
    assert!(eventually(Duration::from_secs(3), || async { fx.args_of("cam1").is_some() }).await);

    let args = fx.args_of("cam1").unwrap();
    assert!(args.contains("-hls_time 4"));
    assert!(!args.contains("-an"));

    fx.supervisor.stop("cam1").await;
}

#[tokio::test]
async fn test_stop_terminates_and_keeps_artifacts() {
    let fx = Fixture::new();

    fx.supervisor
        .start("cam1", "rtsp://camera/live", StartOptions::default())
        .await
        .unwrap();
    let playlist = fx.base().join("cam1/index.m3u8");
    assert!(eventually(Duration::from_secs(3), || async { file_appears(&playlist) }).await);

    fx.supervisor.stop("cam1").await;

    assert_eq!(fx.supervisor.status("cam1").await, SessionStatus::Stopped);
    assert!(fx.supervisor.sessions().await.is_empty());
    // Last output stays around for the file server
    assert!(playlist.is_file());

    // Idempotent
    fx.supervisor.stop("cam1").await;
    assert_eq!(fx.supervisor.status("cam1").await, SessionStatus::Stopped);
}

#[tokio::test]
async fn test_restart_replaces_previous_session() {
    let fx = Fixture::new();

    fx.supervisor
        .start("cam1", "rtsp://first/live", StartOptions::default())
        .await
        .unwrap();
    let first = fx.supervisor.sessions().await.remove(0);

    fx.supervisor
        .start("cam1", "rtsp://second/live", StartOptions::default())
        .await
        .unwrap();

    let sessions = fx.supervisor.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_ne!(sessions[0].session_id, first.session_id);
    assert_eq!(sessions[0].status, SessionStatus::Running);

    // The first process group is gone
    let first_pid = first.pid.unwrap() as i32;
    assert!(
        eventually(Duration::from_secs(3), || async move {
            nix::sys::signal::kill(nix::unistd::Pid::from_raw(first_pid), None).is_err()
        })
        .await
    );

    assert!(eventually(Duration::from_secs(3), || async { fx.args_of("cam1").is_some() }).await);
    let args = fx.args_of("cam1").unwrap();
    assert!(args.contains("rtsp://second/live"));
    assert!(!args.contains("rtsp://first/live"));

    fx.supervisor.stop("cam1").await;
}

#[tokio::test]
async fn test_early_exit_falls_back_to_reencode() {
    let fx = Fixture::new();

    fx.supervisor
        .start("cam1", "rtsp://fail-copy/live", StartOptions::default())
        .await
        .unwrap();

    // The copy job is still alive right after start; wait for the
    // re-encode replacement rather than for any running session
    assert!(
        eventually(Duration::from_secs(5), || async {
            let sessions = fx.supervisor.sessions().await;
            sessions.len() == 1
                && sessions[0].mode == TranscodeMode::Reencode
                && sessions[0].status == SessionStatus::Running
        })
        .await
    );
    assert_eq!(fx.supervisor.status("cam1").await, SessionStatus::Running);

    assert!(eventually(Duration::from_secs(3), || async { fx.args_of("cam1").is_some() }).await);
    let args = fx.args_of("cam1").unwrap();
    assert!(args.contains("-c:v libx264"));
    assert!(args.contains("-preset veryfast"));

    // Directory was wiped between the two attempts
    assert!(!fx.base().join("cam1/copy_attempt").exists());

    fx.supervisor.stop("cam1").await;
}

#[tokio::test]
async fn test_fallback_is_one_shot() {
    let fx = Fixture::new();

    fx.supervisor
        .start("cam1", "rtsp://fail-always/live", StartOptions::default())
        .await
        .unwrap();

    // Wait past the copy check and well past where a second check would land
    tokio::time::sleep(HEALTH_CHECK_DELAY * 4).await;

    assert_eq!(fx.supervisor.status("cam1").await, SessionStatus::Stopped);
    let sessions = fx.supervisor.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].mode, TranscodeMode::Reencode);
}

#[tokio::test]
async fn test_fallback_disabled() {
    let fx = Fixture::with_config(|config| config.with_fallback_attempts(0));

    fx.supervisor
        .start("cam1", "rtsp://fail-copy/live", StartOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(HEALTH_CHECK_DELAY * 3).await;

    assert_eq!(fx.supervisor.status("cam1").await, SessionStatus::Stopped);
    let sessions = fx.supervisor.sessions().await;
    assert_eq!(sessions[0].mode, TranscodeMode::Copy);
}

#[tokio::test]
async fn test_stop_before_health_check_suppresses_fallback() {
    let fx = Fixture::new();

    fx.supervisor
        .start("cam1", "rtsp://fail-copy/live", StartOptions::default())
        .await
        .unwrap();
    fx.supervisor.stop("cam1").await;

    tokio::time::sleep(HEALTH_CHECK_DELAY * 3).await;

    assert_eq!(fx.supervisor.status("cam1").await, SessionStatus::Stopped);
    assert!(fx.supervisor.sessions().await.is_empty());
    assert!(fx.args_of("cam1").is_none());
}

#[tokio::test]
async fn test_restart_before_health_check_is_not_disturbed() {
    let fx = Fixture::new();

    fx.supervisor
        .start("cam1", "rtsp://fail-copy/live", StartOptions::default())
        .await
        .unwrap();
    fx.supervisor
        .start("cam1", "rtsp://healthy/live", StartOptions::default())
        .await
        .unwrap();
    let current = fx.supervisor.sessions().await.remove(0);

    tokio::time::sleep(HEALTH_CHECK_DELAY * 3).await;

    let sessions = fx.supervisor.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, current.session_id);
    assert_eq!(sessions[0].mode, TranscodeMode::Copy);
    assert_eq!(sessions[0].status, SessionStatus::Running);

    fx.supervisor.stop("cam1").await;
}

#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let fx = Fixture::with_config(|config| config.with_stop_timeout(Duration::from_millis(300)));

    fx.supervisor
        .start("cam1", "rtsp://ignore-term/live", StartOptions::default())
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(3), || async { fx.args_of("cam1").is_some() }).await);

    let started = Instant::now();
    fx.supervisor.stop("cam1").await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(fx.supervisor.status("cam1").await, SessionStatus::Stopped);
}

#[tokio::test]
async fn test_distinct_keys_do_not_block_each_other() {
    let fx = Fixture::with_config(|config| config.with_stop_timeout(Duration::from_secs(2)));

    fx.supervisor
        .start("slow", "rtsp://ignore-term/live", StartOptions::default())
        .await
        .unwrap();
    fx.supervisor
        .start("fast", "rtsp://camera/live", StartOptions::default())
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(3), || async { fx.args_of("slow").is_some() }).await);

    // Stopping "slow" sits in its grace period for ~2s
    let supervisor = fx.supervisor.clone();
    let slow_stop = tokio::spawn(async move { supervisor.stop("slow").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    assert_eq!(fx.supervisor.status("fast").await, SessionStatus::Running);
    fx.supervisor.stop("fast").await;
    fx.supervisor
        .start("other", "rtsp://camera/live", StartOptions::default())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    slow_stop.await.unwrap();
    fx.supervisor.shutdown().await;
    assert!(fx.supervisor.sessions().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let fx = Fixture::new();

    for key in ["a", "b", "c"] {
        fx.supervisor
            .start(key, "rtsp://camera/live", StartOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(fx.supervisor.sessions().await.len(), 3);

    fx.supervisor.shutdown().await;

    assert!(fx.supervisor.sessions().await.is_empty());
    for key in ["a", "b", "c"] {
        assert_eq!(fx.supervisor.status(key).await, SessionStatus::Stopped);
    }
}

#[tokio::test]
async fn test_engine_not_found() {
    let temp = TempDir::new().unwrap();
    let config = SupervisorConfig::default()
        .with_engine(temp.path().join("no-such-ffmpeg").to_string_lossy().into_owned())
        .with_output_dir(temp.path().join("hls"));
    let supervisor = Supervisor::new(config).unwrap();

    let err = supervisor
        .start("cam1", "rtsp://camera/live", StartOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EngineNotFound { .. }));
    assert!(supervisor.sessions().await.is_empty());
}
