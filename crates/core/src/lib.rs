//! StreamRelay core
//!
//! Supervises per-key live transcoding sessions. For every stream key the
//! supervisor runs at most one external transcoding engine (ffmpeg) process
//! that pulls a source URL and writes a rolling HLS playlist into
//! `{output_dir}/{stream_key}/`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Supervisor                               │
//! │   start(key, url) / stop(key) / status(key)                      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐   │
//! │  │  OutputDirs  │  │   Launcher   │  │   SessionRegistry     │   │
//! │  │  (reset dir) │  │ (ffmpeg argv)│  │ (key → SessionHandle) │   │
//! │  └──────────────┘  └──────┬───────┘  └───────────────────────┘   │
//! │                           │ spawns                               │
//! │                           ▼                                      │
//! │              ffmpeg (own process group)                          │
//! │                                                                  │
//! │  health check: after 5s, if the copy job already died,           │
//! │  clear the directory and relaunch with re-encoding               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use streamrelay_core::{StartOptions, Supervisor, SupervisorConfig};
//!
//! # tokio_test::block_on(async {
//! let supervisor = Supervisor::new(SupervisorConfig::default().with_output_dir("hls"))?;
//! let playlist = supervisor
//!     .start("cam1", "rtsp://10.0.0.5/stream", StartOptions::default())
//!     .await?;
//! assert_eq!(playlist, "cam1/index.m3u8");
//! # Ok::<(), streamrelay_core::Error>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod launcher;
pub mod output;
pub mod registry;
pub mod supervisor;

pub use config::{StartOptions, SupervisorConfig};
pub use error::{Error, Result};
pub use launcher::{Launcher, SessionHandle, TranscodeMode, TranscodeRequest};
pub use output::OutputDirs;
pub use registry::SessionRegistry;
pub use supervisor::{SessionInfo, SessionStatus, Supervisor};
