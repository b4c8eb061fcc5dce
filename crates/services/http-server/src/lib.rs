//! StreamRelay HTTP server
//!
//! Thin HTTP surface around [`streamrelay_core::Supervisor`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    streamrelay-http-server                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  POST /api/streams/start   ─┐                                    │
//! │  POST /api/streams/stop     ├──▶ Supervisor (streamrelay-core)   │
//! │  GET  /api/streams/status  ─┘         │ spawns ffmpeg            │
//! │                                       ▼                          │
//! │  GET  /hls/:key/*file  ◀──────  {hls_dir}/{key}/index.m3u8       │
//! │                                                                  │
//! │  /api/overlays[/:id]   ──▶ OverlayStore (JSON file)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod overlays;
