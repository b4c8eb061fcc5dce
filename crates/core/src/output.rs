//! Per-key output directories
//!
//! Layout: `{base}/{stream_key}/index.m3u8` plus `{base}/{stream_key}/seg_NNN.ts`.

use std::path::{Path, PathBuf};

/// Playlist file name inside a key directory
pub const PLAYLIST_FILE: &str = "index.m3u8";

/// ffmpeg segment file pattern inside a key directory
pub const SEGMENT_PATTERN: &str = "seg_%03d.ts";

/// Owns the base directory that holds one subdirectory per stream key
#[derive(Debug, Clone)]
pub struct OutputDirs {
    base: PathBuf,
}

impl OutputDirs {
    /// Create the manager, making sure the base directory exists
    pub fn new(base: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory for a stream key
    pub fn path(&self, stream_key: &str) -> PathBuf {
        self.base.join(stream_key)
    }

    /// Playlist path relative to the base directory
    pub fn playlist_relative(stream_key: &str) -> String {
        format!("{}/{}", stream_key, PLAYLIST_FILE)
    }

    /// Wipe and recreate the directory for `stream_key`
    ///
    /// Removal failures are logged and ignored; stale segments get pruned by
    /// the playlist's delete policy or overwritten by same-named segments.
    pub async fn reset(&self, stream_key: &str) -> std::io::Result<PathBuf> {
        let dir = self.path(stream_key);

        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(
                    stream_key,
                    dir = %dir.display(),
                    "Could not remove output directory: {}",
                    e
                );
            }
        }

        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}
