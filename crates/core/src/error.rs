//! Error types for the StreamRelay core

use thiserror::Error;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that prevent a transcoding session from starting.
///
/// Everything that goes wrong after a session has started (early exit,
/// failed fallback, slow shutdown) is handled internally and only shows up
/// through [`crate::Supervisor::status`].
#[derive(Debug, Error)]
pub enum Error {
    /// The transcoding engine could not be resolved on the search path
    #[error("Transcoding engine '{engine}' not available: install it or fix PATH")]
    EngineNotFound {
        /// Engine program name as configured
        engine: String,
    },

    /// Start was requested without a source URL
    #[error("Source URL must not be empty")]
    EmptySourceUrl,

    /// The engine was found but the process could not be spawned
    #[error("Failed to spawn transcoding engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is caused by bad caller input rather than the host
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::EmptySourceUrl)
    }
}
