//! Error types for Soundgraph

use thiserror::Error;

/// Error kinds surfaced by fallible engine operations.
///
/// Control-side code returns these as ordinary `Result` values; the audio
/// thread never constructs them (RT failures are counted, not reported).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("unspecified engine error")]
    Other,

    #[error("invalid processor")]
    InvalidProcessor,

    #[error("invalid plugin name")]
    InvalidPluginName,

    #[error("invalid plugin uid")]
    InvalidPluginUid,

    #[error("invalid plugin path")]
    InvalidPluginPath,

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("invalid channel")]
    InvalidChannel,

    #[error("invalid bus")]
    InvalidBus,

    #[error("invalid track name")]
    InvalidTrackName,

    #[error("event queue full")]
    QueueFull,

    #[error("timed out waiting for response")]
    Timeout,
}

/// Result type alias used across the workspace
pub type EngineResult<T> = Result<T, EngineError>;
