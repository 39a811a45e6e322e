//! Error types for Deluge.

use thiserror::Error;

/// Top-level error type for Deluge operations.
#[derive(Debug, Error)]
pub enum DelugeError {
    /// GPU-related errors
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// Frame playback errors
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// Terrain loading errors
    #[error("Terrain error: {0}")]
    Terrain(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// GPU-specific errors.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No adapter matched the request
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// Failed to create the logical device
    #[error("GPU device request failed: {0}")]
    DeviceRequest(String),

    /// Buffer mapping for readback failed
    #[error("buffer mapping failed: {0}")]
    MapFailed(String),

    /// A pass target failed its completeness check
    #[error("incomplete pass target `{target}`: {reason}")]
    IncompleteTarget {
        /// Label of the offending target
        target: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Errors raised while reading or writing playback frames.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// A frame's byte length does not match `grid_size² · 4`
    #[error("frame {frame} has {actual} bytes, expected {expected}")]
    FrameLength {
        /// Frame number
        frame: usize,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// The frame source contained no frames
    #[error("no frames found in {0}")]
    Empty(String),
}

/// Result type alias for Deluge operations.
pub type DelugeResult<T> = Result<T, DelugeError>;
