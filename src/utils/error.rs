//! Error types for ccsync
//!
//! Only two failures ever reach the user as errors: opening media and
//! seeking. Everything else on the playback path degrades locally (a failed
//! decode ends its stream, a full queue blocks its producer, an empty ring
//! plays silence), so most variants here are produced during initialisation.

use crate::player::PlayerState;
use thiserror::Error;

/// Main error type for ccsync
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// Container or codec could not be opened
    #[error("Open failed: {0}")]
    Open(String),

    /// Unrecoverable codec error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Container repositioning failed
    #[error("Seek failed: {0}")]
    Seek(String),

    /// Buffer or context allocation failed during init
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// Audio device errors
    #[error("Audio error: {0}")]
    Audio(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transition rejected by the player state machine
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: PlayerState,
        to: PlayerState,
    },

    /// Operation requires loaded media
    #[error("No media loaded")]
    NoMedia,

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ffmpeg_next::Error> for PlaybackError {
    fn from(err: ffmpeg_next::Error) -> Self {
        PlaybackError::Decode(format!("FFmpeg error: {}", err))
    }
}

impl PlaybackError {
    /// Create an open error from string
    pub fn open_error<S: Into<String>>(msg: S) -> Self {
        PlaybackError::Open(msg.into())
    }

    /// Whether the error is one the caller is expected to surface to the user
    pub fn is_user_visible(&self) -> bool {
        matches!(self, PlaybackError::Open(_) | PlaybackError::Seek(_) | PlaybackError::NotFound(_))
    }
}

/// Convenience type alias for Results in ccsync
pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Extension trait for converting other errors to PlaybackError
pub trait IntoPlaybackError<T> {
    /// Convert this error into a PlaybackError with the given context
    fn open_err(self, context: &str) -> Result<T>;
    fn decode_err(self, context: &str) -> Result<T>;
    fn seek_err(self, context: &str) -> Result<T>;
    fn audio_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPlaybackError<T> for std::result::Result<T, E> {
    fn open_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PlaybackError::Open(format!("{}: {}", context, e)))
    }

    fn decode_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PlaybackError::Decode(format!("{}: {}", context, e)))
    }

    fn seek_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PlaybackError::Seek(format!("{}: {}", context, e)))
    }

    fn audio_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PlaybackError::Audio(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PlaybackError::Config(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::PlaybackError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::PlaybackError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}
