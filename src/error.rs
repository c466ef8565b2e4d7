//! Error types for keyclack
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// Top-level error type for the keyclack application
#[derive(Error, Debug)]
pub enum KeyclackError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Control protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Instance lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating a profile
///
/// A profile that fails validation is never handed to the extractor.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile '{0}' does not exist")]
    NotFound(String),

    #[error("Profile '{profile}' is corrupted. {reason}")]
    Invalid { profile: String, reason: String },

    #[error("Profile '{profile}' could not be parsed: {reason}")]
    Parse { profile: String, reason: String },

    #[error("Profile '{0}' already exists")]
    AlreadyExists(String),

    #[error("Profile archive '{path}' is unusable: {reason}")]
    Archive { path: String, reason: String },

    #[error("Profile store IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProfileError {
    pub(crate) fn invalid(profile: &str, reason: impl Into<String>) -> Self {
        ProfileError::Invalid {
            profile: profile.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors decoding or slicing a profile asset
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("ffmpeg not found in PATH. Install ffmpeg to use mp3/mp4 assets.")]
    FfmpegNotFound,

    #[error("ffmpeg failed to transcode '{path}': {reason}")]
    Transcode { path: String, reason: String },

    #[error("Failed to decode '{path}': {reason}")]
    Decode { path: String, reason: String },

    #[error("Invalid time range {start}..{end:?} for source '{id}'")]
    Range { id: String, start: f64, end: Option<f64> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to input capture
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Cannot open input device '{0}'. Is the user in the 'input' group?\n  Run: sudo usermod -aG input $USER\n  Then log out and back in.")]
    DeviceAccess(String),

    #[error("No {0} device found in /dev/input/")]
    NoDevice(String),

    #[error("Input backend '{0}' is not available on this platform")]
    Unsupported(String),

    #[error("Input capture error: {0}")]
    Capture(String),
}

/// Errors producing sound for a single playback task
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to open audio output: {0}")]
    OutputUnavailable(String),

    #[error("Failed to decode clip: {0}")]
    Decode(String),

    #[error("Audio sink error: {0}")]
    Sink(String),
}

/// Errors on the control channel
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid base64 frame: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid JSON command: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown or malformed command: {0}")]
    Command(String),

    #[error("Connection closed before a response arrived")]
    Closed,

    #[error("Control connection error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors acquiring the single-instance lock
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another keyclack daemon already holds the instance lock")]
    AlreadyHeld,

    #[error("Failed to open lock file '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("flock failed: {0}")]
    Flock(std::io::Error),
}

/// Result type alias using KeyclackError
pub type Result<T> = std::result::Result<T, KeyclackError>;

