// ================================================================
// File: soundbot-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The member asking for a session is not connected to any voice channel.
    #[error("You need to be in a voice channel first")]
    NotInVoiceChannel,

    /// The voice connection could not be established in time. The registry
    /// has already cleaned up, so the caller may simply retry.
    #[error("Could not connect to the voice channel, please try again")]
    TryAgain,

    #[error("Voice session is closed")]
    SessionClosed,

    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Voice transport error: {0}")]
    Transport(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Event bus error: {0}")]
    EventBus(String),
}

impl Error {
    /// Errors the end user can act on (or retry) rather than internal failures.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Error::NotInVoiceChannel | Error::TryAgain | Error::NotFound(_))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}
