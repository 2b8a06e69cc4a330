//! Error taxonomy shared by the synthesis client, cache, and sequencer.
//!
//! `TtsError` is `Clone` so one generation outcome can be handed to every
//! waiter attached to the same in-flight request.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TtsError {
    /// Missing speaker or clone prompt, or nothing to speak. User-correctable.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend answered with a non-success status.
    #[error("TTS backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    /// The audio output could not decode or play a clip.
    #[error("audio playback failed: {0}")]
    Playback(String),

    /// Transport-level failure talking to the backend.
    #[error("network error: {0}")]
    Network(String),

    /// The generation task ended without delivering a result.
    #[error("audio generation was abandoned")]
    Abandoned,
}

impl From<reqwest::Error> for TtsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Network(format!("cannot connect to TTS backend: {e}"))
        } else if e.is_timeout() {
            Self::Network(format!("TTS backend request timed out: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl TtsError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
