use thiserror::Error;

/// Errors produced by the deckhand session/recording layer.
#[derive(Debug, Error)]
pub enum DeckError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {0} is already recording")]
    AlreadyRecording(String),

    #[error("session {0} is not recording")]
    NotRecording(String),

    #[error("recording not found: {0}")]
    RecordingNotFound(String),

    #[error("session {0} is not persistent")]
    NotPersistent(String),

    #[error("process host error: {0}")]
    Host(String),

    #[error("recording store error: {0}")]
    Store(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("replay error: {0}")]
    Replay(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for DeckError {
    fn from(e: serde_json::Error) -> Self {
        DeckError::Codec(e.to_string())
    }
}

pub type DeckResult<T> = Result<T, DeckError>;
