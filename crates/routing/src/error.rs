use std::error::Error as StdError;

/// Errors produced while handling one update.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Application logic failed.
    #[error("handler failed: {source}")]
    Handler {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The execution context was cancelled before the operation finished.
    #[error("handler cancelled")]
    Cancelled,

    /// The execution context deadline passed before the operation finished.
    #[error("handler deadline exceeded")]
    DeadlineExceeded,

    /// Session state could not be loaded, decoded, or persisted.
    #[error("session {context}: {source}")]
    Session {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// An outbound API call failed.
    #[error(transparent)]
    Client(#[from] courier_common::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn handler(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Handler {
            source: source.into(),
        }
    }

    #[must_use]
    pub fn session(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Session {
            context: context.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// True for cancellation and deadline expiry.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

impl From<anyhow::Error> for Error {
    fn from(source: anyhow::Error) -> Self {
        Self::handler(source)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
