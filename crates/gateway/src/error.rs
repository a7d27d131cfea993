use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The Bot API rejected a startup call.
    #[error("bot api: {0}")]
    Telegram(#[from] courier_telegram::Error),

    #[error("invalid webhook configuration: {message}")]
    Config { message: String },
}

impl Error {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The credential was rejected or the update stream is owned elsewhere.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Telegram(e) if e.is_terminal())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
