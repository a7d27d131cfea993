use std::time::Duration;

use thiserror::Error;

/// Failures talking to the Bot API, classified by how a caller should react.
#[derive(Debug, Error)]
pub enum Error {
    /// Network failure or timeout before a response arrived.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The bot token was rejected.
    #[error("unauthorized: {description}")]
    Unauthorized { description: String },

    /// Another consumer holds the update stream (a second poller, or a
    /// webhook that is still registered).
    #[error("conflict: {description}")]
    Conflict { description: String },

    /// Flood control; retry after the server-provided delay.
    #[error("rate limited, retry after {}s", .after.as_secs())]
    RetryAfter { after: Duration },

    /// Any other `ok: false` response.
    #[error("bot api error {code}: {description}")]
    Api { code: i64, description: String },

    /// The response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Errors no amount of retrying fixes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
