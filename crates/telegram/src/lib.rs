//! Telegram Bot API transport: the HTTP client, the `UpdateSource` contract,
//! and the long-polling loop that feeds a router.

pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod poller;

pub use {
    api::{BotApi, GetUpdates, UpdateBatch, UpdateSource, WebhookRegistration},
    backoff::{Backoff, BackoffConfig},
    config::{BotConfig, DEFAULT_API_URL},
    error::{Error, Result},
    poller::{Poller, PollerConfig, PollerState},
};
