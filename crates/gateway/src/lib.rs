//! Webhook acquisition path.
//!
//! An axum app that receives pushed updates, checks the shared secret,
//! decodes the body, and dispatches through a [`courier_routing::Router`],
//! plus the startup registration and graceful-shutdown plumbing around it.

pub mod error;
pub mod server;
pub mod webhook;

pub use {
    error::{Error, Result},
    server::{Registration, WebhookConfig, WebhookServer, register_webhook, serve},
    webhook::{DispatchMode, HandlerErrorPolicy, SECRET_HEADER, WebhookState, build_webhook_app},
};
