//! Mapping from the file-level config to the option types of each crate.

use std::{path::Path, sync::Arc};

use {
    anyhow::{Context as _, bail},
    courier_config::{
        CourierConfig, DispatchSetting, HandlerErrorSetting, KeyScopeSetting, SessionBackend,
    },
    courier_gateway::{DispatchMode, HandlerErrorPolicy, WebhookConfig},
    courier_sessions::{KeyScope, MemoryStore, SessionStore, SqliteStore},
    courier_telegram::{BackoffConfig, BotConfig, PollerConfig},
    secrecy::ExposeSecret,
    tracing::{debug, info},
};

/// Load the config named on the command line, or discover one, then apply
/// environment overrides. An explicit path that fails to load is an error;
/// discovery falls back to defaults.
pub fn load(path: Option<&Path>) -> anyhow::Result<CourierConfig> {
    let mut config = match path {
        Some(path) => courier_config::load_config(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => courier_config::discover_and_load(),
    };
    courier_config::apply_env_overrides(&mut config);
    Ok(config)
}

pub fn bot_config(config: &CourierConfig) -> anyhow::Result<BotConfig> {
    let Some(token) = config
        .telegram
        .token
        .as_ref()
        .map(|t| t.expose_secret().trim().to_string())
        .filter(|t| !t.is_empty())
    else {
        bail!("no bot token configured (set telegram.token or COURIER_BOT_TOKEN)");
    };
    Ok(BotConfig::new(token).with_api_url(config.telegram.api_url.clone()))
}

pub fn poller_config(config: &CourierConfig) -> PollerConfig {
    let polling = &config.polling;
    PollerConfig {
        limit: polling.limit,
        timeout_secs: polling.timeout_secs,
        allowed_updates: polling.allowed_updates.clone(),
        drop_pending_updates: polling.drop_pending_updates,
        backoff: BackoffConfig {
            initial_ms: polling.backoff.initial_ms,
            max_ms: polling.backoff.max_ms,
            jitter: polling.backoff.jitter,
        },
        handler_timeout_secs: config.handler_timeout_secs,
    }
}

pub fn webhook_config(config: &CourierConfig) -> WebhookConfig {
    let webhook = &config.webhook;
    WebhookConfig {
        bind: webhook.bind.clone(),
        port: webhook.port,
        path: webhook.path.clone(),
        secret: webhook.secret.clone(),
        public_url: webhook.public_url.clone(),
        drop_pending_updates: webhook.drop_pending_updates,
        allowed_updates: webhook.allowed_updates.clone(),
        on_handler_error: match webhook.on_handler_error {
            HandlerErrorSetting::Acknowledge => HandlerErrorPolicy::Acknowledge,
            HandlerErrorSetting::RequestRedelivery => HandlerErrorPolicy::RequestRedelivery,
        },
        dispatch: match webhook.dispatch {
            DispatchSetting::Inline => DispatchMode::Inline,
            DispatchSetting::Background => DispatchMode::Background,
        },
        handler_timeout_secs: config.handler_timeout_secs,
    }
}

pub fn key_scope(setting: KeyScopeSetting) -> KeyScope {
    match setting {
        KeyScopeSetting::Chat => KeyScope::Chat,
        KeyScopeSetting::Sender => KeyScope::Sender,
        KeyScopeSetting::ChatAndSender => KeyScope::ChatAndSender,
    }
}

/// Open the configured session backend.
pub async fn session_store(config: &CourierConfig) -> anyhow::Result<Arc<dyn SessionStore>> {
    match config.sessions.backend {
        SessionBackend::Memory => {
            debug!("using in-memory session store");
            Ok(Arc::new(MemoryStore::new()))
        },
        SessionBackend::Sqlite => {
            let url = &config.sessions.sqlite_url;
            let store = SqliteStore::connect(url)
                .await
                .with_context(|| format!("opening session database {url}"))?;
            info!(url = %url, "using sqlite session store");
            Ok(Arc::new(store))
        },
    }
}
