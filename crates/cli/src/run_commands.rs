use std::sync::Arc;

use {
    anyhow::{Result, bail},
    courier_config::{CourierConfig, Severity, validate},
    courier_common::ApiClient,
    courier_gateway::WebhookServer,
    courier_routing::Router,
    courier_sessions::SessionMiddleware,
    courier_telegram::{BotApi, Poller, UpdateSource},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use crate::{bot, settings};

/// Refuse to start on a config with errors; log warnings.
fn preflight(config: &CourierConfig) -> Result<()> {
    let result = validate(config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => info!(path = %d.path, "{}", d.message),
        }
    }
    if result.has_errors() {
        bail!(
            "configuration has {} error(s); run `courier config check` for details",
            result.count(Severity::Error)
        );
    }
    Ok(())
}

async fn connect(config: &CourierConfig) -> Result<(Arc<BotApi>, Router)> {
    preflight(config)?;

    let api = Arc::new(BotApi::new(&settings::bot_config(config)?)?);
    let me = api.get_me().await?;
    info!(bot_id = me.id, username = ?me.username, "bot token accepted");

    let store = settings::session_store(config).await?;
    let scope = settings::key_scope(config.sessions.key_scope);
    let sessions = SessionMiddleware::new(store);
    let sessions = match &config.sessions.key_prefix {
        Some(prefix) => sessions.scope_with_prefix(scope, prefix.clone()),
        None => sessions.scope(scope),
    };
    Ok((api, bot::demo_router(sessions)))
}

/// First Ctrl-C cancels `stop`; a second one cancels `abort` too.
fn watch_signals(stop: CancellationToken, abort: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("shutdown requested, finishing in-flight updates (Ctrl-C again to abort them)");
        stop.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("aborting in-flight handlers");
            abort.cancel();
        }
    });
}

/// The bot client serves both as the update source and as the outbound
/// client handed to handlers.
fn build_poller(api: &Arc<BotApi>, router: Router, config: &CourierConfig) -> Poller {
    let source: Arc<dyn UpdateSource> = api.clone();
    let client: Arc<dyn ApiClient> = api.clone();
    Poller::new(source, client, router, settings::poller_config(config))
}

fn build_webhook_server(
    api: &Arc<BotApi>,
    router: Router,
    config: &CourierConfig,
) -> WebhookServer {
    let client: Arc<dyn ApiClient> = api.clone();
    WebhookServer::new(settings::webhook_config(config), router, client)
}

pub async fn run_poll(config: CourierConfig) -> Result<()> {
    let (api, router) = connect(&config).await?;

    let stop = CancellationToken::new();
    let handlers = CancellationToken::new();
    watch_signals(stop.clone(), handlers.clone());

    let poller = build_poller(&api, router, &config).with_handler_cancellation(handlers);
    poller.spawn(stop).await??;
    Ok(())
}

pub async fn run_webhook(config: CourierConfig) -> Result<()> {
    let (api, router) = connect(&config).await?;

    let shutdown = CancellationToken::new();
    let handlers = CancellationToken::new();
    watch_signals(shutdown.clone(), handlers.clone());

    let server = build_webhook_server(&api, router, &config).with_handler_cancellation(handlers);
    server.run(api.as_ref(), shutdown).await?;
    Ok(())
}
