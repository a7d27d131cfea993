//! Webhook server startup: registration with the Bot API, bind, serve until
//! shutdown.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    courier_common::ApiClient,
    courier_routing::{ErrorSink, Router, TracingErrorSink},
    courier_telegram::{UpdateSource, WebhookRegistration},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tokio::net::TcpListener,
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::info,
};

use crate::{
    error::{Error, Result},
    webhook::{DispatchMode, HandlerErrorPolicy, WebhookState, build_webhook_app},
};

/// Webhook server settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub bind: String,
    pub port: u16,
    /// Route path of the update endpoint.
    pub path: String,
    /// Shared secret expected in `X-Telegram-Bot-Api-Secret-Token`.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret: Option<Secret<String>>,
    /// Full external URL of the endpoint. When set, `setWebhook` is issued
    /// at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Ask the server to discard its backlog when registering.
    pub drop_pending_updates: bool,
    pub allowed_updates: Vec<String>,
    pub on_handler_error: HandlerErrorPolicy,
    pub dispatch: DispatchMode,
    pub handler_timeout_secs: Option<u64>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            path: "/telegram".into(),
            secret: None,
            public_url: None,
            drop_pending_updates: false,
            allowed_updates: Vec::new(),
            on_handler_error: HandlerErrorPolicy::default(),
            dispatch: DispatchMode::default(),
            handler_timeout_secs: None,
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("public_url", &self.public_url)
            .field("drop_pending_updates", &self.drop_pending_updates)
            .field("on_handler_error", &self.on_handler_error)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// What startup registration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// `setWebhook` succeeded for this URL.
    Registered { url: String, dropped_pending: bool },
    /// No public URL configured; the webhook is assumed to be registered
    /// out of band.
    Skipped,
}

/// Issue `setWebhook` when a public URL is configured.
///
/// Asking to drop pending updates without a public URL is a configuration
/// error: the directive only exists as part of registration. Any Bot API
/// failure aborts startup.
pub async fn register_webhook(
    source: &dyn UpdateSource,
    config: &WebhookConfig,
) -> Result<Registration> {
    let Some(url) = config.public_url.clone() else {
        if config.drop_pending_updates {
            return Err(Error::config(
                "webhook.drop_pending_updates requires webhook.public_url",
            ));
        }
        info!("no public_url configured, skipping webhook registration");
        return Ok(Registration::Skipped);
    };

    let registration = WebhookRegistration {
        url: url.clone(),
        secret_token: config
            .secret
            .as_ref()
            .map(|s| s.expose_secret().clone()),
        drop_pending_updates: config.drop_pending_updates,
        allowed_updates: config.allowed_updates.clone(),
    };
    source.set_webhook(&registration).await?;
    info!(
        url = %url,
        drop_pending_updates = config.drop_pending_updates,
        "webhook registered"
    );
    Ok(Registration::Registered {
        url,
        dropped_pending: config.drop_pending_updates,
    })
}

/// Serve `app` on `listener` until `shutdown` fires. In-flight requests
/// and every background dispatch spawned on `tasks` finish before this
/// returns.
pub async fn serve(
    listener: TcpListener,
    app: axum::Router,
    tasks: TaskTracker,
    shutdown: CancellationToken,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tasks.close();
    if !tasks.is_empty() {
        info!(pending = tasks.len(), "waiting for background handlers");
    }
    tasks.wait().await;
    Ok(())
}

/// Webhook acquisition path: registration, HTTP endpoint, dispatch.
pub struct WebhookServer {
    config: WebhookConfig,
    router: Router,
    client: Arc<dyn ApiClient>,
    sink: Arc<dyn ErrorSink>,
    handler_cancel: CancellationToken,
    tasks: TaskTracker,
}

impl WebhookServer {
    pub fn new(config: WebhookConfig, router: Router, client: Arc<dyn ApiClient>) -> Self {
        Self {
            config,
            router,
            client,
            sink: Arc::new(TracingErrorSink),
            handler_cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Parent of every per-request cancellation token. The shutdown token
    /// passed to [`run`](Self::run) only stops accepting requests; cancelling
    /// this one interrupts handlers that are still running.
    #[must_use]
    pub fn with_handler_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.handler_cancel = cancel;
        self
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// The HTTP app without binding anything.
    pub fn app(&self) -> axum::Router {
        let state = WebhookState::new(
            self.router.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.sink),
        )
        .with_secret(self.config.secret.clone())
        .with_policy(self.config.on_handler_error)
        .with_mode(self.config.dispatch)
        .with_handler_timeout(self.config.handler_timeout_secs.map(Duration::from_secs))
        .with_handler_cancellation(self.handler_cancel.clone())
        .with_task_tracker(self.tasks.clone());
        build_webhook_app(&self.config.path, state)
    }

    /// Register, bind `bind:port`, and serve until `shutdown` fires.
    pub async fn run(self, source: &dyn UpdateSource, shutdown: CancellationToken) -> Result<()> {
        register_webhook(source, &self.config).await?;

        let addr: SocketAddr = format!("{}:{}", self.config.bind, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid webhook bind address: {e}")))?;
        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %listener.local_addr()?,
            path = %self.config.path,
            policy = ?self.config.on_handler_error,
            dispatch = ?self.config.dispatch,
            "webhook server listening"
        );
        serve(listener, self.app(), self.tasks.clone(), shutdown).await?;
        info!("webhook server stopped");
        Ok(())
    }
}
