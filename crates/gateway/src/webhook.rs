//! Webhook endpoint.
//!
//! `POST <path>` accepts one pushed update:
//!
//! 1. With a secret configured, `X-Telegram-Bot-Api-Secret-Token` must match
//!    it (constant-time compare) or the request gets 401.
//! 2. The body must decode into an [`Update`] or the request gets 400.
//! 3. The update goes through the router. "No route matched" is a 200.
//!
//! A handler error is reported to the error sink and answered according to
//! [`HandlerErrorPolicy`]. Requests are handled independently; nothing
//! depends on updates arriving in id order.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Json, Router as HttpRouter,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    },
    courier_common::{ApiClient, Update},
    courier_routing::{Context, ErrorReport, ErrorSink, Origin, Router, Stage},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, warn},
};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// HTTP answer when the matched handler fails.
///
/// `Acknowledge` (the default) answers 200 so the server does not redeliver
/// the update; the failure is only visible through the error sink.
/// `RequestRedelivery` answers 500, which makes the server retry the update
/// later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    #[default]
    Acknowledge,
    RequestRedelivery,
}

/// When the handler runs relative to the HTTP response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Respond after the handler returns; the status reflects its outcome.
    #[default]
    Inline,
    /// Respond 200 right away and run the handler on its own task. The
    /// error policy does not apply since the response is already sent.
    /// Those tasks are tracked and awaited by [`serve`](crate::serve) on
    /// shutdown.
    Background,
}

/// Shared state of the webhook route.
#[derive(Clone)]
pub struct WebhookState {
    router: Router,
    client: Arc<dyn ApiClient>,
    sink: Arc<dyn ErrorSink>,
    secret: Option<Secret<String>>,
    policy: HandlerErrorPolicy,
    mode: DispatchMode,
    handler_timeout: Option<Duration>,
    handler_cancel: CancellationToken,
    tasks: TaskTracker,
}

impl WebhookState {
    pub fn new(router: Router, client: Arc<dyn ApiClient>, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            router,
            client,
            sink,
            secret: None,
            policy: HandlerErrorPolicy::default(),
            mode: DispatchMode::default(),
            handler_timeout: None,
            handler_cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: Option<Secret<String>>) -> Self {
        self.secret = secret.filter(|s| !s.expose_secret().is_empty());
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: HandlerErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Parent of every per-request cancellation token.
    #[must_use]
    pub fn with_handler_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.handler_cancel = cancel;
        self
    }

    /// Track background dispatches on `tasks` instead of a private tracker.
    #[must_use]
    pub fn with_task_tracker(mut self, tasks: TaskTracker) -> Self {
        self.tasks = tasks;
        self
    }

    /// Tracker of background dispatches; hand it to [`serve`](crate::serve).
    pub fn tasks(&self) -> TaskTracker {
        self.tasks.clone()
    }

    fn secret_matches(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.secret else {
            return true;
        };
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        constant_time_eq(provided, expected.expose_secret())
    }

    /// Dispatch one update; `false` when the handler failed.
    async fn dispatch(&self, update: Update) -> bool {
        let update_id = update.update_id;
        let mut cx = Context::new(update, Arc::clone(&self.client))
            .with_origin(Origin::Webhook)
            .with_cancellation(self.handler_cancel.child_token())
            .with_timeout(self.handler_timeout);
        match self.router.dispatch(&mut cx).await {
            Ok(outcome) => {
                debug!(update_id, ?outcome, "webhook update dispatched");
                true
            },
            Err(e) => {
                self.sink.report(&ErrorReport {
                    origin: Origin::Webhook,
                    stage: Stage::Handler,
                    update_id,
                    error: &e,
                });
                false
            },
        }
    }
}

/// Constant-time string comparison. Both sides are hashed first so the
/// comparison always covers 32 bytes whatever the input lengths.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (Sha256::digest(a.as_bytes()), Sha256::digest(b.as_bytes()));
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Build the webhook HTTP app: `POST <path>` and `GET /health`.
pub fn build_webhook_app(path: &str, state: WebhookState) -> HttpRouter {
    HttpRouter::new()
        .route(path, post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn webhook_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !state.secret_matches(&headers) {
        warn!("webhook request rejected: secret token mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "webhook request rejected: malformed update");
            return StatusCode::BAD_REQUEST;
        },
    };

    match state.mode {
        DispatchMode::Background => {
            let tasks = state.tasks.clone();
            tasks.spawn(async move {
                state.dispatch(update).await;
            });
            StatusCode::OK
        },
        DispatchMode::Inline => {
            if state.dispatch(update).await {
                return StatusCode::OK;
            }
            match state.policy {
                HandlerErrorPolicy::Acknowledge => StatusCode::OK,
                HandlerErrorPolicy::RequestRedelivery => StatusCode::INTERNAL_SERVER_ERROR,
            }
        },
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
