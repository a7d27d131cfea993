//! Thin Bot API client.
//!
//! Every method is a `POST <api_url>/bot<token>/<method>` with a JSON body.
//! Responses come wrapped in `{ok, result, description, error_code,
//! parameters}` and are classified into [`Error`] variants so the poller and
//! the webhook server can tell fatal failures from transient ones.

use std::time::Duration;

use {
    async_trait::async_trait,
    courier_common::{ApiClient, Update, User},
    reqwest::StatusCode,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    config::BotConfig,
    error::{Error, Result},
};

/// Extra time granted on top of the long-poll timeout so the HTTP client
/// never gives up on a healthy long poll.
const LONG_POLL_MARGIN: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ── Requests ────────────────────────────────────────────────────────────────

/// Parameters of one `getUpdates` long poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetUpdates {
    /// First update id to return; everything below is confirmed and dropped
    /// by the server.
    pub offset: i64,
    pub limit: u32,
    /// Long-poll timeout in seconds.
    pub timeout: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_updates: Vec<String>,
}

/// Parameters of `setWebhook`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct WebhookRegistration {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<String>,
    pub drop_pending_updates: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_updates: Vec<String>,
}

impl std::fmt::Debug for WebhookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookRegistration")
            .field("url", &self.url)
            .field("secret_token", &self.secret_token.as_ref().map(|_| "[REDACTED]"))
            .field("drop_pending_updates", &self.drop_pending_updates)
            .field("allowed_updates", &self.allowed_updates)
            .finish()
    }
}

/// One `getUpdates` result.
///
/// Entries that fail to decode are dropped from `updates` but still count
/// toward `last_update_id`, so the offset moves past them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    pub updates: Vec<Update>,
    pub last_update_id: Option<i64>,
}

impl From<Vec<Update>> for UpdateBatch {
    fn from(updates: Vec<Update>) -> Self {
        let last_update_id = updates.iter().map(|u| u.update_id).max();
        Self {
            updates,
            last_update_id,
        }
    }
}

/// Where updates come from and how webhook registration is managed.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn get_updates(&self, request: &GetUpdates) -> Result<UpdateBatch>;

    async fn set_webhook(&self, registration: &WebhookRegistration) -> Result<()>;

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<()>;
}

// ── Response envelope ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

fn classify(status: StatusCode, body: &[u8]) -> Result<Value> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => return Err(Error::Decode(e)),
        Err(_) => {
            return Err(Error::Api {
                code: i64::from(status.as_u16()),
                description: String::from_utf8_lossy(body).chars().take(200).collect(),
            });
        },
    };
    if envelope.ok {
        return Ok(envelope.result.unwrap_or(Value::Null));
    }

    let code = envelope
        .error_code
        .unwrap_or_else(|| i64::from(status.as_u16()));
    let description = envelope.description.unwrap_or_default();
    Err(match code {
        401 | 404 => Error::Unauthorized { description },
        409 => Error::Conflict { description },
        429 => Error::RetryAfter {
            after: Duration::from_secs(
                envelope
                    .parameters
                    .and_then(|p| p.retry_after)
                    .unwrap_or(1),
            ),
        },
        _ => Error::Api { code, description },
    })
}

// ── Client ──────────────────────────────────────────────────────────────────

/// Bot API client over `reqwest`.
#[derive(Clone)]
pub struct BotApi {
    http: reqwest::Client,
    api_url: String,
    token: Secret<String>,
}

impl BotApi {
    pub fn new(config: &BotConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: reqwest::Client, config: &BotConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_url,
            self.token.expose_secret(),
            method
        )
    }

    /// Call `method` and return the raw `result` value.
    pub async fn request<P: Serialize + ?Sized>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<Value> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(reqwest::Error::without_url)?;
        debug!(method, status = status.as_u16(), bytes = body.len(), "bot api response");
        classify(status, &body)
    }

    /// Call `method` and decode `result` into `R`.
    pub async fn request_as<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self
            .request(method, params, DEFAULT_REQUEST_TIMEOUT)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Verify the token and fetch the bot's own account.
    pub async fn get_me(&self) -> Result<User> {
        self.request_as("getMe", &serde_json::json!({})).await
    }
}

impl std::fmt::Debug for BotApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApi")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UpdateSource for BotApi {
    async fn get_updates(&self, request: &GetUpdates) -> Result<UpdateBatch> {
        let timeout = Duration::from_secs(request.timeout) + LONG_POLL_MARGIN;
        let result = self.request("getUpdates", request, timeout).await?;
        let Value::Array(raw) = result else {
            return Err(Error::message("getUpdates result is not an array"));
        };

        let mut batch = UpdateBatch::default();
        for item in raw {
            let id = item.get("update_id").and_then(Value::as_i64);
            batch.last_update_id = batch.last_update_id.max(id);
            match serde_json::from_value::<Update>(item) {
                Ok(update) => batch.updates.push(update),
                Err(e) => warn!(update_id = ?id, error = %e, "dropping malformed update"),
            }
        }
        Ok(batch)
    }

    async fn set_webhook(&self, registration: &WebhookRegistration) -> Result<()> {
        self.request("setWebhook", registration, DEFAULT_REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<()> {
        self.request(
            "deleteWebhook",
            &serde_json::json!({ "drop_pending_updates": drop_pending_updates }),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ApiClient for BotApi {
    async fn call(&self, method: &str, params: Value) -> courier_common::Result<Value> {
        self.request(method, &params, DEFAULT_REQUEST_TIMEOUT)
            .await
            .map_err(|e| courier_common::Error::external(method.to_string(), e))
    }
}
