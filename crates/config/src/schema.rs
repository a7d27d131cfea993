//! Config schema types.
//!
//! Every section is `#[serde(default)]`, so an empty file is a valid (if
//! token-less) config.

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

const REDACTED: &str = "[REDACTED]";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub telegram: TelegramSection,
    pub polling: PollingSection,
    pub webhook: WebhookSection,
    pub sessions: SessionsSection,
    /// Deadline applied to each dispatch, in seconds. Unset means none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_timeout_secs: Option<u64>,
}

impl CourierConfig {
    /// Copy with every secret replaced by a placeholder, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.telegram.token.is_some() {
            copy.telegram.token = Some(Secret::new(REDACTED.into()));
        }
        if copy.webhook.secret.is_some() {
            copy.webhook.secret = Some(Secret::new(REDACTED.into()));
        }
        copy
    }
}

/// Bot API credentials and endpoint.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    pub api_url: String,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.telegram.org".into(),
        }
    }
}

impl std::fmt::Debug for TelegramSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSection")
            .field("token", &self.token.as_ref().map(|_| REDACTED))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Long-polling acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    /// Maximum updates per `getUpdates` call (1..=100).
    pub limit: u32,
    /// Server-side long-poll wait in seconds (0..=50).
    pub timeout_secs: u64,
    /// Update kinds to receive; empty keeps the server's setting.
    pub allowed_updates: Vec<String>,
    /// Discard the server backlog when polling starts.
    pub drop_pending_updates: bool,
    pub backoff: BackoffSection,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            limit: 100,
            timeout_secs: 30,
            allowed_updates: Vec::new(),
            drop_pending_updates: false,
            backoff: BackoffSection::default(),
        }
    }
}

/// Retry delays after failed `getUpdates` calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSection {
    pub initial_ms: u64,
    pub max_ms: u64,
    /// Fraction of each delay that may be shaved off at random.
    pub jitter: f64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            jitter: 0.2,
        }
    }
}

/// HTTP answer when a webhook handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorSetting {
    #[default]
    Acknowledge,
    RequestRedelivery,
}

/// Whether the webhook answers before or after the handler runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchSetting {
    #[default]
    Inline,
    Background,
}

/// Webhook acquisition.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub bind: String,
    pub port: u16,
    pub path: String,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret: Option<Secret<String>>,
    /// Full external URL Telegram should post to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub drop_pending_updates: bool,
    pub allowed_updates: Vec<String>,
    pub on_handler_error: HandlerErrorSetting,
    pub dispatch: DispatchSetting,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            path: "/telegram".into(),
            secret: None,
            public_url: None,
            drop_pending_updates: false,
            allowed_updates: Vec::new(),
            on_handler_error: HandlerErrorSetting::default(),
            dispatch: DispatchSetting::default(),
        }
    }
}

impl std::fmt::Debug for WebhookSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSection")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("secret", &self.secret.as_ref().map(|_| REDACTED))
            .field("public_url", &self.public_url)
            .field("drop_pending_updates", &self.drop_pending_updates)
            .field("allowed_updates", &self.allowed_updates)
            .field("on_handler_error", &self.on_handler_error)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Which identity a conversation session is keyed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScopeSetting {
    #[default]
    Chat,
    Sender,
    ChatAndSender,
}

/// Conversation session storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    pub backend: SessionBackend,
    /// Database URL for the `sqlite` backend.
    pub sqlite_url: String,
    pub key_scope: KeyScopeSetting,
    /// Namespace prepended to every session key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            backend: SessionBackend::default(),
            sqlite_url: "sqlite://courier.db?mode=rwc".into(),
            key_scope: KeyScopeSetting::default(),
            key_prefix: None,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: CourierConfig = toml::from_str("").unwrap();
        assert!(cfg.telegram.token.is_none());
        assert_eq!(cfg.polling.limit, 100);
        assert_eq!(cfg.polling.timeout_secs, 30);
        assert_eq!(cfg.polling.backoff.max_ms, 30_000);
        assert_eq!(cfg.webhook.path, "/telegram");
        assert_eq!(cfg.webhook.on_handler_error, HandlerErrorSetting::Acknowledge);
        assert_eq!(cfg.sessions.backend, SessionBackend::Memory);
        assert!(cfg.handler_timeout_secs.is_none());
    }

    #[test]
    fn parses_sections() {
        let cfg: CourierConfig = toml::from_str(
            r#"
            handler_timeout_secs = 15

            [telegram]
            token = "123:abc"

            [polling]
            limit = 10
            allowed_updates = ["message", "callback_query"]

            [polling.backoff]
            initial_ms = 100

            [webhook]
            secret = "s3cret"
            public_url = "https://bot.example.com/telegram"
            on_handler_error = "request_redelivery"
            dispatch = "background"

            [sessions]
            backend = "sqlite"
            key_scope = "chat_and_sender"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.telegram.token.unwrap().expose_secret(), "123:abc");
        assert_eq!(cfg.polling.limit, 10);
        assert_eq!(cfg.polling.allowed_updates, ["message", "callback_query"]);
        assert_eq!(cfg.polling.backoff.initial_ms, 100);
        assert_eq!(cfg.polling.backoff.max_ms, 30_000);
        assert_eq!(
            cfg.webhook.on_handler_error,
            HandlerErrorSetting::RequestRedelivery
        );
        assert_eq!(cfg.webhook.dispatch, DispatchSetting::Background);
        assert_eq!(cfg.sessions.backend, SessionBackend::Sqlite);
        assert_eq!(cfg.sessions.key_scope, KeyScopeSetting::ChatAndSender);
        assert_eq!(cfg.handler_timeout_secs, Some(15));
    }

    #[test]
    fn redacted_hides_secrets_in_output() {
        let mut cfg = CourierConfig::default();
        cfg.telegram.token = Some(Secret::new("123:abc".into()));
        cfg.webhook.secret = Some(Secret::new("hunter2".into()));

        let shown = toml::to_string_pretty(&cfg.redacted()).unwrap();
        assert!(!shown.contains("123:abc"));
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains(REDACTED));

        let debug = format!("{cfg:?}");
        assert!(!debug.contains("123:abc"));
        assert!(!debug.contains("hunter2"));
    }
}
