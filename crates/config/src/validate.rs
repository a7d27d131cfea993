//! Configuration validation engine.
//!
//! Checks a config file for syntax errors, unknown (likely misspelled)
//! fields, and type errors, then runs semantic checks on the parsed
//! [`CourierConfig`].

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use secrecy::ExposeSecret;

use crate::{
    env_subst::substitute_env,
    loader::{apply_env_overrides, find_config_file, parse_config},
    schema::{CourierConfig, SessionBackend},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "range",
    /// "security", "missing", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "polling.limit"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Semantic checks ─────────────────────────────────────────────────────────

const MAX_POLL_LIMIT: u32 = 100;
const MAX_POLL_TIMEOUT_SECS: u64 = 50;
const MAX_SECRET_LEN: usize = 256;

/// Run semantic checks on a parsed config.
#[must_use]
pub fn validate(config: &CourierConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_telegram(config, &mut diagnostics);
    check_polling(config, &mut diagnostics);
    check_webhook(config, &mut diagnostics);
    check_sessions(config, &mut diagnostics);
    if config.handler_timeout_secs == Some(0) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "handler_timeout_secs",
            "must be at least 1 (omit it for no deadline)",
        ));
    }
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_telegram(config: &CourierConfig, diagnostics: &mut Vec<Diagnostic>) {
    match config.telegram.token.as_ref().map(|t| t.expose_secret()) {
        None => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "telegram.token",
            "no bot token configured (set telegram.token or COURIER_BOT_TOKEN)",
        )),
        Some(token) if token.trim().is_empty() => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "telegram.token",
            "bot token is empty",
        )),
        Some(token) if !token.contains(':') => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "format",
            "telegram.token",
            "bot token does not look like `<bot id>:<secret>`",
        )),
        Some(_) => {},
    }

    let api_url = &config.telegram.api_url;
    if !api_url.starts_with("https://") && !api_url.starts_with("http://") {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "format",
            "telegram.api_url",
            format!("\"{api_url}\" is not an http(s) URL"),
        ));
    }
}

fn check_polling(config: &CourierConfig, diagnostics: &mut Vec<Diagnostic>) {
    let polling = &config.polling;
    if !(1..=MAX_POLL_LIMIT).contains(&polling.limit) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "polling.limit",
            format!("{} is outside 1..={MAX_POLL_LIMIT}", polling.limit),
        ));
    }
    if polling.timeout_secs > MAX_POLL_TIMEOUT_SECS {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "polling.timeout_secs",
            format!(
                "{} exceeds the maximum long-poll wait of {MAX_POLL_TIMEOUT_SECS}",
                polling.timeout_secs
            ),
        ));
    } else if polling.timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "polling.timeout_secs",
            "0 disables long polling; the poller will busy-loop on an idle bot",
        ));
    }

    let backoff = &polling.backoff;
    if backoff.initial_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "polling.backoff.initial_ms",
            "must be greater than 0",
        ));
    }
    if backoff.initial_ms > backoff.max_ms {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "polling.backoff",
            format!(
                "initial_ms ({}) is greater than max_ms ({})",
                backoff.initial_ms, backoff.max_ms
            ),
        ));
    }
    if !(0.0..=1.0).contains(&backoff.jitter) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "polling.backoff.jitter",
            format!("{} is outside [0, 1]", backoff.jitter),
        ));
    }
}

fn check_webhook(config: &CourierConfig, diagnostics: &mut Vec<Diagnostic>) {
    let webhook = &config.webhook;
    if !webhook.path.starts_with('/') {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "format",
            "webhook.path",
            format!("\"{}\" must start with '/'", webhook.path),
        ));
    }

    match webhook.secret.as_ref().map(|s| s.expose_secret()) {
        Some(secret) => {
            if secret.is_empty() || secret.len() > MAX_SECRET_LEN {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "format",
                    "webhook.secret",
                    format!("length must be 1..={MAX_SECRET_LEN}"),
                ));
            }
            if !secret
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "format",
                    "webhook.secret",
                    "only A-Z, a-z, 0-9, '_' and '-' are allowed",
                ));
            }
        },
        None => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "security",
            "webhook.secret",
            "no secret configured; anyone who finds the endpoint can inject updates",
        )),
    }

    match &webhook.public_url {
        Some(url) if !url.starts_with("https://") => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "security",
            "webhook.public_url",
            "Telegram only delivers webhooks to https URLs",
        )),
        Some(_) => {},
        None if webhook.drop_pending_updates => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "webhook.drop_pending_updates",
            "requires webhook.public_url (pending updates are dropped during registration)",
        )),
        None => {},
    }
}

fn check_sessions(config: &CourierConfig, diagnostics: &mut Vec<Diagnostic>) {
    let sessions = &config.sessions;
    if sessions.backend == SessionBackend::Sqlite && sessions.sqlite_url.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "sessions.sqlite_url",
            "the sqlite backend needs a database URL",
        ));
    }
}

// ── File validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
///
/// Environment overrides are applied before the semantic checks, so a token
/// supplied through `COURIER_BOT_TOKEN` counts.
#[must_use]
pub fn validate_file(path: Option<&Path>) -> ValidationResult {
    let config_path = path.map(Path::to_path_buf).or_else(find_config_file);

    let Some(actual_path) = config_path else {
        let mut config = CourierConfig::default();
        apply_env_overrides(&mut config);
        let mut result = validate(&config);
        result.diagnostics.insert(
            0,
            Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            ),
        );
        return result;
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) => validate_str(&content, &actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw config text. The format is taken from `path`'s extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let raw = substitute_env(raw);
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match parse_value(&raw, path) {
        Ok(v) => v,
        Err(message) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", message));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &schema_tree(), "", &mut diagnostics);

    // 3. Types, then semantics
    match parse_config(&raw, path) {
        Ok(mut config) => {
            apply_env_overrides(&mut config);
            diagnostics.extend(validate(&config).diagnostics);
        },
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn parse_value(raw: &str, path: &Path) -> Result<serde_json::Value, String> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| format!("TOML syntax error: {e}"))
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(raw)
            .map_err(|e| format!("YAML syntax error: {e}"))
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| format!("JSON syntax error: {e}")),
        _ => Err(format!("unsupported config format: .{ext}")),
    }
}

// ── Unknown-field detection ─────────────────────────────────────────────────

/// Expected shape of the configuration: a table with fixed keys, or a leaf.
enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn leaves(names: &[&'static str]) -> KnownKeys {
    KnownKeys::Struct(names.iter().map(|n| (*n, KnownKeys::Leaf)).collect())
}

fn schema_tree() -> KnownKeys {
    let mut polling = HashMap::from([
        ("limit", KnownKeys::Leaf),
        ("timeout_secs", KnownKeys::Leaf),
        ("allowed_updates", KnownKeys::Leaf),
        ("drop_pending_updates", KnownKeys::Leaf),
    ]);
    polling.insert("backoff", leaves(&["initial_ms", "max_ms", "jitter"]));

    KnownKeys::Struct(HashMap::from([
        ("telegram", leaves(&["token", "api_url"])),
        ("polling", KnownKeys::Struct(polling)),
        (
            "webhook",
            leaves(&[
                "bind",
                "port",
                "path",
                "secret",
                "public_url",
                "drop_pending_updates",
                "allowed_updates",
                "on_handler_error",
                "dispatch",
            ]),
        ),
        (
            "sessions",
            leaves(&["backend", "sqlite_url", "key_scope", "key_prefix"]),
        ),
        ("handler_timeout_secs", KnownKeys::Leaf),
    ]))
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        // Leaf or type mismatch; type errors are caught by deserialization.
        return;
    };
    let mut known: Vec<&str> = fields.keys().copied().collect();
    known.sort_unstable();

    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child, child_schema, &path, diagnostics);
            continue;
        }
        let message = match suggest(key, &known, 3) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "unknown-field",
            path,
            message,
        ));
    }
}

/// Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, secrecy::Secret};

    fn valid_config() -> CourierConfig {
        let mut config = CourierConfig::default();
        config.telegram.token = Some(Secret::new("123:abc".into()));
        config.webhook.secret = Some(Secret::new("s3cret_token-1".into()));
        config
    }

    fn errors_at(result: &ValidationResult, path: &str) -> usize {
        result
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error && d.path == path)
            .count()
    }

    #[test]
    fn default_config_with_token_and_secret_is_clean() {
        let result = validate(&valid_config());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn missing_token_is_an_error() {
        let result = validate(&CourierConfig::default());
        assert!(result.has_errors());
        assert_eq!(errors_at(&result, "telegram.token"), 1);
    }

    #[rstest]
    #[case(0, true)]
    #[case(1, false)]
    #[case(100, false)]
    #[case(101, true)]
    fn poll_limit_range(#[case] limit: u32, #[case] invalid: bool) {
        let mut config = valid_config();
        config.polling.limit = limit;
        assert_eq!(errors_at(&validate(&config), "polling.limit") == 1, invalid);
    }

    #[rstest]
    #[case(50, false)]
    #[case(51, true)]
    fn poll_timeout_range(#[case] timeout: u64, #[case] invalid: bool) {
        let mut config = valid_config();
        config.polling.timeout_secs = timeout;
        assert_eq!(
            errors_at(&validate(&config), "polling.timeout_secs") == 1,
            invalid
        );
    }

    #[test]
    fn backoff_bounds() {
        let mut config = valid_config();
        config.polling.backoff.initial_ms = 60_000;
        config.polling.backoff.jitter = 1.5;
        let result = validate(&config);
        assert_eq!(errors_at(&result, "polling.backoff"), 1);
        assert_eq!(errors_at(&result, "polling.backoff.jitter"), 1);
    }

    #[rstest]
    #[case("abc-DEF_123", false)]
    #[case("", true)]
    #[case("has space", true)]
    #[case("dots.not.allowed", true)]
    fn webhook_secret_charset(#[case] secret: &str, #[case] invalid: bool) {
        let mut config = valid_config();
        config.webhook.secret = Some(Secret::new(secret.into()));
        assert_eq!(
            errors_at(&validate(&config), "webhook.secret") > 0,
            invalid
        );
    }

    #[test]
    fn webhook_secret_length_limit() {
        let mut config = valid_config();
        config.webhook.secret = Some(Secret::new("a".repeat(257)));
        assert_eq!(errors_at(&validate(&config), "webhook.secret"), 1);
    }

    #[test]
    fn webhook_path_and_drop_pending() {
        let mut config = valid_config();
        config.webhook.path = "telegram".into();
        config.webhook.drop_pending_updates = true;
        let result = validate(&config);
        assert_eq!(errors_at(&result, "webhook.path"), 1);
        assert_eq!(errors_at(&result, "webhook.drop_pending_updates"), 1);

        config.webhook.public_url = Some("https://bot.example.com/telegram".into());
        assert_eq!(
            errors_at(&validate(&config), "webhook.drop_pending_updates"),
            0
        );
    }

    #[test]
    fn missing_secret_is_only_a_warning() {
        let mut config = valid_config();
        config.webhook.secret = None;
        let result = validate(&config);
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn unknown_field_with_suggestion() {
        let result = validate_str(
            "[polling]\nlimt = 5\n[telegram]\ntoken = \"1:a\"\n",
            Path::new("courier.toml"),
        );
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field")
            .unwrap();
        assert_eq!(d.path, "polling.limt");
        assert!(d.message.contains("\"limit\""), "{}", d.message);
    }

    #[test]
    fn syntax_and_type_errors() {
        let syntax = validate_str("[polling", Path::new("courier.toml"));
        assert_eq!(syntax.diagnostics[0].category, "syntax");

        let typed = validate_str("polling:\n  limit: many\n", Path::new("courier.yaml"));
        assert!(typed.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn validate_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(&path, r#"{"polling": {"limit": 0}}"#).unwrap();

        let result = validate_file(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(errors_at(&result, "polling.limit"), 1);
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("limit", "limt"), 1);
        assert_eq!(levenshtein("secret", "secret"), 0);
        assert_eq!(suggest("webhok", &["webhook", "polling"], 3), Some("webhook"));
        assert_eq!(suggest("zzzzzzzz", &["webhook"], 3), None);
    }
}
