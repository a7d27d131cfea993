//! Configuration loading, env substitution, and validation.
//!
//! Config files: `courier.toml`, `courier.yaml`, `courier.yml`, or
//! `courier.json`. Searched in `./` then the user config directory
//! (`~/.config/courier/` on Linux).
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file before parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        TOKEN_ENV, WEBHOOK_SECRET_ENV, apply_env_overrides, config_dir, discover_and_load,
        find_config_file, load_config, parse_config,
    },
    schema::{
        BackoffSection, CourierConfig, DispatchSetting, HandlerErrorSetting, KeyScopeSetting,
        PollingSection, SessionBackend, SessionsSection, TelegramSection, WebhookSection,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_file, validate_str},
};
