//! Environment-backed runtime configuration for `chatfeed-cli`.

use std::{env, path::PathBuf};

use backend_core::FeedRuntimeConfig;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_DATA_DIR: &str = "./.chatfeed-store";
const CREDENTIALS_FILENAME: &str = "credentials.json";
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Runtime configuration used by the terminal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Root URL of the chat service.
    pub base_url: String,
    /// Directory holding the persisted credential file.
    pub data_dir: PathBuf,
    /// Poll cadence and request bound forwarded to the runtime.
    pub runtime: FeedRuntimeConfig,
    /// Optional username for automatic sign-in at startup.
    pub auto_login_user: Option<String>,
    /// Optional password for automatic sign-in at startup.
    pub auto_login_password: Option<String>,
}

impl CliConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = optional_trimmed_env("CHATFEED_BASE_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "CHATFEED_BASE_URL",
                value: base_url,
                reason: "must start with http:// or https://".to_owned(),
            });
        }

        let data_dir = optional_trimmed_env("CHATFEED_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let poll_interval_ms = parse_positive_u64(
            "CHATFEED_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
            &mut lookup,
        )?;
        let request_timeout_ms = parse_positive_u64(
            "CHATFEED_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;

        Ok(Self {
            base_url,
            data_dir,
            runtime: FeedRuntimeConfig::new(poll_interval_ms, request_timeout_ms),
            auto_login_user: optional_trimmed_env("CHATFEED_USER", &mut lookup),
            auto_login_password: lookup("CHATFEED_PASSWORD").filter(|value| !value.is_empty()),
        })
    }

    /// Location of the persisted credential file.
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILENAME)
    }

    /// Username/password pair for startup sign-in, when both are set.
    pub fn auto_login(&self) -> Option<(String, String)> {
        Some((
            self.auto_login_user.clone()?,
            self.auto_login_password.clone()?,
        ))
    }

    /// Secret-store account key, one per service URL.
    pub fn session_account(&self) -> String {
        self.base_url.trim_end_matches('/').to_owned()
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_positive_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let value = parse_optional_u64(key, lookup)?.unwrap_or(default);
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_owned(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(value)
}
