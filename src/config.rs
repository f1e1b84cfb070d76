//! Application-level configuration loading: upstream endpoints, sync policy and timers.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::{
    dao::{backend::config::BackendConfig, payment::http::ProviderConfig},
    services::sync_service::SyncPolicy,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SHARED_TABLE_BACK_CONFIG_PATH";
const BACKEND_URL_ENV: &str = "BOOKING_BACKEND_URL";
const PROVIDER_URL_ENV: &str = "PAYMENT_PROVIDER_URL";
const PROVIDER_SECRET_ENV: &str = "PAYMENT_PROVIDER_SECRET";

/// Immutable runtime configuration shared across the application.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Booking backend endpoint.
    pub backend: BackendSettings,
    /// Payment provider endpoint and credentials.
    pub payment: PaymentSettings,
    /// Sync throttle, backoff and polling.
    pub sync: SyncSettings,
    /// Period of the per-session countdown ticker.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "countdown_tick_ms")]
    pub countdown_tick: Duration,
    /// Upper bound on the backend work of one booking transition.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "transition_timeout_ms")]
    pub transition_timeout: Duration,
    /// Events buffered per session before slow SSE subscribers start skipping.
    pub event_capacity: usize,
}

/// Where the booking backend lives.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL every backend path is joined to.
    pub base_url: String,
    /// Per-request timeout of the HTTP client.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "request_timeout_ms")]
    pub request_timeout: Duration,
}

/// Where the payment provider lives and how to authenticate.
#[serde_as]
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Secret API key; never logged.
    pub secret_key: String,
    /// Per-request timeout of the HTTP client.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "request_timeout_ms")]
    pub request_timeout: Duration,
}

impl std::fmt::Debug for PaymentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSettings")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Throttle and backoff knobs for the sync client.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// See [`SyncPolicy::min_interval`].
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "min_interval_ms")]
    pub min_interval: Duration,
    /// See [`SyncPolicy::max_retries`].
    pub max_retries: u32,
    /// See [`SyncPolicy::base_delay`].
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// See [`SyncPolicy::max_delay`].
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// See [`SyncPolicy::request_timeout`].
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    /// See [`SyncPolicy::poll_interval`].
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms")]
    pub poll_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            payment: PaymentSettings::default(),
            sync: SyncSettings::default(),
            countdown_tick: Duration::from_secs(1),
            transition_timeout: Duration::from_secs(5),
            event_capacity: 32,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:12111/v1".into(),
            secret_key: String::new(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        let policy = SyncPolicy::default();
        Self {
            min_interval: policy.min_interval,
            max_retries: policy.max_retries,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            request_timeout: policy.request_timeout,
            poll_interval: policy.poll_interval,
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_env_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`, ignoring empty values.
    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = lookup(BACKEND_URL_ENV) {
            self.backend.base_url = url;
        }
        if let Some(url) = lookup(PROVIDER_URL_ENV) {
            self.payment.base_url = url;
        }
        if let Some(secret) = lookup(PROVIDER_SECRET_ENV) {
            self.payment.secret_key = secret;
        }
        if self.payment.secret_key.is_empty() {
            warn!("payment provider secret key is not configured");
        }
        self
    }

    /// Connection settings for the booking backend client.
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(self.backend.base_url.clone()).with_timeout(self.backend.request_timeout)
    }

    /// Connection settings for the payment provider client.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            base_url: self.payment.base_url.clone(),
            secret_key: self.payment.secret_key.clone(),
            request_timeout: self.payment.request_timeout,
        }
    }

    /// Throttle / backoff policy for every session's sync client.
    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            min_interval: self.sync.min_interval,
            max_retries: self.sync.max_retries,
            base_delay: self.sync.base_delay,
            max_delay: self.sync.max_delay,
            request_timeout: self.sync.request_timeout,
            poll_interval: self.sync.poll_interval,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"backend":{"base_url":"https://api.example.test"},"sync":{"min_interval_ms":500,"poll_interval_ms":0}}"#,
        )
        .unwrap();

        assert_eq!(config.backend.base_url, "https://api.example.test");
        assert_eq!(config.backend.request_timeout, Duration::from_secs(10));
        assert_eq!(config.sync.min_interval, Duration::from_millis(500));
        assert_eq!(config.sync.max_retries, 3);
        assert!(config.sync_policy().poll_interval.is_zero());
        assert_eq!(config.sync_policy().max_delay, Duration::from_secs(30));
        assert_eq!(config.countdown_tick, Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_apply_when_non_empty() {
        let config = AppConfig::default().with_env_overrides(|key| match key {
            BACKEND_URL_ENV => Some("https://bookings.example.test".into()),
            PROVIDER_SECRET_ENV => Some("sk_test_123".into()),
            PROVIDER_URL_ENV => Some("  ".into()),
            _ => None,
        });

        assert_eq!(config.backend.base_url, "https://bookings.example.test");
        assert_eq!(config.payment.secret_key, "sk_test_123");
        assert_eq!(config.payment.base_url, "http://localhost:12111/v1");
    }

    #[test]
    fn payment_settings_debug_hides_secret() {
        let mut settings = PaymentSettings::default();
        settings.secret_key = "sk_live_secret".into();
        assert!(!format!("{settings:?}").contains("sk_live_secret"));
    }
}
