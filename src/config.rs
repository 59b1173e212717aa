//! Integration configuration: router addresses, credentials and timing defaults.
//!
//! Loaded once from the JSON file named by `$CONFIG` and validated into a
//! [`ValidatedConfig`]; everything downstream consumes the validated form.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::verify::VerifierConfig;

/// Environment variable holding the config file path.
pub const CONFIG_ENV: &str = "CONFIG";

/// Default for `default_timeout` and `cf_push_timeout` when unset or non-positive.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default for `polling_interval` when unset or zero.
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 5;

/// Raw integration config as read from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Cloud controller API host (without scheme).
    pub api: String,
    pub apps_domain: String,
    /// Front-end TCP router addresses to verify against.
    pub addresses: Vec<String>,
    pub oauth: Option<OAuthConfig>,
    pub include_http_routes: bool,
    /// Pre-existing TCP domain; when set, it is the only front-end address.
    pub tcp_apps_domain: String,
    pub lb_configured: bool,
    pub tcp_router_group: String,
    pub skip_ssl_validation: bool,
    /// Seconds.
    pub default_timeout: i64,
    /// Seconds.
    pub cf_push_timeout: i64,
    /// Seconds.
    pub polling_interval: u64,
    /// Base URL of the TCP router mapping API, if reachable directly.
    pub tcp_router_api: Option<String>,
    /// Base URL of the receptor API used to desire LRPs.
    pub receptor_api: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub token_endpoint: String,
    pub client_name: String,
    pub client_secret: String,
    pub port: u16,
}

/// Timing defaults derived from the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub default: Duration,
    pub cf_push: Duration,
    pub polling_interval: Duration,
}

impl RoutingConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Load from the file named by `$CONFIG`.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load_from_path(path),
            _ => Err(ConfigError::EnvNotSet(CONFIG_ENV)),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        let secs_or_default = |v: i64| {
            if v <= 0 {
                DEFAULT_TIMEOUT_SECS
            } else {
                v as u64
            }
        };
        let polling = if self.polling_interval == 0 {
            DEFAULT_POLLING_INTERVAL_SECS
        } else {
            self.polling_interval
        };
        Timeouts {
            default: Duration::from_secs(secs_or_default(self.default_timeout)),
            cf_push: Duration::from_secs(secs_or_default(self.cf_push_timeout)),
            polling_interval: Duration::from_secs(polling),
        }
    }

    /// Check required fields and derive the routing API URL.
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let oauth = self.oauth.clone().ok_or(ConfigError::Missing("oauth"))?;
        if self.addresses.is_empty() {
            return Err(ConfigError::Missing("'addresses'"));
        }
        if let Some(bad) = self.addresses.iter().find(|a| a.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "addresses",
                reason: format!("empty address {bad:?}"),
            });
        }
        if self.apps_domain.is_empty() {
            return Err(ConfigError::Missing("apps_domain"));
        }
        if self.api.is_empty() {
            return Err(ConfigError::Missing("api"));
        }
        if self.tcp_router_group.is_empty() {
            return Err(ConfigError::Missing("tcp_router_group"));
        }

        let routing_api_url = format!("https://{}", self.api);
        let timeouts = self.timeouts();
        Ok(ValidatedConfig {
            raw: self,
            oauth,
            routing_api_url,
            timeouts,
        })
    }
}

/// A config that passed [`RoutingConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    raw: RoutingConfig,
    oauth: OAuthConfig,
    routing_api_url: String,
    timeouts: Timeouts,
}

impl ValidatedConfig {
    pub fn raw(&self) -> &RoutingConfig {
        &self.raw
    }

    pub fn oauth(&self) -> &OAuthConfig {
        &self.oauth
    }

    pub fn routing_api_url(&self) -> &str {
        &self.routing_api_url
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Front-end hosts to probe: the TCP apps domain if one is configured,
    /// otherwise every router address.
    pub fn router_hosts(&self) -> Vec<String> {
        if self.raw.tcp_apps_domain.is_empty() {
            self.raw.addresses.clone()
        } else {
            vec![self.raw.tcp_apps_domain.clone()]
        }
    }

    /// Verifier tuning derived from the polling interval.
    pub fn verifier_config(&self) -> Result<VerifierConfig, ConfigError> {
        VerifierConfig::builder()
            .poll_interval(self.timeouts.polling_interval)
            .build()
    }
}
