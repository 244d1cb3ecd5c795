//! Emitter configuration.
//!
//! Every emitter takes an explicit [`EmitterConfig`] at construction time
//! and treats it as immutable afterwards. A process-wide default
//! configuration can be installed exactly once with [`set_default_config`];
//! [`EmitterConfig::default`] reads it, falling back to `localhost:6379`
//! with no credential. Install defaults before constructing the first
//! emitter that relies on them -- once installed they are read-only.

use std::sync::OnceLock;

use fred::prelude::*;
use serde::Deserialize;

use crate::error::EmitterError;

/// Process-wide default configuration, installed at most once.
static DEFAULTS: OnceLock<EmitterConfig> = OnceLock::new();

/// Connection settings for one emitter.
///
/// Environment variables override individual fields when
/// [`apply_env_overrides`](Self::apply_env_overrides) is called:
/// `REDIS_EVENTS_HOST`, `REDIS_EVENTS_PORT`, `REDIS_EVENTS_AUTH`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmitterConfig {
    /// Broker hostname.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional AUTH credential, applied at connection time.
    #[serde(default)]
    pub credential: Option<String>,
}

impl Default for EmitterConfig {
    /// Returns the process-wide defaults installed via
    /// [`set_default_config`], or the built-in `localhost:6379` fallback.
    fn default() -> Self {
        DEFAULTS.get().cloned().unwrap_or_else(builtin_defaults)
    }
}

impl EmitterConfig {
    /// Replace the broker hostname.
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_owned();
        self
    }

    /// Replace the broker port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the AUTH credential.
    #[must_use]
    pub fn with_credential(mut self, credential: &str) -> Self {
        self.credential = Some(credential.to_owned());
        self
    }

    /// Override fields from the environment when set.
    ///
    /// This lets a deployment point an already-configured binary at a
    /// different broker without touching application code. A
    /// `REDIS_EVENTS_PORT` value that does not parse as a port number is
    /// ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("REDIS_EVENTS_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("REDIS_EVENTS_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("REDIS_EVENTS_AUTH") {
            self.credential = Some(val);
        }
    }

    /// Build the client configuration for one broker connection.
    pub(crate) fn client_config(&self) -> Config {
        let mut config = Config::default();
        config.server = ServerConfig::new_centralized(self.host.clone(), self.port);
        config.password = self.credential.clone();
        config
    }
}

/// Install the process-wide default configuration.
///
/// Call once at startup, before constructing the first emitter that uses
/// [`EmitterConfig::default`].
///
/// # Errors
///
/// Returns [`EmitterError::Config`] if defaults were already installed.
pub fn set_default_config(config: EmitterConfig) -> Result<(), EmitterError> {
    DEFAULTS
        .set(config)
        .map_err(|_| EmitterError::Config("default configuration already installed".to_owned()))
}

fn builtin_defaults() -> EmitterConfig {
    EmitterConfig {
        host: default_host(),
        port: default_port(),
        credential: None,
    }
}

fn default_host() -> String {
    "localhost".to_owned()
}

const fn default_port() -> u16 {
    6379
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults_match_broker_convention() {
        // Deserializing an empty document exercises the per-field defaults
        // without touching the process-wide singleton.
        let config: EmitterConfig =
            serde_json::from_str("{}").unwrap_or_else(|_| builtin_defaults().with_port(0));
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 6379);
        assert_eq!(config.credential, None);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = builtin_defaults()
            .with_host("redis.internal")
            .with_port(6380)
            .with_credential("hunter2");
        assert_eq!(config.host, "redis.internal");
        assert_eq!(config.port, 6380);
        assert_eq!(config.credential.as_deref(), Some("hunter2"));
    }

    #[test]
    fn absent_env_overrides_leave_fields_alone() {
        let mut config = builtin_defaults().with_host("configured");
        config.apply_env_overrides();
        assert_eq!(config.host, "configured");
        assert_eq!(config.port, 6379);
    }

    #[test]
    fn deserialize_partial_document() {
        let config: Result<EmitterConfig, _> =
            serde_json::from_str(r#"{"host": "broker", "credential": "secret"}"#);
        let config = config.unwrap_or_else(|_| builtin_defaults());
        assert_eq!(config.host, "broker");
        assert_eq!(config.port, 6379);
        assert_eq!(config.credential.as_deref(), Some("secret"));
    }

    #[test]
    fn default_config_can_only_be_installed_once() {
        let first = set_default_config(builtin_defaults().with_host("first"));
        let second = set_default_config(builtin_defaults().with_host("second"));

        // Exactly one install wins regardless of test interleaving.
        assert!(first.is_ok() || second.is_err());
        assert!(second.is_err(), "second install must be rejected");
        assert_eq!(EmitterConfig::default().host, "first");
    }
}
