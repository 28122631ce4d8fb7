//! Tracing subscriber setup for host applications.
//!
//! The library only emits `tracing` events. Hosts that have no subscriber of
//! their own call [`init_tracing`] once at startup.

use quarry_core::ConfigError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str =
    "quarry_core=info,quarry_storage=info,quarry_remote=info,quarry_resolver=info,warn";

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives. `RUST_LOG` wins when set.
    pub filter: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Create from environment variables.
    ///
    /// Environment variables:
    /// - `QUARRY_LOG`: filter directives (default: info for the quarry crates, warn elsewhere)
    /// - `QUARRY_LOG_FORMAT`: `json` for JSON lines, anything else for text
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            filter: lookup("QUARRY_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            json: lookup("QUARRY_LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter).map_err(|e| ConfigError::InvalidValue {
                field: "filter".to_string(),
                value: self.filter.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if the filter does not parse or a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let env_filter = config.env_filter()?;
    let (json_layer, text_layer) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "telemetry".to_string(),
            value: "global subscriber".to_string(),
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::info!(json = config.json, filter = %config.filter, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, TelemetryConfig::default());
        assert!(!config.json);
    }

    #[test]
    fn test_from_lookup() {
        let config = TelemetryConfig::from_lookup(lookup_from(&[
            ("QUARRY_LOG", "quarry=debug"),
            ("QUARRY_LOG_FORMAT", "JSON"),
        ]));
        assert_eq!(config.filter, "quarry=debug");
        assert!(config.json);
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
