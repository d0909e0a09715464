// observability/tracing_setup.rs - Tracing Configuration

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::error::{PkiError, Result};

/// Tracing output format
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    /// Multi-line, human-readable
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event
    Json,
}

/// Logging settings, read from the `[logging]` table of the PKI
/// configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// `EnvFilter` directives, e.g. `"info,peer_pki::trust=trace"`
    pub filter: String,

    pub format: TracingFormat,

    /// Include the module path of each event
    pub with_target: bool,

    /// Include file and line numbers
    pub with_file: bool,

    /// Colour terminal output; ignored for JSON
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info,peer_pki=debug".into(),
            format: TracingFormat::Pretty,
            with_target: true,
            with_file: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// JSON lines for log shipping; peer IDs appear as structured fields
    pub fn production() -> Self {
        Self {
            filter: "warn,peer_pki=info".into(),
            format: TracingFormat::Json,
            with_ansi: false,
            ..Self::default()
        }
    }

    /// Every hop the assurance search takes, with source locations
    pub fn development() -> Self {
        Self {
            filter: "debug,peer_pki=trace".into(),
            with_file: true,
            ..Self::default()
        }
    }

    /// Parse `filter` into an `EnvFilter`.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| logging_error(format!("invalid logging filter {:?}: {e}", self.filter)))
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_target(self.with_target)
            .with_file(self.with_file)
            .with_line_number(self.with_file);

        match self.format {
            TracingFormat::Pretty => layer.with_ansi(self.with_ansi).boxed(),
            TracingFormat::Compact => layer.compact().with_ansi(self.with_ansi).boxed(),
            TracingFormat::Json => layer.json().with_ansi(false).boxed(),
        }
    }
}

fn logging_error(message: String) -> PkiError {
    PkiError::Config(::config::ConfigError::Message(message))
}

/// Install the global subscriber. `RUST_LOG`, when set and valid, overrides
/// `config.filter`.
///
/// Fails if the filter does not parse or a global subscriber is already set.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.env_filter()?,
    };

    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(filter)
        .try_init()
        .map_err(|e| logging_error(format!("tracing already initialized: {e}")))?;

    tracing::info!(filter = %config.filter, format = ?config.format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let production = TracingConfig::production();
        assert_eq!(production.format, TracingFormat::Json);
        assert!(!production.with_ansi);
        assert!(production.with_target);

        let development = TracingConfig::development();
        assert_eq!(development.format, TracingFormat::Pretty);
        assert!(development.with_file);
    }

    #[test]
    fn test_env_filter_keeps_crate_directive() {
        let filter = TracingConfig::development().env_filter().unwrap();
        assert!(filter.to_string().contains("peer_pki=trace"));
    }

    #[test]
    fn test_bad_filter_is_config_error() {
        let config = TracingConfig {
            filter: "peer_pki=loud".into(),
            ..TracingConfig::default()
        };
        assert!(matches!(config.env_filter(), Err(PkiError::Config(_))));
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = TracingConfig {
            filter: "off".into(),
            format: TracingFormat::Compact,
            ..TracingConfig::default()
        };
        // Another test may already have installed a subscriber
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
