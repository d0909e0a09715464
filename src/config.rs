// config.rs - PKI Configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::observability::{init_tracing, TracingConfig};

/// Environment variable prefix, e.g. `PEER_PKI__FIRST_ENCOUNTER=true`
pub const ENV_PREFIX: &str = "PEER_PKI";

/// PKI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    /// Transport channel holding stored certificates
    pub certificate_channel: String,

    /// Transport channel carrying unstored credential messages
    pub credential_channel: String,

    /// Send our credential to newly reachable peers that have not
    /// certified us yet
    pub first_encounter: bool,

    /// Prefix for every key written to the extra-data store
    pub extra_data_prefix: String,

    /// Directory for the on-disk extra-data store; in-memory when unset
    pub data_dir: Option<PathBuf>,

    /// Subscriber settings applied by [`PkiConfig::init_logging`]
    pub logging: TracingConfig,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            certificate_channel: "pki.certificates".into(),
            credential_channel: "pki.credentials".into(),
            first_encounter: false,
            extra_data_prefix: "pki.".into(),
            data_dir: None,
            logging: TracingConfig::default(),
        }
    }
}

impl PkiConfig {
    /// Load defaults, then `path` if it exists (format from its extension),
    /// then `PEER_PKI__*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Install the global tracing subscriber from the `[logging]` table.
    pub fn init_logging(&self) -> Result<()> {
        init_tracing(&self.logging)
    }

    /// Full extra-data key for `name`
    pub fn extra_key(&self, name: &str) -> String {
        format!("{}{}", self.extra_data_prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::TracingFormat;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PkiConfig::default();
        assert_eq!(config.certificate_channel, "pki.certificates");
        assert_eq!(config.credential_channel, "pki.credentials");
        assert!(!config.first_encounter);
        assert_eq!(config.extra_key("roster"), "pki.roster");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PkiConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.certificate_channel, "pki.certificates");
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pki.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "first_encounter = true\ncredential_channel = \"creds\"\n\n[logging]\nformat = \"json\"\nfilter = \"warn,peer_pki=trace\"\nwith_ansi = false"
        )
        .unwrap();

        let config = PkiConfig::load(&path).unwrap();
        assert!(config.first_encounter);
        assert_eq!(config.credential_channel, "creds");
        assert_eq!(config.certificate_channel, "pki.certificates");
        assert_eq!(config.logging.format, TracingFormat::Json);
        assert!(!config.logging.with_ansi);
        assert!(config.logging.with_target);

        let filter = config.logging.env_filter().unwrap();
        assert!(filter.to_string().contains("peer_pki=trace"));
    }

    #[test]
    fn test_bad_logging_filter_fails_init() {
        let config = PkiConfig {
            logging: crate::observability::TracingConfig {
                filter: "peer_pki=loud".into(),
                ..Default::default()
            },
            ..PkiConfig::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(config.init_logging(), Err(crate::PkiError::Config(_))));
        }
    }
}
