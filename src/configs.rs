use crate::error::{Result, VaultError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Run mode; picks the default log filter when RUST_LOG is unset.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Release,
    Debug,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: Mode,
    pub dsn: String,
    #[serde(default = "default_listen_addresses")]
    pub listen_addresses: Vec<String>,
    #[serde(default)]
    pub migration: MigrationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MigrationConfig {
    #[serde(default = "default_migration_base_path")]
    pub base_path: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            base_path: default_migration_base_path(),
        }
    }
}

fn default_listen_addresses() -> Vec<String> {
    vec!["127.0.0.1:8080".to_string()]
}

fn default_migration_base_path() -> PathBuf {
    PathBuf::from("migrations")
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path).map_err(|e| {
            VaultError::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&config_str)
            .map_err(|e| VaultError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load configuration with the default path (config.yaml).
    pub fn load() -> Result<Self> {
        Self::from_file(Path::new("config.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: AppConfig = serde_yaml::from_str("dsn: \"sqlite://vault.db\"").unwrap();
        assert_eq!(config.mode, Mode::Release);
        assert_eq!(config.dsn, "sqlite://vault.db");
        assert_eq!(config.listen_addresses, vec!["127.0.0.1:8080"]);
        assert_eq!(config.migration.base_path, PathBuf::from("migrations"));
    }

    #[test]
    fn test_full_config_parses() {
        let yaml = r#"
mode: debug
dsn: "sqlite://custom.db"
listen_addresses:
  - "0.0.0.0:8080"
  - "127.0.0.1:9090"
migration:
  base_path: "db/migrations"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, Mode::Debug);
        assert_eq!(config.listen_addresses.len(), 2);
        assert_eq!(config.migration.base_path, PathBuf::from("db/migrations"));
    }

    #[test]
    fn test_missing_dsn_is_an_error() {
        assert!(serde_yaml::from_str::<AppConfig>("mode: release").is_err());
    }
}
