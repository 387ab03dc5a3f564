//! Configuration loading
//!
//! Resolution order for the config file:
//! 1. Explicit path (`--config`)
//! 2. `BULK_USER_IMPORT_CONFIG` environment variable
//! 3. `<config_dir>/bulk-user-import/config.toml`
//! 4. Built-in defaults
//!
//! Command-line flags are applied on top by the binary.

use crate::error::{ImportError, Result};
use crate::metadata::MetadataColumns;
use crate::password::DEFAULT_ITERATIONS;
use crate::reconciler::RowReconciler;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "BULK_USER_IMPORT_CONFIG";

const APP_DIR: &str = "bulk-user-import";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// SQLite database holding users, profiles, and events
    pub database_path: PathBuf,
    /// PBKDF2 rounds for newly hashed passwords
    pub hash_iterations: u32,
    pub dry_run: bool,
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataConfig {
    /// Extra column name → canonical org key
    pub aliases: BTreeMap<String, String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            database_path: PathBuf::from("bulk_user_import.db"),
            hash_iterations: DEFAULT_ITERATIONS,
            dry_run: false,
            metadata: MetadataConfig::default(),
        }
    }
}

impl ImportConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ImportConfig =
            toml::from_str(content).map_err(|e| ImportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ImportError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Locate and load the config file, or fall back to defaults.
    ///
    /// An explicitly named file (argument or env) must exist; the per-user
    /// file is optional.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        Self::resolve_from(cli_path, std::env::var(CONFIG_ENV).ok(), default_config_path())
    }

    /// `resolve` with its environment lookups supplied by the caller
    pub fn resolve_from(
        cli_path: Option<&Path>,
        env_path: Option<String>,
        user_path: Option<PathBuf>,
    ) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load(path);
        }

        if let Some(path) = env_path {
            if !path.trim().is_empty() {
                return Self::load(Path::new(&path));
            }
        }

        if let Some(path) = user_path {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(ImportConfig::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.hash_iterations == 0 {
            return Err(ImportError::Config("hash_iterations must be at least 1".to_string()));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ImportError::Config("database_path must not be empty".to_string()));
        }
        self.metadata_columns()?;
        Ok(())
    }

    pub fn metadata_columns(&self) -> Result<MetadataColumns> {
        MetadataColumns::with_aliases(&self.metadata.aliases)
    }

    pub fn reconciler(&self) -> Result<RowReconciler> {
        Ok(RowReconciler::with_columns(self.metadata_columns()?))
    }
}

/// Per-user config file location, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::ImportRow;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ImportConfig::default();
        assert_eq!(config.hash_iterations, DEFAULT_ITERATIONS);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ImportConfig::from_toml("dry_run = true\n").unwrap();
        assert!(config.dry_run);
        assert_eq!(config.database_path, PathBuf::from("bulk_user_import.db"));
    }

    #[test]
    fn test_full_file() {
        let config = ImportConfig::from_toml(
            r#"
            database_path = "/var/lib/users.db"
            hash_iterations = 1000

            [metadata.aliases]
            "Dealer Code" = "dealer_id"
            "Area Sales Manager" = "asm_1"
            "#,
        )
        .unwrap();

        assert_eq!(config.hash_iterations, 1000);
        assert_eq!(config.metadata.aliases.len(), 2);

        let row = ImportRow::from_pairs(2, [("username", "u"), ("area sales manager", "Ravi")]);
        let patch = config.metadata_columns().unwrap().extract(&row);
        assert_eq!(patch.get("asm_1"), Some("Ravi"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ImportConfig::from_toml("hash_iterations = 0").is_err());
        assert!(ImportConfig::from_toml("[metadata.aliases]\nZone = \"zone\"").is_err());
        assert!(ImportConfig::from_toml("[metadata.aliases]\ncity = \"state\"").is_err());
        assert!(ImportConfig::from_toml("unknown_key = 1").is_err());
        assert!(ImportConfig::from_toml("hash_iterations = \"many\"").is_err());
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "hash_iterations = 42\n").unwrap();

        let config = ImportConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.hash_iterations, 42);
    }

    fn write_config(dir: &TempDir, name: &str, iterations: u32) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("hash_iterations = {}\n", iterations)).unwrap();
        path
    }

    #[test]
    fn test_explicit_path_beats_env_and_user_file() {
        let dir = TempDir::new().unwrap();
        let cli = write_config(&dir, "cli.toml", 1);
        let env = write_config(&dir, "env.toml", 2);
        let user = write_config(&dir, "user.toml", 3);

        let config = ImportConfig::resolve_from(
            Some(&cli),
            Some(env.display().to_string()),
            Some(user),
        )
        .unwrap();
        assert_eq!(config.hash_iterations, 1);
    }

    #[test]
    fn test_env_beats_user_file() {
        let dir = TempDir::new().unwrap();
        let env = write_config(&dir, "env.toml", 2);
        let user = write_config(&dir, "user.toml", 3);

        let config =
            ImportConfig::resolve_from(None, Some(env.display().to_string()), Some(user)).unwrap();
        assert_eq!(config.hash_iterations, 2);
    }

    #[test]
    fn test_blank_env_falls_through_to_user_file() {
        let dir = TempDir::new().unwrap();
        let user = write_config(&dir, "user.toml", 3);

        let config = ImportConfig::resolve_from(None, Some("   ".to_string()), Some(user)).unwrap();
        assert_eq!(config.hash_iterations, 3);
    }

    #[test]
    fn test_env_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml").display().to_string();

        let err = ImportConfig::resolve_from(None, Some(missing), None).unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }

    #[test]
    fn test_missing_user_file_gives_defaults() {
        let dir = TempDir::new().unwrap();

        let config =
            ImportConfig::resolve_from(None, None, Some(dir.path().join("config.toml"))).unwrap();
        assert_eq!(config, ImportConfig::default());

        let config = ImportConfig::resolve_from(None, None, None).unwrap();
        assert_eq!(config, ImportConfig::default());
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let dir = TempDir::new().unwrap();
        let err = ImportConfig::resolve(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }
}
