use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "rules.db";

/// Environment variable overriding the configured database path.
pub const DB_ENV_VAR: &str = "RULES_REPOSITORY_DB";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// SQLite file backing the node store. `None` uses the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Name of the package that is guaranteed to exist.
    pub default_package: String,
    /// SQLite journal mode for file databases.
    pub journal_mode: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            default_package: crate::repository::DEFAULT_PACKAGE.to_string(),
            journal_mode: "WAL".to_string(),
        }
    }
}

impl RepositoryConfig {
    /// Load configuration from the user's config directory.
    /// Returns default config if the file doesn't exist or fails to parse.
    pub fn load() -> Self {
        let mut config = match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {}", e);
                Self::default()
            }
        };
        if let Ok(path) = std::env::var(DB_ENV_VAR) {
            config.database_path = Some(PathBuf::from(path));
        }
        config
    }

    fn try_load() -> Result<Self> {
        let config_path = config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&config_path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save the configuration to the user's config directory.
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = config_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Database path, resolving the platform data directory when unset.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join(DATABASE_FILE)),
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "rules-repository")
        .ok_or_else(|| Error::Store("Could not determine data directory".to_string()))
}

fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
}
