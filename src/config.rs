//! Workspace configuration for xformshift

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-workspace state directory
pub const STATE_DIR: &str = ".xformshift";

/// Configuration for a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Database file name inside the state directory
    #[serde(default = "default_database")]
    pub database: String,

    /// Snapshot schema and answers before every migration
    #[serde(default = "default_backup_first")]
    pub backup_first: bool,

    /// Maximum number of backups kept per form (unlimited when unset)
    #[serde(default)]
    pub keep_backups: Option<usize>,
}

fn default_database() -> String {
    "forms.db".to_string()
}

fn default_backup_first() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            backup_first: default_backup_first(),
            keep_backups: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the workspace or return defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(STATE_DIR).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: EngineConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the workspace
    pub fn save(&self, root: &Path) -> Result<()> {
        let state_dir = root.join(STATE_DIR);
        std::fs::create_dir_all(&state_dir)?;

        let config_path = state_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Full path of the database file
    pub fn database_path(&self, root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(&self.database)
    }
}
