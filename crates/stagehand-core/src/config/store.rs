//! Config store for loading and saving stagehand.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::paths::{ConfigScope, config_path_for_scope};
use super::{StagehandConfig, parser};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(scope: ConfigScope, global_dir: &Path, project_root: &Path) -> Self {
        Self {
            config_path: config_path_for_scope(scope, global_dir, project_root),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the file, or an empty config when it does not exist.
    pub fn load(&self) -> anyhow::Result<StagehandConfig> {
        if !self.config_path.exists() {
            return Ok(StagehandConfig::new());
        }
        parser::parse_stagehand_toml(&self.config_path)
    }

    pub fn save(&self, config: &StagehandConfig) -> anyhow::Result<()> {
        let content = parser::to_toml(config)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!("Failed to write config file: {}", self.config_path.display())
        })?;
        Ok(())
    }
}

/// `<platform config dir>/stagehand`
pub fn global_config_dir() -> anyhow::Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("stagehand"))
}
