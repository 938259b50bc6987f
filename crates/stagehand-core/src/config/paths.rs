//! Config path resolution helpers.

use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "stagehand.toml";

/// Which stagehand.toml a command reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    /// Per-user settings under the platform config directory
    Global,
    /// Settings checked in next to the project
    Project,
}

pub fn config_path_for_scope(scope: ConfigScope, global_dir: &Path, project_root: &Path) -> PathBuf {
    match scope {
        ConfigScope::Global => global_dir.join(CONFIG_FILE),
        ConfigScope::Project => project_root.join(CONFIG_FILE),
    }
}
