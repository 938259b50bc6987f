//! Upgrade templates, their catalog and path resolution.

pub mod catalog;
pub mod range;
pub mod resolver;

use std::path::Path;

use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use catalog::UpgradeCatalog;
pub use range::VersionRange;
pub use resolver::{PathChoice, choose_path, find_upgrade_paths};

use crate::types::SegmentKind;

/// File an upgrade directory must contain.
pub const UPGRADE_FILE: &str = "upgrade.json";

/// One step of an upgrade template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradePhase {
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// A registered upgrade: which versions it applies to, what it produces and
/// the ordered steps that get there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upgrade {
    pub name: String,
    pub from: VersionRange,
    pub to: Version,
    #[serde(default)]
    pub phases: Vec<UpgradePhase>,
    #[serde(default)]
    pub commit: String,
}

impl Upgrade {
    /// Load `upgrade.json` from an upgrade directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let file = dir.join(UPGRADE_FILE);
        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read upgrade file: {}", file.display()))?;
        let upgrade: Upgrade = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse upgrade file: {}", file.display()))?;
        upgrade.validate(dir)?;
        Ok(upgrade)
    }

    /// Check the template is usable from `dir`.
    pub fn validate(&self, dir: &Path) -> Result<()> {
        if self.name.trim().is_empty() || self.name.contains(['/', '\\']) {
            anyhow::bail!("Upgrade name '{}' is not a valid directory name", self.name);
        }
        for (index, phase) in self.phases.iter().enumerate() {
            if phase.kind == SegmentKind::System {
                continue;
            }
            if phase.filename.trim().is_empty() {
                anyhow::bail!("Phase {} of upgrade '{}' has no filename", index, self.name);
            }
            let script = dir.join(&phase.filename);
            if !script.exists() {
                tracing::warn!(
                    upgrade = %self.name,
                    script = %script.display(),
                    "phase script is missing; the segment will be skipped"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_upgrade_directory() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        std::fs::write(tmp.path().join("00_deploy.s.sol"), "").unwrap();
        std::fs::write(
            tmp.path().join(UPGRADE_FILE),
            r#"{
                "name": "v1.1",
                "from": ">=1.0.0 <1.1.0",
                "to": "1.1.0",
                "phases": [{"type": "eoa", "filename": "00_deploy.s.sol"}],
                "commit": "abc123"
            }"#,
        )
        .unwrap();

        let upgrade = Upgrade::from_dir(tmp.path()).unwrap();
        assert_eq!(upgrade.name, "v1.1");
        assert_eq!(upgrade.to, Version::new(1, 1, 0));
        assert!(upgrade.from.matches(&Version::new(1, 0, 4)));
        assert_eq!(upgrade.phases[0].kind, SegmentKind::Eoa);
    }

    #[test]
    fn rejects_path_like_names() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        std::fs::write(
            tmp.path().join(UPGRADE_FILE),
            r#"{"name": "../escape", "from": "*", "to": "1.0.0"}"#,
        )
        .unwrap();
        assert!(Upgrade::from_dir(tmp.path()).is_err());
    }
}
