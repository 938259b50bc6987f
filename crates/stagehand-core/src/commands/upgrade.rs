//! Upgrade commands: register templates and explore upgrade paths.

use std::path::Path;

use semver::Version;
use serde::Serialize;

use crate::environment;
use crate::store::{DocumentStore, Transaction};
use crate::upgrade::{PathChoice, Upgrade, UpgradeCatalog, choose_path, find_upgrade_paths};

/// Result of `upgrade register`
#[derive(Debug, Clone, Serialize)]
pub struct RegisterReport {
    pub name: String,
    pub from: String,
    pub to: Version,
    pub phases: usize,
    /// An upgrade of the same name was already registered
    pub replaced: bool,
}

/// One line of `upgrade list`
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeEntry {
    pub name: String,
    pub from: String,
    pub to: Version,
    pub phases: usize,
}

impl From<&Upgrade> for UpgradeEntry {
    fn from(upgrade: &Upgrade) -> Self {
        Self {
            name: upgrade.name.clone(),
            from: upgrade.from.to_string(),
            to: upgrade.to.clone(),
            phases: upgrade.phases.len(),
        }
    }
}

/// Result of `upgrade paths`
#[derive(Debug, Clone, Serialize)]
pub struct PathsReport {
    pub env: String,
    pub from: Version,
    pub to: Version,
    pub paths: Vec<Vec<String>>,
    /// The path `deploy run --to` would take without prompting
    pub chosen: Option<Vec<String>>,
}

pub struct UpgradeCommand<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> UpgradeCommand<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Read `upgrade.json` from `dir` and store it in the catalog.
    pub fn register(&self, dir: &Path) -> anyhow::Result<RegisterReport> {
        let upgrade = Upgrade::from_dir(dir)?;
        let mut txn = Transaction::begin(self.store)?;
        let replaced = UpgradeCatalog::find(&mut txn, &upgrade.name)?.is_some();
        UpgradeCatalog::register(&mut txn, &upgrade)?;
        txn.commit(&format!(
            "register upgrade {} ({} -> {})",
            upgrade.name, upgrade.from, upgrade.to
        ))?;
        Ok(RegisterReport {
            name: upgrade.name.clone(),
            from: upgrade.from.to_string(),
            to: upgrade.to.clone(),
            phases: upgrade.phases.len(),
            replaced,
        })
    }

    pub fn list(&self) -> anyhow::Result<Vec<UpgradeEntry>> {
        let mut txn = Transaction::begin(self.store)?;
        Ok(UpgradeCatalog::load(&mut txn)?
            .iter()
            .map(UpgradeEntry::from)
            .collect())
    }

    /// All upgrade paths from `env`'s deployed version to `to`.
    pub fn paths(&self, env: &str, to: &Version) -> anyhow::Result<PathsReport> {
        let mut txn = Transaction::begin(self.store)?;
        let manifest = environment::load(&mut txn, env)?;
        let catalog = UpgradeCatalog::load(&mut txn)?;
        let paths = find_upgrade_paths(&manifest.deployed_version, to, &catalog);
        let chosen = match choose_path(&paths) {
            PathChoice::Unique(path) => Some(path),
            PathChoice::Ambiguous(_) | PathChoice::Unreachable => None,
        };
        Ok(PathsReport {
            env: env.to_string(),
            from: manifest.deployed_version,
            to: to.clone(),
            paths,
            chosen,
        })
    }
}
