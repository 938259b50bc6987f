//! Registered upgrades stored under `upgrade/{name}/manifest.json`.

use tracing::{debug, info};

use super::Upgrade;
use crate::store::{EntryKind, StoreError, Transaction, paths};

/// Read/write access to the upgrade catalog inside a transaction.
pub struct UpgradeCatalog;

impl UpgradeCatalog {
    /// Every registered upgrade, sorted by name.
    pub fn load(txn: &mut Transaction<'_>) -> Result<Vec<Upgrade>, StoreError> {
        let mut upgrades = Vec::new();
        for entry in txn.directory_listing(paths::upgrades_dir())? {
            if entry.kind != EntryKind::Dir {
                continue;
            }
            match Self::find(txn, &entry.name)? {
                Some(upgrade) => upgrades.push(upgrade),
                None => debug!(dir = %entry.name, "upgrade directory without manifest"),
            }
        }
        upgrades.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(upgrades)
    }

    pub fn find(txn: &mut Transaction<'_>, name: &str) -> Result<Option<Upgrade>, StoreError> {
        let doc = txn.optional_document(&paths::upgrade_manifest(name))?;
        if !doc.exists() {
            return Ok(None);
        }
        doc.value().map(Some)
    }

    /// Stage `upgrade`, replacing any earlier registration of the same name.
    pub fn register(txn: &mut Transaction<'_>, upgrade: &Upgrade) -> Result<(), StoreError> {
        info!(upgrade = %upgrade.name, from = %upgrade.from, to = %upgrade.to, "registering upgrade");
        txn.write(&paths::upgrade_manifest(&upgrade.name), upgrade)
    }
}
