//! Named deployment targets and their manifests.

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::{EntryKind, StoreError, Transaction, paths};
use crate::types::DeployedContract;

/// Contracts known to an environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractRegistry {
    /// Singletons keyed by contract name; a redeploy replaces the entry.
    #[serde(rename = "static", default)]
    pub singletons: BTreeMap<String, DeployedContract>,
    #[serde(default)]
    pub instances: Vec<DeployedContract>,
}

impl ContractRegistry {
    /// Fold one deployment record in.
    pub fn record(&mut self, contract: DeployedContract) {
        if contract.singleton {
            self.singletons.insert(contract.contract.clone(), contract);
        } else {
            self.instances.push(contract);
        }
    }

    /// Current address of a singleton.
    pub fn address_of(&self, name: &str) -> Option<&str> {
        self.singletons.get(name).map(|c| c.address.as_str())
    }
}

/// `environment/{env}/manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentManifest {
    pub id: String,
    pub chain_id: u64,
    pub deployed_version: Version,
    #[serde(default)]
    pub contracts: ContractRegistry,
    #[serde(default)]
    pub latest_deployed_commit: String,
}

impl EnvironmentManifest {
    pub fn new(id: impl Into<String>, chain_id: u64, deployed_version: Version) -> Self {
        Self {
            id: id.into(),
            chain_id,
            deployed_version,
            contracts: ContractRegistry::default(),
            latest_deployed_commit: String::new(),
        }
    }
}

/// `environment/{env}/deploys/deploys.json`: pointer to the running deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_progress_deploy: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("environment '{0}' does not exist")]
    Missing(String),

    #[error("environment '{0}' already exists")]
    Exists(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Load an environment manifest, failing when it was never created.
pub fn load(txn: &mut Transaction<'_>, env: &str) -> Result<EnvironmentManifest, EnvironmentError> {
    let doc = txn.optional_document(&paths::environment_manifest(env))?;
    if !doc.exists() && !doc.is_dirty() {
        return Err(EnvironmentError::Missing(env.to_string()));
    }
    Ok(doc.value()?)
}

/// Stage a new environment.
pub fn create(
    txn: &mut Transaction<'_>,
    manifest: &EnvironmentManifest,
) -> Result<(), EnvironmentError> {
    let path = paths::environment_manifest(&manifest.id);
    if txn.optional_document(&path)?.exists() {
        return Err(EnvironmentError::Exists(manifest.id.clone()));
    }
    info!(env = %manifest.id, chain_id = manifest.chain_id, version = %manifest.deployed_version, "creating environment");
    txn.write(&path, manifest)?;
    txn.write(&paths::deploy_manifest(&manifest.id), &DeployManifest::default())?;
    Ok(())
}

/// Names of every environment with a manifest.
pub fn list(txn: &mut Transaction<'_>) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    for entry in txn.directory_listing(paths::environments_dir())? {
        if entry.kind == EntryKind::Dir
            && txn
                .optional_document(&paths::environment_manifest(&entry.name))?
                .exists()
        {
            names.push(entry.name);
        }
    }
    names.sort();
    Ok(names)
}

/// Name of the deploy currently running in `env`, if any.
pub fn active_deploy(txn: &mut Transaction<'_>, env: &str) -> Result<Option<String>, StoreError> {
    let manifest: DeployManifest = txn.read_or_default(&paths::deploy_manifest(env))?;
    Ok(manifest.in_progress_deploy.filter(|name| !name.is_empty()))
}

/// Point `env` at `deploy`, or clear the pointer with `None`.
pub fn set_active_deploy(
    txn: &mut Transaction<'_>,
    env: &str,
    deploy: Option<&str>,
) -> Result<(), StoreError> {
    txn.write(
        &paths::deploy_manifest(env),
        &DeployManifest {
            in_progress_deploy: deploy.map(str::to_string),
        },
    )
}
