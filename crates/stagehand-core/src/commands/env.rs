//! Environment commands: create, inspect and list.

use semver::Version;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::environment::{self, EnvironmentManifest};
use crate::store::{DocumentStore, Transaction, paths};

/// Options for `env new`
#[derive(Debug, Clone)]
pub struct NewEnvOptions {
    pub name: String,
    pub chain_id: u64,
    /// Version the environment starts at
    pub version: Version,
}

impl NewEnvOptions {
    pub fn new(name: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            chain_id,
            version: Version::new(0, 0, 0),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }
}

/// Everything known about one environment
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvReport {
    pub manifest: EnvironmentManifest,
    pub in_progress_deploy: Option<String>,
    pub parameters: Map<String, Value>,
}

/// One line of `env list`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSummary {
    pub name: String,
    pub chain_id: u64,
    pub deployed_version: Version,
    pub in_progress_deploy: Option<String>,
}

pub struct EnvCommand<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> EnvCommand<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Create an environment and commit it.
    pub fn create(&self, options: &NewEnvOptions) -> anyhow::Result<EnvironmentManifest> {
        if options.name.trim().is_empty() || options.name.contains(['/', '\\']) {
            anyhow::bail!("Environment name '{}' is not valid", options.name);
        }
        let manifest =
            EnvironmentManifest::new(&options.name, options.chain_id, options.version.clone());
        let mut txn = Transaction::begin(self.store)?;
        environment::create(&mut txn, &manifest)?;
        txn.commit(&format!(
            "[{}] create environment on chain {} at {}",
            manifest.id, manifest.chain_id, manifest.deployed_version
        ))?;
        Ok(manifest)
    }

    pub fn show(&self, name: &str) -> anyhow::Result<EnvReport> {
        let mut txn = Transaction::begin(self.store)?;
        let manifest = environment::load(&mut txn, name)?;
        let in_progress_deploy = environment::active_deploy(&mut txn, name)?;
        let parameters = txn.read_or_default(&paths::parameters(name))?;
        Ok(EnvReport {
            manifest,
            in_progress_deploy,
            parameters,
        })
    }

    pub fn list(&self) -> anyhow::Result<Vec<EnvSummary>> {
        let mut txn = Transaction::begin(self.store)?;
        let mut summaries = Vec::new();
        for name in environment::list(&mut txn)? {
            let manifest = environment::load(&mut txn, &name)?;
            summaries.push(EnvSummary {
                in_progress_deploy: environment::active_deploy(&mut txn, &name)?,
                chain_id: manifest.chain_id,
                deployed_version: manifest.deployed_version,
                name,
            });
        }
        Ok(summaries)
    }
}
