//! Deploy commands: run, status, cancel and lock inspection.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Serialize;

use crate::deploy::{Deploy, Driver, DriverError, SegmentMetadata};
use crate::environment;
use crate::lock::{DeployLock, LockRecord};
use crate::store::{DocumentStore, Transaction};
use crate::types::SegmentKind;

/// What `deploy run` should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployTarget {
    /// Continue the active deploy
    Resume,
    /// Start and run one named upgrade
    Upgrade(String),
    /// Run the unique shortest path to a version
    Version(Version),
    /// Run an explicit sequence of upgrades
    Path(Vec<String>),
}

/// Deploys run by one `deploy run`, in order
#[derive(Debug, Clone, Serialize)]
pub struct DeployRunReport {
    pub deploys: Vec<Deploy>,
}

impl DeployRunReport {
    /// The last deploy, which decides how the run ended.
    pub fn last(&self) -> Option<&Deploy> {
        self.deploys.last()
    }
}

/// Per-segment line of `deploy status`
#[derive(Debug, Clone, Serialize)]
pub struct SegmentStatus {
    pub id: usize,
    pub kind: SegmentKind,
    pub filename: String,
    pub current: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatusReport {
    pub env: String,
    pub deployed_version: Version,
    pub deploy: Option<Deploy>,
    pub segments: Vec<SegmentStatus>,
    pub lock: LockRecord,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatusReport {
    pub env: String,
    pub record: LockRecord,
    pub stale: bool,
}

pub struct DeployCommand<'a> {
    store: &'a dyn DocumentStore,
    driver: Driver<'a>,
}

impl<'a> DeployCommand<'a> {
    pub fn new(store: &'a dyn DocumentStore, driver: Driver<'a>) -> Self {
        Self { store, driver }
    }

    pub fn driver(&self) -> &Driver<'a> {
        &self.driver
    }

    /// Run deploys for `env` until they finish, pause or halt.
    pub fn run(&self, env: &str, target: &DeployTarget) -> Result<DeployRunReport, DriverError> {
        let deploys = match target {
            DeployTarget::Resume => vec![self.driver.resume(env)?],
            DeployTarget::Upgrade(upgrade) => self.driver.run_path(env, &[upgrade.clone()])?,
            DeployTarget::Version(version) => {
                let path = self.driver.plan(env, version)?;
                self.driver.run_path(env, &path)?
            }
            DeployTarget::Path(path) => self.driver.run_path(env, path)?,
        };
        Ok(DeployRunReport { deploys })
    }

    pub fn status(&self, env: &str) -> Result<DeployStatusReport, DriverError> {
        let deploy = self.driver.status(env)?;
        let mut txn = Transaction::begin(self.store)?;
        let manifest = environment::load(&mut txn, env)?;
        let lock = DeployLock::new(self.store, env).status()?;
        let segments = deploy.as_ref().map(segment_statuses).unwrap_or_default();
        Ok(DeployStatusReport {
            env: env.to_string(),
            deployed_version: manifest.deployed_version,
            deploy,
            segments,
            lock,
        })
    }

    pub fn cancel(&self, env: &str) -> Result<Deploy, DriverError> {
        self.driver.cancel(env)
    }

    pub fn lock(&self, env: &str, now: DateTime<Utc>) -> Result<LockStatusReport, DriverError> {
        let record = DeployLock::new(self.store, env).status()?;
        Ok(LockStatusReport {
            env: env.to_string(),
            stale: record.is_stale(now.timestamp_millis()),
            record,
        })
    }
}

fn segment_statuses(deploy: &Deploy) -> Vec<SegmentStatus> {
    let current = deploy.segment_index();
    deploy
        .segments
        .iter()
        .map(|segment| SegmentStatus {
            id: segment.id,
            kind: segment.kind,
            filename: segment.filename.clone(),
            current: current == Some(segment.id) && !deploy.phase.is_terminal(),
            summary: summarize(deploy.metadata_at(segment.id)),
        })
        .collect()
}

fn summarize(metadata: Option<&SegmentMetadata>) -> String {
    match metadata {
        None => "pending".to_string(),
        Some(SegmentMetadata::Eoa(eoa)) => {
            let state = if eoa.confirmed { "confirmed" } else { "sent" };
            format!("{} tx(s) {} by {}", eoa.transactions.len(), state, eoa.signer)
        }
        Some(SegmentMetadata::Multisig(multisig)) => {
            if multisig.cancellation_transaction_hash.is_some() {
                format!("proposal on {} rejected", multisig.safe_address)
            } else if multisig.confirmed {
                format!("executed on {}", multisig.safe_address)
            } else if multisig.transaction_hash.is_some() {
                format!("executing on {}", multisig.safe_address)
            } else {
                format!(
                    "proposed to {}{}",
                    multisig.safe_address,
                    multisig
                        .safe_tx_hash
                        .as_deref()
                        .map(|hash| format!(" ({hash})"))
                        .unwrap_or_default()
                )
            }
        }
        Some(SegmentMetadata::Script(script)) => {
            if script.success { "ran" } else { "failed" }.to_string()
        }
    }
}
