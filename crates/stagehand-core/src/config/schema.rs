//! Schema for stagehand.toml
//!
//! Every setting is optional so that a project file only needs the keys it
//! overrides; defaults are applied by the accessor methods.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::deploy::PollPolicy;

/// Top-level stagehand.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagehandConfig {
    /// Directory holding one sub-directory of scripts per upgrade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrades_dir: Option<PathBuf>,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub lock: LockSection,

    #[serde(default)]
    pub poll: PollSection,

    #[serde(default)]
    pub runner: RunnerSection,

    #[serde(default)]
    pub chain: ChainSection,

    #[serde(default)]
    pub multisig: MultisigSection,

    /// EOA signers, keyed by the id used with `--signer`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signers: BTreeMap<String, SignerEntry>,
}

/// Where deploy state is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Git,
    Fs,
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<StoreBackend>,

    /// Repository or directory path, relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Branch holding state (git backend only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,

    /// Identity recorded as lock holder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerSection {
    /// Program and arguments; the script path is appended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Separate command for test runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultisigSection {
    /// Safe transaction service base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<Url>,

    /// Account the runner proposes as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer: Option<String>,
}

/// One EOA signer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignerEntry {
    /// What the runner signs as: keystore name, hardware path or address
    pub account: String,
}

impl StagehandConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.store.backend.unwrap_or(StoreBackend::Git)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| match self.store_backend() {
            StoreBackend::Git => PathBuf::from(".stagehand/state.git"),
            StoreBackend::Fs | StoreBackend::Memory => PathBuf::from(".stagehand/state"),
        })
    }

    pub fn store_branch(&self) -> &str {
        self.store.branch.as_deref().unwrap_or("main")
    }

    pub fn upgrades_dir(&self) -> PathBuf {
        self.upgrades_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("upgrades"))
    }

    pub fn lock_ttl(&self) -> TimeDelta {
        self.lock
            .ttl_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(crate::lock::DEFAULT_TTL)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        let default = PollPolicy::default();
        PollPolicy {
            attempts: self.poll.attempts.unwrap_or(default.attempts),
            delay: self
                .poll
                .delay_secs
                .map(Duration::from_secs)
                .unwrap_or(default.delay),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock.ttl_secs == Some(0) {
            anyhow::bail!("[lock] ttl_secs must be greater than zero");
        }
        if self.poll.attempts == Some(0) {
            anyhow::bail!("[poll] attempts must be greater than zero");
        }
        if let Some(command) = &self.runner.command {
            if command.is_empty() {
                anyhow::bail!("[runner] command must name a program");
            }
        }
        if let Some(command) = &self.runner.test_command {
            if command.is_empty() {
                anyhow::bail!("[runner] test_command must name a program");
            }
        }
        for (id, signer) in &self.signers {
            if signer.account.trim().is_empty() {
                anyhow::bail!("Signer '{}' has an empty account", id);
            }
        }
        if self.store_backend() == StoreBackend::Git && self.store_branch().trim().is_empty() {
            anyhow::bail!("[store] branch must not be empty");
        }
        Ok(())
    }
}
