//! External script runner boundary.
//!
//! Upgrade segments are scripts (forge scripts in practice) executed by an
//! outside tool. The engine only needs a structured report back: did it
//! succeed, which transactions went out, what got deployed and which
//! environment parameters changed.

pub mod process;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub use process::ProcessScriptRunner;

use crate::types::{DeployedContract, StateMutation};

/// What the runner is asked to do with a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Run the script's test suite.
    Test,
    /// Run locally; nothing is signed.
    Execute,
    /// Sign and broadcast from an EOA.
    Broadcast,
    /// Build a multisig proposal.
    Propose,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Test => "test",
            RunMode::Execute => "execute",
            RunMode::Broadcast => "broadcast",
            RunMode::Propose => "propose",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub script: PathBuf,
    pub arguments: Option<Value>,
    pub mode: RunMode,
    /// Extra environment variables for the script.
    pub env: BTreeMap<String, String>,
    pub rpc_url: Option<Url>,
    /// Signer identity for broadcast and propose runs.
    pub signer: Option<String>,
}

impl RunRequest {
    pub fn new(script: impl Into<PathBuf>, mode: RunMode) -> Self {
        Self {
            script: script.into(),
            arguments: None,
            mode,
            env: BTreeMap::new(),
            rpc_url: None,
            signer: None,
        }
    }
}

/// Structured report produced by one run. Also written verbatim as segment
/// evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub success: bool,
    #[serde(default)]
    pub transactions: Vec<String>,
    #[serde(default)]
    pub deployments: Vec<DeployedContract>,
    #[serde(default)]
    pub mutations: Vec<StateMutation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured stdout and stderr.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

pub trait ScriptRunner {
    fn run(&self, request: &RunRequest) -> anyhow::Result<RunOutput>;
}
