//! Shared core types used across deploy, environment and upgrade records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Signing/execution modality of one deploy segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Signed and broadcast by an externally-owned account.
    Eoa,
    /// Proposed to and executed by a multisig wallet.
    Multisig,
    /// Run locally with no signature.
    Script,
    /// Bookkeeping performed by the engine itself.
    System,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Eoa => "eoa",
            SegmentKind::Multisig => "multisig",
            SegmentKind::Script => "script",
            SegmentKind::System => "system",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a deployed contract record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReference {
    pub deploy: String,
    pub segment: usize,
    #[serde(default)]
    pub signer: String,
}

/// A contract deployed by a segment.
///
/// Singletons are tracked by name in the environment's `static` map;
/// everything else is appended to `instances`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedContract {
    pub contract: String,
    pub address: String,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_in: Option<DeployReference>,
}

/// A declared change to one environment parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMutation {
    pub name: String,
    #[serde(default)]
    pub prev: Value,
    pub next: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_type: Option<String>,
}
