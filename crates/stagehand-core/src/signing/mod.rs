//! Signing boundaries.
//!
//! The engine never touches keys. An EOA segment asks a [`SigningStrategy`]
//! to get its script signed and broadcast; a multisig segment asks a
//! [`MultisigStrategy`] to propose it and later reports on approvals and
//! execution.

pub mod runner;
pub mod safe;

use serde::{Deserialize, Serialize};

pub use runner::RunnerSigningStrategy;
pub use safe::SafeServiceMultisig;

use crate::runner::{RunOutput, RunRequest, ScriptRunner};

/// Outcome of asking an EOA signer to sign and broadcast a script.
#[derive(Debug, Clone, PartialEq)]
pub struct SigningResult {
    /// False when the signer could not produce a signature (declined,
    /// unavailable, script failed).
    pub ready: bool,
    /// Identity that signed; recorded in segment metadata.
    pub signer: String,
    /// Runner report with transactions, deployments and mutations.
    pub output: RunOutput,
}

pub trait SigningStrategy {
    /// Stable identifier used for `--signer` selection.
    fn id(&self) -> &str;

    fn request_new(
        &self,
        runner: &dyn ScriptRunner,
        request: RunRequest,
    ) -> anyhow::Result<SigningResult>;

    /// Withdraw anything pending for a deploy. Broadcast transactions cannot
    /// be recalled, so the default does nothing.
    fn cancel(&self, _deploy: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A proposal submitted to a multisig.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub signer: String,
    pub safe_address: String,
    /// `None` when the script produced nothing to propose.
    pub safe_tx_hash: Option<String>,
    pub output: RunOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStatus {
    pub confirmations: u32,
    pub threshold: u32,
}

impl ApprovalStatus {
    pub fn is_met(&self) -> bool {
        self.threshold > 0 && self.confirmations >= self.threshold
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

/// Result of asking a multisig to reject an outstanding proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultisigCancel {
    /// A same-nonce rejection was submitted.
    Rejected {
        safe_tx_hash: String,
        transaction_hash: Option<String>,
    },
    Unsupported(String),
}

pub trait MultisigStrategy {
    fn id(&self) -> &str;

    fn propose(&self, runner: &dyn ScriptRunner, request: RunRequest) -> anyhow::Result<Proposal>;

    fn approvals(&self, safe_address: &str, safe_tx_hash: &str) -> anyhow::Result<ApprovalStatus>;

    fn execution(&self, safe_address: &str, safe_tx_hash: &str)
    -> anyhow::Result<ExecutionStatus>;

    fn cancel(&self, safe_address: &str, safe_tx_hash: &str) -> anyhow::Result<MultisigCancel>;
}
