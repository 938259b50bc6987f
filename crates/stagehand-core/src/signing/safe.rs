//! Safe multisig tracking through the Safe transaction service.
//!
//! Proposals are built and submitted by the script runner in `propose`
//! mode, which reports the Safe address and transaction hash. Approval and
//! execution state is read back from the service's REST API.

use anyhow::Context;
use serde::Deserialize;
use tokio::runtime::Runtime;
use tracing::{debug, info};
use url::Url;

use super::{ApprovalStatus, ExecutionStatus, MultisigCancel, MultisigStrategy, Proposal};
use crate::runner::{RunMode, RunRequest, ScriptRunner};

pub struct SafeServiceMultisig {
    id: String,
    proposer: String,
    service_url: Url,
    client: reqwest::Client,
    runtime: Runtime,
}

impl std::fmt::Debug for SafeServiceMultisig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeServiceMultisig")
            .field("id", &self.id)
            .field("service_url", &self.service_url)
            .finish()
    }
}

/// Subset of the service's multisig transaction record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceTransaction {
    #[serde(default)]
    confirmations: Vec<serde_json::Value>,
    #[serde(default)]
    confirmations_required: u32,
    #[serde(default)]
    is_executed: bool,
    #[serde(default)]
    transaction_hash: Option<String>,
}

impl SafeServiceMultisig {
    pub fn new(
        id: impl Into<String>,
        proposer: impl Into<String>,
        service_url: Url,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stagehand/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime")?;
        Ok(Self {
            id: id.into(),
            proposer: proposer.into(),
            service_url,
            client,
            runtime,
        })
    }

    fn transaction_url(&self, safe_tx_hash: &str) -> anyhow::Result<Url> {
        self.service_url
            .join(&format!("api/v1/multisig-transactions/{}/", safe_tx_hash))
            .with_context(|| format!("Invalid Safe service URL: {}", self.service_url))
    }

    fn fetch(&self, safe_tx_hash: &str) -> anyhow::Result<ServiceTransaction> {
        let url = self.transaction_url(safe_tx_hash)?;
        debug!(%url, "querying Safe transaction service");
        self.runtime.block_on(async {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .with_context(|| format!("Failed to fetch {}", url))?;
            if !response.status().is_success() {
                anyhow::bail!(
                    "Safe transaction service returned HTTP {} for {}",
                    response.status(),
                    url
                );
            }
            response
                .json::<ServiceTransaction>()
                .await
                .context("Failed to parse Safe transaction service response")
        })
    }
}

impl MultisigStrategy for SafeServiceMultisig {
    fn id(&self) -> &str {
        &self.id
    }

    fn propose(&self, runner: &dyn ScriptRunner, mut request: RunRequest) -> anyhow::Result<Proposal> {
        request.mode = RunMode::Propose;
        request.signer = Some(self.proposer.clone());
        request
            .env
            .insert("STAGEHAND_SAFE_SERVICE_URL".to_string(), self.service_url.to_string());
        info!(proposer = %self.proposer, script = %request.script.display(), "proposing to Safe");

        let output = runner.run(&request)?;
        if !output.success {
            anyhow::bail!(
                "Proposal script failed: {}",
                output.error.as_deref().unwrap_or("no error reported")
            );
        }
        let safe_address = output
            .safe_address
            .clone()
            .context("Proposal report did not include a safeAddress")?;
        Ok(Proposal {
            signer: self.proposer.clone(),
            safe_address,
            safe_tx_hash: output.safe_tx_hash.clone().filter(|h| !h.is_empty()),
            output,
        })
    }

    fn approvals(&self, _safe_address: &str, safe_tx_hash: &str) -> anyhow::Result<ApprovalStatus> {
        let tx = self.fetch(safe_tx_hash)?;
        Ok(ApprovalStatus {
            confirmations: u32::try_from(tx.confirmations.len()).unwrap_or(u32::MAX),
            threshold: tx.confirmations_required,
        })
    }

    fn execution(
        &self,
        _safe_address: &str,
        safe_tx_hash: &str,
    ) -> anyhow::Result<ExecutionStatus> {
        let tx = self.fetch(safe_tx_hash)?;
        Ok(ExecutionStatus {
            executed: tx.is_executed,
            transaction_hash: tx.transaction_hash.filter(|h| !h.is_empty()),
        })
    }

    fn cancel(&self, safe_address: &str, safe_tx_hash: &str) -> anyhow::Result<MultisigCancel> {
        Ok(MultisigCancel::Unsupported(format!(
            "reject {safe_tx_hash} from the Safe interface for {safe_address}; \
             rejections need an owner signature"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_url_keeps_service_prefix() {
        let safe = SafeServiceMultisig::new(
            "safe",
            "deployer",
            Url::parse("https://safe.example/txs/").unwrap(),
        )
        .unwrap();
        assert_eq!(
            safe.transaction_url("0xabc").unwrap().as_str(),
            "https://safe.example/txs/api/v1/multisig-transactions/0xabc/"
        );
    }

    #[test]
    fn service_record_parses() {
        let tx: ServiceTransaction = serde_json::from_str(
            r#"{"confirmations":[{},{}],"confirmationsRequired":3,"isExecuted":false,"transactionHash":null}"#,
        )
        .unwrap();
        assert_eq!(tx.confirmations.len(), 2);
        assert_eq!(tx.confirmations_required, 3);
        assert!(!tx.is_executed);
    }
}
