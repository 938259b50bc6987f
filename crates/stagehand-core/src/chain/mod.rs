//! Chain access: only transaction receipts are needed.

pub mod rpc;

use serde::{Deserialize, Serialize};

pub use rpc::RpcChainClient;

/// Mined transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub success: bool,
}

pub trait ChainClient {
    /// Receipt for `hash`, or `None` while it is still pending.
    fn transaction_receipt(&self, hash: &str) -> anyhow::Result<Option<Receipt>>;
}
