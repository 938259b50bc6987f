//! JSON-RPC receipt lookup.

use anyhow::Context;
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use url::Url;

use super::{ChainClient, Receipt};

pub struct RpcChainClient {
    url: Url,
    client: reqwest::Client,
    runtime: Runtime,
}

impl std::fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient").field("url", &self.url).finish()
    }
}

impl RpcChainClient {
    pub fn new(url: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stagehand/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime")?;
        Ok(Self {
            url,
            client,
            runtime,
        })
    }

    async fn call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to call {} on {}", method, self.url))?;
        if !response.status().is_success() {
            anyhow::bail!("RPC {} failed: HTTP {} from {}", method, response.status(), self.url);
        }
        let reply: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;
        if let Some(error) = reply.get("error") {
            anyhow::bail!("RPC {} returned an error: {}", method, error);
        }
        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }
}

impl ChainClient for RpcChainClient {
    fn transaction_receipt(&self, hash: &str) -> anyhow::Result<Option<Receipt>> {
        let result = self
            .runtime
            .block_on(self.call("eth_getTransactionReceipt", json!([hash])))?;
        parse_receipt(hash, &result)
    }
}

fn parse_receipt(hash: &str, result: &Value) -> anyhow::Result<Option<Receipt>> {
    if result.is_null() {
        return Ok(None);
    }
    let block_number = result
        .get("blockNumber")
        .and_then(Value::as_str)
        .map(parse_quantity)
        .transpose()?;
    let Some(block_number) = block_number else {
        return Ok(None);
    };
    let status = result
        .get("status")
        .and_then(Value::as_str)
        .map(parse_quantity)
        .transpose()?
        .unwrap_or(1);
    Ok(Some(Receipt {
        transaction_hash: hash.to_string(),
        block_number,
        success: status == 1,
    }))
}

fn parse_quantity(hex: &str) -> anyhow::Result<u64> {
    let digits = hex.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hex quantity: {}", hex))
}
