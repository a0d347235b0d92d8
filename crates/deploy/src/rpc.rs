//! Minimal Starknet JSON-RPC client.
//!
//! Transactions are sent through `starkli`. What the orchestrator reads
//! directly from the node (the chain id and the status of a transaction) goes
//! through [`StarknetRpc`].

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use starknet::core::utils::parse_cairo_short_string;
use url::Url;

use crate::Felt;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Result of `starknet_getTransactionStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionStatus {
    /// `RECEIVED`, `REJECTED`, `ACCEPTED_ON_L2` or `ACCEPTED_ON_L1`.
    pub finality_status: String,
    /// `SUCCEEDED` or `REVERTED`, once the transaction was executed.
    #[serde(default)]
    pub execution_status: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// A Starknet node reached over HTTP.
#[derive(Debug, Clone)]
pub struct StarknetRpc {
    url: Url,
    http: reqwest::Client,
}

impl StarknetRpc {
    pub fn new(url: Url) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { url, http })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The chain id, decoded from its short-string encoding (e.g. `SN_SEPOLIA`).
    pub async fn chain_id(&self) -> anyhow::Result<String> {
        let chain_id: Felt = self.request("starknet_chainId", json!([])).await?;
        Ok(decode_short_string(chain_id))
    }

    pub async fn transaction_status(&self, tx_hash: Felt) -> anyhow::Result<TransactionStatus> {
        self.request("starknet_getTransactionStatus", json!([tx_hash]))
            .await
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> anyhow::Result<T> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });

        let response: JsonRpcResponse<T> = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send {method} to {}", self.url))?
            .error_for_status()
            .with_context(|| format!("{method} was refused by {}", self.url))?
            .json()
            .await
            .with_context(|| format!("Failed to decode {method} response"))?;

        match response {
            JsonRpcResponse {
                error: Some(error), ..
            } => {
                let data = error.data.map(|data| format!(" ({data})")).unwrap_or_default();
                anyhow::bail!("{method} failed with code {}: {}{data}", error.code, error.message)
            }
            JsonRpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            _ => anyhow::bail!("{method} returned neither a result nor an error"),
        }
    }
}

/// Decode a felt-packed short string, falling back to its hex form.
pub fn decode_short_string(value: Felt) -> String {
    parse_cairo_short_string(&value).unwrap_or_else(|_| format!("{value:#x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_short_string() {
        let sepolia = Felt::from_hex("0x534e5f5345504f4c4941").unwrap();
        assert_eq!(decode_short_string(sepolia), "SN_SEPOLIA");
        let mainnet = Felt::from_hex("0x534e5f4d41494e").unwrap();
        assert_eq!(decode_short_string(mainnet), "SN_MAIN");
    }

    #[test]
    fn test_error_response_is_decoded() {
        let response: JsonRpcResponse<Felt> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 29, "message": "Transaction hash not found" }
        }))
        .unwrap();
        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, 29);
        assert_eq!(error.message, "Transaction hash not found");
    }

    #[test]
    fn test_transaction_status_shape() {
        let status: TransactionStatus = serde_json::from_value(json!({
            "finality_status": "ACCEPTED_ON_L2",
            "execution_status": "REVERTED",
            "failure_reason": "Error in the called contract"
        }))
        .unwrap();
        assert_eq!(status.execution_status.as_deref(), Some("REVERTED"));

        let received: TransactionStatus =
            serde_json::from_value(json!({ "finality_status": "RECEIVED" })).unwrap();
        assert_eq!(received.execution_status, None);
    }
}
