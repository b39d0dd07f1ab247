//! ERC-4337 user operation discovery.
//!
//! User operations bundled into an EntryPoint transaction are listed from the
//! `UserOperationEvent` logs of its receipt and then fetched from a bundler
//! with `eth_getUserOperationByHash`.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use eyre::{eyre, Context, Result};
use lens_data::{ChainClient, UserOperation};
use serde::Deserialize;

/// Known EntryPoint deployments.
pub mod entry_points {
    use alloy::primitives::{address, Address};

    /// EntryPoint v0.6
    pub const V0_6: Address = address!("5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");

    /// EntryPoint v0.7
    pub const V0_7: Address = address!("0000000071727De22E5E9d8BAf0edAc6f37da032");

    pub const ALL: [Address; 2] = [V0_6, V0_7];
}

sol! {
    #[allow(missing_docs)]
    event UserOperationEvent(bytes32 indexed userOpHash, address indexed sender, address indexed paymaster, uint256 nonce, bool success, uint256 actualGasCost, uint256 actualGasUsed);
}

/// Topic emitted by the EntryPoint once per executed user operation.
pub const USER_OPERATION_EVENT: B256 = <UserOperationEvent as SolEvent>::SIGNATURE_HASH;

/// Finds and fetches the user operations inside a transaction.
#[async_trait]
pub trait UserOpIndexer: Send + Sync {
    /// Hashes of the user operations executed by `tx_hash`, in log order.
    async fn list_user_ops(&self, tx_hash: B256) -> Result<Vec<B256>>;

    /// Full user operation, `Ok(None)` when the bundler does not know it.
    async fn get_user_op(&self, op_hash: B256) -> Result<Option<UserOperation>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOpEnvelope {
    user_operation: RawUserOp,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUserOp {
    sender: Address,
    nonce: U256,
    call_data: Bytes,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<UserOpEnvelope>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// [`UserOpIndexer`] using node receipts for listing and a bundler JSON-RPC endpoint for lookups.
pub struct BundlerRpcIndexer {
    chain: Arc<dyn ChainClient>,
    client: reqwest::Client,
    bundler_url: String,
}

impl BundlerRpcIndexer {
    pub fn new(chain: Arc<dyn ChainClient>, client: reqwest::Client, bundler_url: impl Into<String>) -> Self {
        Self {
            chain,
            client,
            bundler_url: bundler_url.into(),
        }
    }
}

#[async_trait]
impl UserOpIndexer for BundlerRpcIndexer {
    async fn list_user_ops(&self, tx_hash: B256) -> Result<Vec<B256>> {
        let receipt = self
            .chain
            .transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| eyre!("no receipt for {tx_hash}"))?;
        Ok(user_op_hashes(&receipt.logs))
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn get_user_op(&self, op_hash: B256) -> Result<Option<UserOperation>> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getUserOperationByHash",
            "params": [op_hash],
        });
        let response: RpcResponse = self
            .client
            .post(&self.bundler_url)
            .json(&request)
            .send()
            .await
            .wrap_err("bundler request failed")?
            .error_for_status()
            .wrap_err("bundler rejected request")?
            .json()
            .await
            .wrap_err("bundler returned invalid JSON")?;

        if let Some(error) = response.error {
            return Err(eyre!("bundler error {}: {}", error.code, error.message));
        }
        Ok(response.result.map(|envelope| UserOperation {
            hash: op_hash,
            sender: envelope.user_operation.sender,
            nonce: envelope.user_operation.nonce,
            call_data: envelope.user_operation.call_data,
        }))
    }
}

/// User operation hashes from `UserOperationEvent` logs emitted by a known EntryPoint.
pub fn user_op_hashes(logs: &[lens_data::Log]) -> Vec<B256> {
    logs.iter()
        .filter(|log| entry_points::ALL.contains(&log.address))
        .filter(|log| log.topic0() == Some(USER_OPERATION_EVENT))
        .filter_map(|log| log.topics.get(1).copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::json_abi::Event;

    #[test]
    fn user_operation_event_topic_matches_signature() {
        let event = Event::parse(
            "event UserOperationEvent(bytes32 indexed userOpHash, address indexed sender, address indexed paymaster, uint256 nonce, bool success, uint256 actualGasCost, uint256 actualGasUsed)",
        )
        .expect("valid event");
        assert_eq!(event.selector(), USER_OPERATION_EVENT);
    }

    #[test]
    fn lists_only_entry_point_events() {
        let op = B256::repeat_byte(0x42);
        let log = |address: Address, topic0: B256| lens_data::Log {
            index: 0,
            address,
            topics: vec![topic0, op],
            data: Bytes::new(),
        };
        let logs = vec![
            log(entry_points::V0_6, USER_OPERATION_EVENT),
            log(Address::repeat_byte(0x01), USER_OPERATION_EVENT),
            log(entry_points::V0_7, B256::repeat_byte(0x99)),
        ];
        assert_eq!(user_op_hashes(&logs), vec![op]);
    }

    #[test]
    fn parses_bundler_response() {
        let body = r#"{
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "userOperation": {
                    "sender": "0x1111111111111111111111111111111111111111",
                    "nonce": "0x2a",
                    "callData": "0xb61d27f6"
                },
                "entryPoint": "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789",
                "transactionHash": "0x0000000000000000000000000000000000000000000000000000000000000001"
            }
        }"#;
        let response: RpcResponse = serde_json::from_str(body).expect("valid");
        let op = response.result.expect("result").user_operation;
        assert_eq!(op.sender, Address::repeat_byte(0x11));
        assert_eq!(op.nonce, U256::from(42));
        assert_eq!(op.call_data, Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]));
    }

    #[test]
    fn null_result_means_unknown_operation() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).expect("valid");
        assert!(response.result.is_none());
        assert!(response.error.is_none());
    }
}
