//! Alloy RPC provider integration for fetching blocks with receipts.
//!
//! Maps Alloy RPC types to the crate's own [`Block`]/[`Receipt`]/[`Log`]
//! shapes so the decode pipeline never touches node wire types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::{BlockId, BlockNumberOrTag};
use alloy::rpc::types::TransactionReceipt;
use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::sync::Semaphore;

use crate::types::{Block, Log, Receipt, Transaction};

/// Shared type-erased provider handed to every component that talks to the node.
pub type SharedProvider = Arc<dyn Provider + Send + Sync>;

/// Max concurrent `eth_getTransactionReceipt` calls when block receipts are unavailable.
const RECEIPT_CONCURRENCY: usize = 10;

/// Attempts per block before giving up in [`ChainClient::block_with_retry`].
const FETCH_ATTEMPTS: u32 = 3;

/// Read access to a chain node.
///
/// Failing to reach the node is the one fatal error of the decode pipeline,
/// so every method returns `Result`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number known to the node.
    async fn latest_block_number(&self) -> Result<u64>;

    /// Full block with every transaction's receipt attached. `Ok(None)` if the block does not exist.
    async fn block_with_receipts(&self, number: u64) -> Result<Option<Block>>;

    /// Receipt for a single transaction.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>>;

    /// Deployed bytecode at `address` (empty for EOAs).
    async fn code_at(&self, address: Address) -> Result<Bytes>;

    /// [`Self::block_with_receipts`] with up to three attempts and exponential backoff.
    #[tracing::instrument(skip(self))]
    async fn block_with_retry(&self, number: u64) -> Result<Option<Block>> {
        let mut attempt = 0;
        loop {
            match self.block_with_receipts(number).await {
                Ok(block) => return Ok(block),
                Err(e) if attempt + 1 < FETCH_ATTEMPTS => {
                    let backoff_ms = 500 * 2_u64.pow(attempt);
                    tracing::debug!(
                        block_number = number,
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        "retrying failed block fetch"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// [`ChainClient`] backed by an Alloy HTTP provider.
pub struct RpcChainClient {
    provider: SharedProvider,
}

impl RpcChainClient {
    /// Creates a new client and tests RPC connectivity.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or `eth_blockNumber` fails.
    #[tracing::instrument(skip_all, fields(rpc_url = %rpc_url))]
    pub async fn connect(rpc_url: &str) -> Result<Self> {
        let provider =
            ProviderBuilder::new().on_http(rpc_url.parse().wrap_err("invalid RPC URL format")?);
        let provider: SharedProvider = Arc::new(provider);

        let block_number = provider
            .get_block_number()
            .await
            .wrap_err("failed to test RPC connectivity with eth_blockNumber")?;

        tracing::info!(
            rpc_url = %rpc_url,
            latest_block = block_number,
            "RPC connection successful"
        );

        Ok(Self { provider })
    }

    /// Wraps an existing provider without a connectivity check.
    pub fn from_provider(provider: SharedProvider) -> Self {
        Self { provider }
    }

    /// The underlying provider, for components issuing their own calls.
    pub fn provider(&self) -> SharedProvider {
        Arc::clone(&self.provider)
    }

    async fn receipts_for(
        &self,
        number: u64,
        tx_hashes: &[B256],
    ) -> Result<HashMap<B256, TransactionReceipt>> {
        let block_receipts = self
            .provider
            .get_block_receipts(BlockId::Number(BlockNumberOrTag::Number(number)))
            .await;

        let receipts = match block_receipts {
            Ok(Some(receipts)) => receipts,
            Ok(None) | Err(_) => {
                tracing::debug!(
                    block_number = number,
                    "eth_getBlockReceipts unavailable, fetching receipts per transaction"
                );
                let semaphore = Arc::new(Semaphore::new(RECEIPT_CONCURRENCY));
                let fetched = futures::future::try_join_all(tx_hashes.iter().map(|hash| {
                    let provider = Arc::clone(&self.provider);
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let _permit = semaphore.acquire().await.ok();
                        provider
                            .get_transaction_receipt(*hash)
                            .await
                            .wrap_err_with(|| format!("failed to fetch receipt {hash}"))
                    }
                }))
                .await?;
                fetched.into_iter().flatten().collect()
            }
        };

        Ok(receipts
            .into_iter()
            .map(|receipt| (receipt.transaction_hash, receipt))
            .collect())
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("failed to fetch latest block number")
    }

    #[tracing::instrument(skip(self))]
    async fn block_with_receipts(&self, number: u64) -> Result<Option<Block>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .full()
            .await
            .wrap_err_with(|| format!("failed to fetch block {number}"))?;

        let block = match block {
            Some(block) => block,
            None => {
                tracing::debug!(block_number = number, "block not found");
                return Ok(None);
            }
        };

        let txs = block.transactions.as_transactions().unwrap_or_default();
        let tx_hashes: Vec<B256> = txs.iter().map(|tx| *tx.inner.tx_hash()).collect();
        let mut receipts = self.receipts_for(number, &tx_hashes).await?;

        if receipts.len() != tx_hashes.len() {
            tracing::warn!(
                block_number = number,
                transactions = tx_hashes.len(),
                receipts = receipts.len(),
                "receipt count does not match transaction count"
            );
        }

        let transactions = txs
            .iter()
            .enumerate()
            .map(|(idx, tx)| {
                let hash = *tx.inner.tx_hash();
                Transaction {
                    hash,
                    index: tx.transaction_index.unwrap_or(idx as u64),
                    from: tx.inner.signer(),
                    to: tx.inner.to(),
                    value: tx.inner.value(),
                    input: tx.inner.input().clone(),
                    receipt: receipts.remove(&hash).map(|r| map_receipt(&r)),
                }
            })
            .collect();

        Ok(Some(Block {
            number: block.header.number,
            hash: block.header.hash,
            parent_hash: block.header.parent_hash,
            timestamp: block.header.timestamp,
            transactions,
        }))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .wrap_err_with(|| format!("failed to fetch receipt {hash}"))?;
        Ok(receipt.as_ref().map(map_receipt))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.provider
            .get_code_at(address)
            .await
            .wrap_err_with(|| format!("failed to fetch code at {address}"))
    }
}

fn map_receipt(receipt: &TransactionReceipt) -> Receipt {
    Receipt {
        status: receipt.status(),
        gas_used: receipt.gas_used,
        contract_address: receipt.contract_address,
        logs: receipt
            .inner
            .logs()
            .iter()
            .enumerate()
            .map(|(idx, log)| map_log(log, idx as u64))
            .collect(),
    }
}

fn map_log(log: &alloy::rpc::types::Log, fallback_index: u64) -> Log {
    Log {
        index: log.log_index.unwrap_or(fallback_index),
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_requires_valid_url() {
        let result = RpcChainClient::connect("invalid://url").await;
        assert!(result.is_err(), "should reject invalid URL");
    }

    #[test]
    fn map_log_copies_topics_and_data() {
        let topics = vec![B256::repeat_byte(0xdd), B256::repeat_byte(0x01)];
        let data = alloy::primitives::LogData::new(topics.clone(), Bytes::from(vec![0x2a]))
            .expect("two topics is valid");
        let log = alloy::rpc::types::Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xaa),
                data,
            },
            block_hash: None,
            block_number: None,
            block_timestamp: None,
            transaction_hash: None,
            transaction_index: None,
            log_index: None,
            removed: false,
        };

        let mapped = map_log(&log, 7);
        assert_eq!(mapped.index, 7);
        assert_eq!(mapped.address, Address::repeat_byte(0xaa));
        assert_eq!(mapped.topics, topics);
        assert_eq!(mapped.data, Bytes::from(vec![0x2a]));
    }
}
