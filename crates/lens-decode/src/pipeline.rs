//! Block decode orchestration.
//!
//! [`BlockDecoder::decode`] runs in three phases per block:
//!
//! 1. Fetch the user operations of every EntryPoint transaction.
//! 2. Collect the distinct selectors, topics and contract addresses in the
//!    block and resolve signature hints and ABIs for them concurrently.
//! 3. Decode every transaction against the resolved ABIs.
//!
//! Every network answer is awaited before decoding starts, so output order
//! always matches the input block. Only chain access failures are fatal;
//! everything else degrades to raw entries.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use alloy::primitives::{Address, Selector, B256, U256};
use eyre::{bail, eyre, Context, Result};
use futures::future::join_all;
use lens_data::types::selector_of;
use lens_data::{Block, ChainClient, Transaction, UserOperation};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::abi::ContractAbi;
use crate::decoder::{decode_call_or_raw, decode_log_or_raw, DecodedCall, DecodedEvent};
use crate::resolver::AbiResolver;
use crate::signatures::{SignatureHints, SignatureService};
use crate::userops::{entry_points, UserOpIndexer};

/// A user operation with its call data decoded against the sender account.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedUserOp {
    pub hash: B256,
    pub sender: Address,
    pub nonce: U256,
    pub call: Option<DecodedCall>,
}

/// One transaction of a decoded block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedTransaction {
    pub hash: B256,
    pub index: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    /// True for contract deployments, which are not decoded further.
    pub deploy: bool,
    /// Execution status from the receipt, `None` without a receipt.
    pub success: Option<bool>,
    /// `None` for deployments and plain value transfers.
    pub method: Option<DecodedCall>,
    /// Decoded logs in emission order.
    pub events: Vec<DecodedEvent>,
    /// Present only for EntryPoint transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ops: Option<Vec<DecodedUserOp>>,
}

/// A block with one [`DecodedTransaction`] per input transaction, in order.
#[derive(Clone, Debug, Serialize)]
pub struct DecodedBlock {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub transactions: Vec<DecodedTransaction>,
}

impl DecodedBlock {
    /// Counts of (decoded transactions, named methods, named events).
    pub fn stats(&self) -> (usize, usize, usize) {
        let methods = self
            .transactions
            .iter()
            .filter(|tx| tx.method.as_ref().is_some_and(|m| m.name.is_some()))
            .count();
        let events = self
            .transactions
            .iter()
            .flat_map(|tx| &tx.events)
            .filter(|event| event.name.is_some())
            .count();
        (self.transactions.len(), methods, events)
    }
}

type UserOps = HashMap<B256, Vec<UserOperation>>;

/// Decodes whole blocks.
pub struct BlockDecoder {
    resolver: Arc<AbiResolver>,
    signatures: Arc<dyn SignatureService>,
    user_ops: Option<Arc<dyn UserOpIndexer>>,
    entry_points: HashSet<Address>,
    cancel: CancellationToken,
}

impl BlockDecoder {
    pub fn new(
        resolver: Arc<AbiResolver>,
        signatures: Arc<dyn SignatureService>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            signatures,
            user_ops: None,
            entry_points: entry_points::ALL.into_iter().collect(),
            cancel,
        }
    }

    /// Enables user operation decoding for transactions sent to an EntryPoint.
    pub fn with_user_ops(mut self, indexer: Arc<dyn UserOpIndexer>) -> Self {
        self.user_ops = Some(indexer);
        self
    }

    /// Replaces the EntryPoint addresses whose transactions carry user operations.
    pub fn with_entry_points(mut self, entry_points: impl IntoIterator<Item = Address>) -> Self {
        self.entry_points = entry_points.into_iter().collect();
        self
    }

    /// Decodes a block. Fails only when cancelled before decoding finished,
    /// in which case the partial result is discarded.
    #[tracing::instrument(skip_all, fields(block_number = block.number, txs = block.transactions.len()))]
    pub async fn decode(&self, block: Block) -> Result<DecodedBlock> {
        let user_ops = self.fetch_user_ops(&block).await;
        self.ensure_active()?;

        let (selectors, topics, addresses) = collect_keys(&block, &user_ops);
        let (hints, abis) = tokio::join!(
            self.signature_hints(&selectors, &topics),
            self.resolver.resolve_many(addresses)
        );
        self.ensure_active()?;

        let transactions = block
            .transactions
            .iter()
            .map(|tx| decode_transaction(tx, &abis, &hints, user_ops.get(&tx.hash)))
            .collect();

        tracing::debug!(
            abis = abis.len(),
            hinted = hints.functions.len() + hints.events.len(),
            "block decoded"
        );

        Ok(DecodedBlock {
            number: block.number,
            hash: block.hash,
            timestamp: block.timestamp,
            transactions,
        })
    }

    /// Fetches and decodes block `number`. `Ok(None)` when the block does not exist.
    ///
    /// # Errors
    /// Returns error if the chain is unreachable or decoding was cancelled.
    pub async fn decode_number(
        &self,
        chain: &dyn ChainClient,
        number: u64,
    ) -> Result<Option<DecodedBlock>> {
        let fetched = self
            .until_cancelled(chain.block_with_retry(number))
            .await
            .ok_or_else(|| eyre!("decode cancelled"))?;
        let Some(block) = fetched.wrap_err_with(|| format!("failed to fetch block {number}"))? else {
            return Ok(None);
        };
        self.decode(block).await.map(Some)
    }

    /// Decodes `start..=end` in order, handing each block to `sink`.
    ///
    /// Stops between blocks when cancelled and returns the number of blocks
    /// delivered. Missing blocks are skipped with a warning.
    ///
    /// # Errors
    /// Returns error if the chain is unreachable or `sink` fails.
    pub async fn decode_range<F>(
        &self,
        chain: &dyn ChainClient,
        start: u64,
        end: u64,
        mut sink: F,
    ) -> Result<u64>
    where
        F: FnMut(DecodedBlock) -> Result<()> + Send,
    {
        let mut delivered = 0;
        for number in start..=end {
            if self.cancel.is_cancelled() {
                tracing::info!(next_block = number, "decode cancelled");
                break;
            }
            let decoded = match self.decode_number(chain, number).await {
                Ok(Some(decoded)) => decoded,
                Ok(None) => {
                    tracing::warn!(block_number = number, "block not found, skipping");
                    continue;
                }
                Err(_) if self.cancel.is_cancelled() => break,
                Err(e) => return Err(e),
            };
            sink(decoded)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("decode cancelled");
        }
        Ok(())
    }

    /// Runs `future` unless the decoder is cancelled first.
    async fn until_cancelled<T>(&self, future: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            out = future => Some(out),
        }
    }

    async fn signature_hints(&self, selectors: &[Selector], topics: &[B256]) -> SignatureHints {
        if selectors.is_empty() && topics.is_empty() {
            return SignatureHints::default();
        }
        match self.until_cancelled(self.signatures.lookup(selectors, topics)).await {
            None => SignatureHints::default(),
            Some(Ok(hints)) => hints,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "signature hints unavailable");
                SignatureHints::default()
            }
        }
    }

    async fn fetch_user_ops(&self, block: &Block) -> UserOps {
        let Some(indexer) = &self.user_ops else {
            return UserOps::new();
        };
        let bundled = block
            .transactions
            .iter()
            .filter(|tx| tx.to.is_some_and(|to| self.entry_points.contains(&to)));

        let lookups = bundled.map(|tx| async move {
            let ops = match indexer.list_user_ops(tx.hash).await {
                Ok(hashes) => {
                    let fetched = join_all(hashes.iter().map(|hash| indexer.get_user_op(*hash))).await;
                    fetched
                        .into_iter()
                        .zip(&hashes)
                        .filter_map(|(result, hash)| match result {
                            Ok(op) => op,
                            Err(e) => {
                                tracing::debug!(tx = %tx.hash, op = %hash, error = %e, "user operation lookup failed");
                                None
                            }
                        })
                        .collect()
                }
                Err(e) => {
                    tracing::debug!(tx = %tx.hash, error = %e, "could not list user operations");
                    Vec::new()
                }
            };
            (tx.hash, ops)
        });
        self.until_cancelled(join_all(lookups))
            .await
            .map(|fetched| fetched.into_iter().collect::<UserOps>())
            .unwrap_or_default()
    }
}

/// Distinct selectors, topic0s and contract addresses, sorted.
fn collect_keys(block: &Block, user_ops: &UserOps) -> (Vec<Selector>, Vec<B256>, Vec<Address>) {
    let mut selectors = BTreeSet::new();
    let mut topics = BTreeSet::new();
    let mut addresses = BTreeSet::new();

    for tx in &block.transactions {
        let Some(to) = tx.to else { continue };
        addresses.insert(to);
        if let Some(selector) = tx.selector() {
            selectors.insert(Selector::from(selector));
        }
        for log in tx.logs() {
            addresses.insert(log.address);
            if let Some(topic0) = log.topic0() {
                topics.insert(topic0);
            }
        }
    }
    for op in user_ops.values().flatten() {
        addresses.insert(op.sender);
        if let Some(selector) = selector_of(&op.call_data) {
            selectors.insert(Selector::from(selector));
        }
    }

    (
        selectors.into_iter().collect(),
        topics.into_iter().collect(),
        addresses.into_iter().collect(),
    )
}

fn decode_transaction(
    tx: &Transaction,
    abis: &HashMap<Address, Arc<ContractAbi>>,
    hints: &SignatureHints,
    user_ops: Option<&Vec<UserOperation>>,
) -> DecodedTransaction {
    let mut decoded = DecodedTransaction {
        hash: tx.hash,
        index: tx.index,
        from: tx.from,
        to: tx.to,
        value: tx.value,
        deploy: tx.is_deploy(),
        success: tx.receipt.as_ref().map(|receipt| receipt.status),
        method: None,
        events: Vec::new(),
        user_ops: None,
    };
    let Some(to) = tx.to else {
        return decoded;
    };

    decoded.method = decode_with_hint(abis.get(&to).map(Arc::as_ref), to, &tx.input, hints);

    decoded.events = tx
        .logs()
        .iter()
        .filter_map(|log| {
            let mut event = decode_log_or_raw(abis.get(&log.address).map(Arc::as_ref), log)?;
            if let Some(signature) = hints.event(event.topic0) {
                event.apply_hint(signature);
            }
            Some(event)
        })
        .collect();

    decoded.user_ops = user_ops.map(|ops| {
        ops.iter()
            .map(|op| DecodedUserOp {
                hash: op.hash,
                sender: op.sender,
                nonce: op.nonce,
                call: decode_with_hint(
                    abis.get(&op.sender).map(Arc::as_ref),
                    op.sender,
                    &op.call_data,
                    hints,
                ),
            })
            .collect()
    });

    decoded
}

fn decode_with_hint(
    abi: Option<&ContractAbi>,
    contract: Address,
    data: &[u8],
    hints: &SignatureHints,
) -> Option<DecodedCall> {
    let mut call = decode_call_or_raw(abi, contract, data)?;
    if let Some(signature) = hints.function(call.selector) {
        call.apply_hint(signature);
    }
    Some(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;
    use lens_data::{Log, Receipt};

    fn tx(index: u64, to: Option<Address>, input: Vec<u8>, logs: Vec<Log>) -> Transaction {
        Transaction {
            hash: B256::with_last_byte(index as u8 + 1),
            index,
            from: Address::repeat_byte(0xf0),
            to,
            value: U256::ZERO,
            input: Bytes::from(input),
            receipt: Some(Receipt {
                status: true,
                gas_used: 21_000,
                contract_address: None,
                logs,
            }),
        }
    }

    #[test]
    fn deployment_is_not_decoded() {
        let deploy = tx(0, None, vec![0x60, 0x80, 0x60, 0x40], vec![]);
        let decoded = decode_transaction(&deploy, &HashMap::new(), &SignatureHints::default(), None);
        assert!(decoded.deploy);
        assert!(decoded.method.is_none());
        assert!(decoded.events.is_empty());
    }

    #[test]
    fn short_input_has_no_method() {
        let transfer = tx(0, Some(Address::repeat_byte(0x01)), vec![0x01, 0x02], vec![]);
        let decoded = decode_transaction(&transfer, &HashMap::new(), &SignatureHints::default(), None);
        assert!(!decoded.deploy);
        assert!(decoded.method.is_none());
    }

    #[test]
    fn hints_name_unknown_selectors_and_topics() {
        let log = Log {
            index: 0,
            address: Address::repeat_byte(0x02),
            topics: vec![B256::repeat_byte(0x77)],
            data: Bytes::new(),
        };
        let call = tx(0, Some(Address::repeat_byte(0x02)), vec![0x12, 0x34, 0x56, 0x78], vec![log]);

        let mut hints = SignatureHints::default();
        hints
            .functions
            .insert(Selector::from([0x12, 0x34, 0x56, 0x78]), "poke(uint256)".to_string());
        hints
            .events
            .insert(B256::repeat_byte(0x77), "Poked(address)".to_string());

        let decoded = decode_transaction(&call, &HashMap::new(), &hints, None);
        let method = decoded.method.expect("raw method");
        assert_eq!(method.name.as_deref(), Some("poke"));
        assert!(method.parameters.is_empty());
        assert_eq!(decoded.events[0].name.as_deref(), Some("Poked"));
    }

    #[test]
    fn collect_keys_deduplicates_and_skips_deployments() {
        let target = Address::repeat_byte(0x03);
        let log = Log {
            index: 0,
            address: Address::repeat_byte(0x04),
            topics: vec![B256::repeat_byte(0x55)],
            data: Bytes::new(),
        };
        let block = Block {
            number: 1,
            hash: B256::ZERO,
            parent_hash: B256::ZERO,
            timestamp: 0,
            transactions: vec![
                tx(0, Some(target), vec![0xaa, 0xbb, 0xcc, 0xdd], vec![log.clone()]),
                tx(1, Some(target), vec![0xaa, 0xbb, 0xcc, 0xdd], vec![log]),
                tx(2, None, vec![0x60, 0x80, 0x60, 0x40], vec![]),
            ],
        };

        let (selectors, topics, addresses) = collect_keys(&block, &UserOps::new());
        assert_eq!(selectors, vec![Selector::from([0xaa, 0xbb, 0xcc, 0xdd])]);
        assert_eq!(topics, vec![B256::repeat_byte(0x55)]);
        assert_eq!(addresses, vec![target, Address::repeat_byte(0x04)]);
    }
}
