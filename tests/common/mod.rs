//! Shared test doubles and builders.
//!
//! Fakes stand in for every external collaborator: the chain node, ABI
//! sources, the signature service, the bundler, the name service and the
//! exchange.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, Selector, B256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};
use lens_data::{Block, ChainClient, Log, Receipt, Transaction, UserOperation};
use lens_decode::classify::topics;
use lens_decode::{
    AbiResolver, AbiSource, BlockDecoder, SignatureHints, SignatureService, UserOpIndexer,
};
use lens_identity::{ExchangeDirectory, ExchangeToken, NameService};
use tokio_util::sync::CancellationToken;

pub const ERC20_ABI: &str = include_str!("../../crates/lens-decode/abis/erc20.json");

/// `transfer(address,uint256)`.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Chain node serving a fixed set of blocks.
#[derive(Default)]
pub struct FakeChain {
    pub blocks: HashMap<u64, Block>,
    pub code: HashMap<Address, Bytes>,
    pub unreachable: bool,
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn latest_block_number(&self) -> Result<u64> {
        self.blocks
            .keys()
            .max()
            .copied()
            .ok_or_else(|| eyre!("no blocks"))
    }

    async fn block_with_receipts(&self, number: u64) -> Result<Option<Block>> {
        if self.unreachable {
            return Err(eyre!("connection refused"));
        }
        Ok(self.blocks.get(&number).cloned())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        Ok(self
            .blocks
            .values()
            .flat_map(|block| &block.transactions)
            .find(|tx| tx.hash == hash)
            .and_then(|tx| tx.receipt.clone()))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }
}

/// ABI source with fixed answers that counts every fetch.
#[derive(Default)]
pub struct CountingSource {
    pub abis: HashMap<Address, String>,
    pub fetches: AtomicUsize,
    pub failing: bool,
}

impl CountingSource {
    pub fn with(abis: impl IntoIterator<Item = (Address, &'static str)>) -> Self {
        Self {
            abis: abis
                .into_iter()
                .map(|(address, json)| (address, json.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AbiSource for CountingSource {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_abi(&self, address: Address) -> Result<Option<String>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(eyre!("HTTP 503"));
        }
        Ok(self.abis.get(&address).cloned())
    }
}

/// Signature service answering from a fixed table.
#[derive(Default)]
pub struct FixedSignatures {
    pub hints: SignatureHints,
}

#[async_trait]
impl SignatureService for FixedSignatures {
    async fn lookup(&self, selectors: &[Selector], topics: &[B256]) -> Result<SignatureHints> {
        let mut hints = SignatureHints::default();
        for selector in selectors {
            if let Some(signature) = self.hints.functions.get(selector) {
                hints.functions.insert(*selector, signature.clone());
            }
        }
        for topic in topics {
            if let Some(signature) = self.hints.events.get(topic) {
                hints.events.insert(*topic, signature.clone());
            }
        }
        Ok(hints)
    }
}

/// Signature service that answers nothing after `delay`.
pub struct SlowSignatures {
    pub delay: Duration,
}

#[async_trait]
impl SignatureService for SlowSignatures {
    async fn lookup(&self, _selectors: &[Selector], _topics: &[B256]) -> Result<SignatureHints> {
        tokio::time::sleep(self.delay).await;
        Ok(SignatureHints::default())
    }
}

/// Bundler serving fixed user operations per transaction hash.
#[derive(Default)]
pub struct FakeBundler {
    pub ops: HashMap<B256, Vec<UserOperation>>,
    pub delay: Duration,
    pub listed: AtomicUsize,
}

impl FakeBundler {
    pub fn list_count(&self) -> usize {
        self.listed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserOpIndexer for FakeBundler {
    async fn list_user_ops(&self, tx_hash: B256) -> Result<Vec<B256>> {
        self.listed.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self
            .ops
            .get(&tx_hash)
            .map(|ops| ops.iter().map(|op| op.hash).collect())
            .unwrap_or_default())
    }

    async fn get_user_op(&self, op_hash: B256) -> Result<Option<UserOperation>> {
        Ok(self
            .ops
            .values()
            .flatten()
            .find(|op| op.hash == op_hash)
            .cloned())
    }
}

/// Name service with fixed forward and reverse records.
#[derive(Default)]
pub struct FakeNames {
    pub forward: HashMap<String, Address>,
    pub reverse: HashMap<Address, String>,
    pub calls: AtomicUsize,
}

impl FakeNames {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameService for FakeNames {
    async fn resolve_name(&self, name: &str) -> Result<Option<Address>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.forward.get(name).copied())
    }

    async fn lookup_address(&self, address: Address) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reverse.get(&address).cloned())
    }
}

/// Exchange directory with fixed accounts.
#[derive(Default)]
pub struct FakeExchange {
    pub names: HashMap<Address, String>,
    pub accounts: HashMap<Address, String>,
    pub tokens: Vec<ExchangeToken>,
}

#[async_trait]
impl ExchangeDirectory for FakeExchange {
    async fn address_of_name(&self, name: &str) -> Result<Option<Address>> {
        Ok(self
            .names
            .iter()
            .find(|(_, registered)| registered.as_str() == name)
            .map(|(owner, _)| *owner))
    }

    async fn name_of(&self, owner: Address) -> Result<Option<String>> {
        Ok(self.names.get(&owner).cloned())
    }

    async fn account_id_of(&self, owner: Address) -> Result<Option<String>> {
        Ok(self.accounts.get(&owner).cloned())
    }

    async fn owner_of_account(&self, account_id: &str) -> Result<Option<Address>> {
        Ok(self
            .accounts
            .iter()
            .find(|(_, id)| id.as_str() == account_id)
            .map(|(owner, _)| *owner))
    }

    async fn tokens(&self) -> Result<Vec<ExchangeToken>> {
        Ok(self.tokens.clone())
    }
}

/// Decoder over `source` with no signature hints.
pub fn decoder(source: Arc<CountingSource>) -> (BlockDecoder, Arc<AbiResolver>) {
    decoder_with_hints(source, SignatureHints::default())
}

pub fn decoder_with_hints(
    source: Arc<CountingSource>,
    hints: SignatureHints,
) -> (BlockDecoder, Arc<AbiResolver>) {
    decoder_with_signatures(
        source,
        Arc::new(FixedSignatures { hints }),
        CancellationToken::new(),
    )
}

pub fn decoder_with_signatures(
    source: Arc<CountingSource>,
    signatures: Arc<dyn SignatureService>,
    cancel: CancellationToken,
) -> (BlockDecoder, Arc<AbiResolver>) {
    let sources: Vec<Arc<dyn AbiSource>> = vec![source];
    let resolver = Arc::new(AbiResolver::new(sources, 4, cancel.clone()));
    let decoder = BlockDecoder::new(resolver.clone(), signatures, cancel);
    (decoder, resolver)
}

/// Left-pads an address into a 32-byte word.
pub fn padded(address: Address) -> B256 {
    address.into_word()
}

pub fn amount_word(amount: u64) -> [u8; 32] {
    U256::from(amount).to_be_bytes()
}

/// ERC-20 `Transfer` log.
pub fn transfer_log(index: u64, token: Address, from: Address, to: Address, amount: u64) -> Log {
    Log {
        index,
        address: token,
        topics: vec![topics::TRANSFER, padded(from), padded(to)],
        data: Bytes::copy_from_slice(&amount_word(amount)),
    }
}

/// Calldata for `transfer(to, amount)`.
pub fn transfer_calldata(to: Address, amount: u64) -> Vec<u8> {
    let mut data = TRANSFER_SELECTOR.to_vec();
    data.extend_from_slice(padded(to).as_slice());
    data.extend_from_slice(&amount_word(amount));
    data
}

pub fn sample_tx(index: u64, to: Option<Address>, input: Vec<u8>, logs: Vec<Log>) -> Transaction {
    Transaction {
        hash: B256::with_last_byte(index as u8 + 1),
        index,
        from: Address::repeat_byte(0xee),
        to,
        value: U256::ZERO,
        input: Bytes::from(input),
        receipt: Some(Receipt {
            status: true,
            gas_used: 50_000,
            contract_address: None,
            logs,
        }),
    }
}

pub fn sample_block(number: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        number,
        hash: B256::with_last_byte(number as u8),
        parent_hash: B256::ZERO,
        timestamp: 1_700_000_000 + number * 12,
        transactions,
    }
}
