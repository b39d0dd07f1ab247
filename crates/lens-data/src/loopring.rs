//! Loopring exchange block feed.
//!
//! The exchange publishes blocks of layer-2 transactions as JSON. Each
//! transaction kind has its own shape, tagged by `txType`; [`LoopringTx`]
//! models them as one enum and [`LoopringTx::normalize`] is the single place
//! each variant is converted into the flat [`NormalizedTx`] shape used
//! downstream.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Basis-point denominator.
const BIPS_BASE: u64 = 10_000;

/// One exchange block as returned by the block feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopringBlock {
    pub block_id: u64,
    #[serde(default)]
    pub block_size: u32,
    /// Block creation time (milliseconds since epoch on the wire).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub transactions: Vec<LoopringTx>,
}

impl LoopringBlock {
    /// Normalizes every transaction in block order.
    pub fn normalized(&self) -> Vec<NormalizedTx> {
        self.transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| tx.normalize(self.block_id, index))
            .collect()
    }
}

/// A token amount as carried by the feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAmount {
    pub token_id: u32,
    #[serde(deserialize_with = "de_amount")]
    pub amount: U256,
}

/// One side of a spot trade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(alias = "accountID")]
    pub account_id: u32,
    pub token_s: u32,
    pub token_b: u32,
    #[serde(deserialize_with = "de_amount")]
    pub fill_s: U256,
    #[serde(default)]
    pub fee_bips: u32,
}

/// Layer-2 transaction variants, tagged by `txType`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "txType")]
pub enum LoopringTx {
    #[serde(rename_all = "camelCase")]
    Deposit {
        to_account_id: u32,
        to_address: Address,
        token: TokenAmount,
    },
    #[serde(rename_all = "camelCase")]
    Withdraw {
        account_id: u32,
        to_address: Address,
        token: TokenAmount,
        fee: Option<TokenAmount>,
    },
    #[serde(rename_all = "camelCase")]
    Transfer {
        account_id: u32,
        to_account_id: u32,
        to_address: Option<Address>,
        token: TokenAmount,
        fee: Option<TokenAmount>,
    },
    #[serde(rename = "SpotTrade", alias = "Swap", rename_all = "camelCase")]
    Swap { order_a: Order, order_b: Order },
    #[serde(rename_all = "camelCase")]
    Mint {
        to_account_id: u32,
        to_address: Option<Address>,
        token: TokenAmount,
    },
    #[serde(rename_all = "camelCase")]
    AccountUpdate {
        account_id: u32,
        owner: Address,
        fee: Option<TokenAmount>,
    },
    #[serde(rename_all = "camelCase")]
    AmmUpdate {
        account_id: u32,
        owner: Address,
        token_id: u32,
        #[serde(default)]
        fee_bips: u32,
    },
    #[serde(rename_all = "camelCase")]
    NftMint {
        minter_account_id: u32,
        to_account_id: u32,
        nft_token: TokenAmount,
        fee: Option<TokenAmount>,
    },
}

/// Kind of a normalized transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdraw,
    Transfer,
    Swap,
    Mint,
    AccountUpdate,
    AmmUpdate,
    NftMint,
}

/// Flat per-transaction shape shared by every variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTx {
    pub block_id: u64,
    pub index: usize,
    pub kind: TxKind,
    pub from_account: Option<u32>,
    pub to_account: Option<u32>,
    pub address: Option<Address>,
    pub token: Option<u32>,
    pub value: U256,
    pub token2: Option<u32>,
    pub value2: U256,
    pub fee_token: Option<u32>,
    pub fee: U256,
    pub fee_bips: u32,
}

impl NormalizedTx {
    fn empty(block_id: u64, index: usize, kind: TxKind) -> Self {
        Self {
            block_id,
            index,
            kind,
            from_account: None,
            to_account: None,
            address: None,
            token: None,
            value: U256::ZERO,
            token2: None,
            value2: U256::ZERO,
            fee_token: None,
            fee: U256::ZERO,
            fee_bips: 0,
        }
    }

    fn with_fee(mut self, fee: Option<&TokenAmount>) -> Self {
        if let Some(fee) = fee {
            self.fee_token = Some(fee.token_id);
            self.fee = fee.amount;
        }
        self
    }
}

impl LoopringTx {
    /// The kind of this transaction.
    pub fn kind(&self) -> TxKind {
        match self {
            LoopringTx::Deposit { .. } => TxKind::Deposit,
            LoopringTx::Withdraw { .. } => TxKind::Withdraw,
            LoopringTx::Transfer { .. } => TxKind::Transfer,
            LoopringTx::Swap { .. } => TxKind::Swap,
            LoopringTx::Mint { .. } => TxKind::Mint,
            LoopringTx::AccountUpdate { .. } => TxKind::AccountUpdate,
            LoopringTx::AmmUpdate { .. } => TxKind::AmmUpdate,
            LoopringTx::NftMint { .. } => TxKind::NftMint,
        }
    }

    /// Converts this transaction into the normalized shape.
    pub fn normalize(&self, block_id: u64, index: usize) -> NormalizedTx {
        let base = NormalizedTx::empty(block_id, index, self.kind());
        match self {
            LoopringTx::Deposit {
                to_account_id,
                to_address,
                token,
            } => NormalizedTx {
                to_account: Some(*to_account_id),
                address: Some(*to_address),
                token: Some(token.token_id),
                value: token.amount,
                ..base
            },
            LoopringTx::Withdraw {
                account_id,
                to_address,
                token,
                fee,
            } => NormalizedTx {
                from_account: Some(*account_id),
                address: Some(*to_address),
                token: Some(token.token_id),
                value: token.amount,
                ..base
            }
            .with_fee(fee.as_ref()),
            LoopringTx::Transfer {
                account_id,
                to_account_id,
                to_address,
                token,
                fee,
            } => NormalizedTx {
                from_account: Some(*account_id),
                to_account: Some(*to_account_id),
                address: *to_address,
                token: Some(token.token_id),
                value: token.amount,
                ..base
            }
            .with_fee(fee.as_ref()),
            LoopringTx::Swap { order_a, order_b } => {
                // The fee rate is taken from whichever order carries one, but it
                // is always charged on order A's sold side.
                let fee_bips = if order_a.fee_bips != 0 {
                    order_a.fee_bips
                } else {
                    order_b.fee_bips
                };
                NormalizedTx {
                    from_account: Some(order_a.account_id),
                    to_account: Some(order_b.account_id),
                    token: Some(order_a.token_s),
                    value: order_a.fill_s,
                    token2: Some(order_b.token_s),
                    value2: order_b.fill_s,
                    fee_token: Some(order_a.token_s),
                    fee: order_a.fill_s * U256::from(fee_bips) / U256::from(BIPS_BASE),
                    fee_bips,
                    ..base
                }
            }
            LoopringTx::Mint {
                to_account_id,
                to_address,
                token,
            } => NormalizedTx {
                to_account: Some(*to_account_id),
                address: *to_address,
                token: Some(token.token_id),
                value: token.amount,
                ..base
            },
            LoopringTx::AccountUpdate {
                account_id,
                owner,
                fee,
            } => NormalizedTx {
                from_account: Some(*account_id),
                address: Some(*owner),
                ..base
            }
            .with_fee(fee.as_ref()),
            LoopringTx::AmmUpdate {
                account_id,
                owner,
                token_id,
                fee_bips,
            } => NormalizedTx {
                from_account: Some(*account_id),
                address: Some(*owner),
                token: Some(*token_id),
                fee_bips: *fee_bips,
                ..base
            },
            LoopringTx::NftMint {
                minter_account_id,
                to_account_id,
                nft_token,
                fee,
            } => NormalizedTx {
                from_account: Some(*minter_account_id),
                to_account: Some(*to_account_id),
                token: Some(nft_token.token_id),
                value: nft_token.amount,
                ..base
            }
            .with_fee(fee.as_ref()),
        }
    }
}

/// Accepts amounts as decimal strings, `0x` hex strings or JSON integers.
fn de_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(U256::from(n)),
        Raw::Text(s) => {
            let parsed = match s.strip_prefix("0x") {
                Some(hex) => U256::from_str_radix(hex, 16),
                None => U256::from_str_radix(&s, 10),
            };
            parsed.map_err(serde::de::Error::custom)
        }
    }
}
