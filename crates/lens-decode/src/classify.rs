//! Token movement classification for decoded logs.
//!
//! Maps a log's event signature and its from/to addresses to an [`Action`].
//! Addresses come from indexed topics first and from decoded parameters when
//! the emitting contract did not index them.

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::value::{canonical_word, ParamValue, Params};

/// Event signatures recognized by [`classify`].
pub mod topics {
    use alloy::primitives::B256;
    use alloy::sol;
    use alloy::sol_types::SolEvent;

    sol! {
        #[allow(missing_docs)]
        event Transfer(address indexed from, address indexed to, uint256 value);
        #[allow(missing_docs)]
        event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value);
        #[allow(missing_docs)]
        event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);
        #[allow(missing_docs)]
        event Deposit(address indexed dst, uint256 wad);
        #[allow(missing_docs)]
        event Withdrawal(address indexed src, uint256 wad);
    }

    /// ERC-20 and ERC-721 `Transfer`.
    pub const TRANSFER: B256 = <Transfer as SolEvent>::SIGNATURE_HASH;
    /// ERC-1155 `TransferSingle`.
    pub const TRANSFER_SINGLE: B256 = <TransferSingle as SolEvent>::SIGNATURE_HASH;
    /// ERC-1155 `TransferBatch`.
    pub const TRANSFER_BATCH: B256 = <TransferBatch as SolEvent>::SIGNATURE_HASH;
    /// WETH-style `Deposit`.
    pub const DEPOSIT: B256 = <Deposit as SolEvent>::SIGNATURE_HASH;
    /// WETH-style `Withdrawal`.
    pub const WITHDRAWAL: B256 = <Withdrawal as SolEvent>::SIGNATURE_HASH;
}

/// What a log did to token balances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Value moved between two non-zero addresses.
    Transfer,
    /// Value created: sent from the zero address.
    Mint,
    /// Value destroyed: sent to the zero address.
    Burn,
    Deposit,
    Withdraw,
    /// Not a token movement.
    #[default]
    None,
}

const FROM_NAMES: [&str; 3] = ["from", "_from", "src"];
const TO_NAMES: [&str; 3] = ["to", "_to", "dst"];

/// Classifies a log from its topic0, its indexed topics as addresses, and its
/// decoded parameters.
pub fn classify(topic0: B256, indexed: &[Option<Address>], params: &Params) -> Action {
    if topic0 == topics::DEPOSIT {
        return Action::Deposit;
    }
    if topic0 == topics::WITHDRAWAL {
        return Action::Withdraw;
    }

    // ERC-1155 puts the operator first, so from/to shift by one topic.
    let offset = if topic0 == topics::TRANSFER {
        0
    } else if topic0 == topics::TRANSFER_SINGLE || topic0 == topics::TRANSFER_BATCH {
        1
    } else {
        return Action::None;
    };

    let from = indexed
        .get(offset)
        .copied()
        .flatten()
        .or_else(|| params.address_of(&FROM_NAMES));
    let to = indexed
        .get(offset + 1)
        .copied()
        .flatten()
        .or_else(|| params.address_of(&TO_NAMES));

    match (from, to) {
        (Some(from), Some(to)) => movement(from, to),
        _ => Action::None,
    }
}

fn movement(from: Address, to: Address) -> Action {
    match (from.is_zero(), to.is_zero()) {
        (true, true) => Action::None,
        (true, false) => Action::Mint,
        (false, true) => Action::Burn,
        (false, false) => Action::Transfer,
    }
}

/// Reads indexed topics as addresses where they are zero-padded accounts.
pub fn indexed_addresses(indexed: &[B256]) -> Vec<Option<Address>> {
    indexed
        .iter()
        .map(|topic| match canonical_word(*topic) {
            ParamValue::Address(address) => Some(address),
            _ => None,
        })
        .collect()
}
