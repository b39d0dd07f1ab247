//! Merging peer and token records into one record per address.

use std::collections::BTreeMap;

use alloy::primitives::Address;
use eyre::{Context, Result};
use lens_data::store::{load_typed, RecordStore, ONES, PEERS, TOKENS};
use serde::{Deserialize, Serialize};

use crate::field::Field;
use crate::peer::Peer;
use crate::token::TokenInfo;

/// Identity and token metadata known for one address.
///
/// Contract ABIs are not copied here. They live in the `contract_abis` table
/// keyed by deployed-bytecode hash, where [`lens_data::SqliteStore::abi_by_code_hash`]
/// finds them for every address running the same code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct One {
    pub address: Field<Address>,
    pub ens: Field<String>,
    #[serde(rename = "loopringENS")]
    pub loopring_ens: Field<String>,
    #[serde(rename = "loopringID")]
    pub loopring_id: Field<String>,
    pub symbol: Field<String>,
    pub decimals: Field<u8>,
    #[serde(rename = "exchangeTokenId")]
    pub token_id: Field<u32>,
}

fn entry(ones: &mut BTreeMap<String, One>, address: Address) -> &mut One {
    ones.entry(format!("{address:#x}")).or_insert_with(|| One {
        address: Field::Known(address),
        ..One::default()
    })
}

/// Builds the merged view keyed by lowercase hex address.
///
/// Peers are applied first and tokens second, so a token field that is not
/// `Unknown` wins over anything a peer carried. Records without a known
/// address have nothing to merge on and are left out.
pub fn merge(peers: &[Peer], tokens: &[TokenInfo]) -> BTreeMap<String, One> {
    let mut ones = BTreeMap::new();
    for peer in peers {
        let Some(address) = peer.address.known().copied() else {
            continue;
        };
        let one = entry(&mut ones, address);
        one.ens.merge_from(&peer.ens);
        one.loopring_ens.merge_from(&peer.loopring_ens);
        one.loopring_id.merge_from(&peer.loopring_id);
    }
    for token in tokens {
        let Some(address) = token.address.known().copied() else {
            continue;
        };
        let one = entry(&mut ones, address);
        one.symbol.merge_from(&token.symbol);
        one.decimals.merge_from(&token.decimals);
        one.token_id.merge_from(&token.token_id);
    }
    ones
}

/// Loads every peer and token, merges them and replaces the stored `ones` set.
#[tracing::instrument(skip(store))]
pub fn consolidate_ones(store: &dyn RecordStore) -> Result<BTreeMap<String, One>> {
    let peers: Vec<Peer> = load_typed(store, PEERS)?
        .into_iter()
        .map(|(_, peer)| peer)
        .collect();
    let tokens: Vec<TokenInfo> = load_typed(store, TOKENS)?
        .into_iter()
        .map(|(_, token)| token)
        .collect();

    let ones = merge(&peers, &tokens);
    let records = ones
        .iter()
        .map(|(key, one)| serde_json::to_value(one).map(|body| (key.clone(), body)))
        .collect::<Result<Vec<_>, serde_json::Error>>()
        .wrap_err("failed to serialize merged records")?;
    store.replace_all(ONES, &records)?;

    tracing::info!(
        peers = peers.len(),
        tokens = tokens.len(),
        ones = ones.len(),
        "identities consolidated"
    );
    Ok(ones)
}
