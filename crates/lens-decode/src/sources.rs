//! ABI sources consulted by the resolver, in priority order.
//!
//! - [`BytecodeDb`]: local ABIs keyed by the hash of deployed bytecode, so
//!   every clone of a known contract decodes without a network lookup.
//! - [`Sourcify`]: verified-source repository queried by address.

use std::sync::Arc;

use alloy::primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use dashmap::DashMap;
use eyre::{Context, Result};
use lens_data::store::{SqliteStore, StoredAbi};
use lens_data::ChainClient;

/// A place an ABI can be looked up by contract address.
#[async_trait]
pub trait AbiSource: Send + Sync {
    /// Short name recorded as the ABI's origin.
    fn name(&self) -> &'static str;

    /// JSON ABI array for `address`, `Ok(None)` when this source has none.
    async fn fetch_abi(&self, address: Address) -> Result<Option<String>>;

    /// Offered every ABI a lower-priority source found for `address`.
    async fn remember(&self, _address: Address, _abi_json: &str, _source: &str) -> Result<()> {
        Ok(())
    }
}

/// ABIs stored locally by deployed-bytecode hash.
pub struct BytecodeDb {
    chain: Arc<dyn ChainClient>,
    store: Arc<SqliteStore>,
    code_hashes: DashMap<Address, B256>,
}

impl BytecodeDb {
    pub fn new(chain: Arc<dyn ChainClient>, store: Arc<SqliteStore>) -> Self {
        Self {
            chain,
            store,
            code_hashes: DashMap::new(),
        }
    }

    /// Hash of the code deployed at `address`, `None` for accounts without code.
    async fn code_hash(&self, address: Address) -> Result<Option<B256>> {
        if let Some(hash) = self.code_hashes.get(&address) {
            return Ok(Some(*hash));
        }
        let code = self.chain.code_at(address).await?;
        if code.is_empty() {
            return Ok(None);
        }
        let hash = keccak256(&code);
        self.code_hashes.insert(address, hash);
        Ok(Some(hash))
    }

    /// Stores an ABI for the bytecode currently deployed at `address`.
    ///
    /// # Errors
    /// Returns error if the address has no code or the store rejects the insert.
    pub async fn import(&self, address: Address, abi_json: &str, source: &str) -> Result<B256> {
        let code_hash = self
            .code_hash(address)
            .await?
            .ok_or_else(|| eyre::eyre!("no contract code at {address}"))?;
        self.store.insert_abi(&StoredAbi {
            code_hash,
            address,
            abi_json: abi_json.to_string(),
            source: source.to_string(),
        })?;
        Ok(code_hash)
    }
}

#[async_trait]
impl AbiSource for BytecodeDb {
    fn name(&self) -> &'static str {
        "bytecode-db"
    }

    async fn fetch_abi(&self, address: Address) -> Result<Option<String>> {
        let Some(code_hash) = self.code_hash(address).await? else {
            return Ok(None);
        };
        let stored = self.store.abi_by_code_hash(code_hash)?;
        if let Some(stored) = &stored {
            tracing::trace!(%address, %code_hash, learned_from = %stored.address, "bytecode hash hit");
        }
        Ok(stored.map(|stored| stored.abi_json))
    }

    async fn remember(&self, address: Address, abi_json: &str, source: &str) -> Result<()> {
        // Only addresses seen by fetch_abi have a cached hash; others are skipped.
        let Some(code_hash) = self.code_hashes.get(&address).map(|hash| *hash) else {
            return Ok(());
        };
        self.store.insert_abi(&StoredAbi {
            code_hash,
            address,
            abi_json: abi_json.to_string(),
            source: source.to_string(),
        })
    }
}

/// Sourcify verified-contract lookup.
///
/// `GET {base}/v2/contract/{chainId}/{address}?fields=abi` returning `{"abi": [...]}`.
pub struct Sourcify {
    client: reqwest::Client,
    base_url: String,
    chain_id: u64,
}

impl Sourcify {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chain_id,
        }
    }

    fn url(&self, address: Address) -> String {
        format!(
            "{}/v2/contract/{}/{address}?fields=abi",
            self.base_url, self.chain_id
        )
    }
}

#[async_trait]
impl AbiSource for Sourcify {
    fn name(&self) -> &'static str {
        "sourcify"
    }

    async fn fetch_abi(&self, address: Address) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url(address))
            .send()
            .await
            .wrap_err_with(|| format!("sourcify request failed for {address}"))?;
        if !response.status().is_success() {
            tracing::trace!(%address, status = %response.status(), "sourcify has no match");
            return Ok(None);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .wrap_err("sourcify returned invalid JSON")?;
        Ok(abi_field(&body))
    }
}

/// The `abi` field as a JSON string, `None` when missing or empty.
fn abi_field(body: &serde_json::Value) -> Option<String> {
    let abi = body.get("abi")?;
    match abi.as_array() {
        Some(items) if !items.is_empty() => Some(abi.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sourcify_url_includes_chain_and_address() {
        let source = Sourcify::new(reqwest::Client::new(), "https://sourcify.dev/server/", 10);
        let url = source.url(Address::repeat_byte(0x01));
        assert_eq!(
            url,
            "https://sourcify.dev/server/v2/contract/10/0x0101010101010101010101010101010101010101?fields=abi"
        );
    }

    #[test]
    fn empty_or_missing_abi_is_not_found() {
        assert_eq!(abi_field(&json!({"abi": []})), None);
        assert_eq!(abi_field(&json!({"abi": null})), None);
        assert_eq!(abi_field(&json!({"match": "exact_match"})), None);

        let body = json!({"abi": [{"type": "function", "name": "f", "inputs": [], "outputs": [], "stateMutability": "view"}]});
        let abi = abi_field(&body).expect("abi present");
        assert!(abi.starts_with('['));
    }
}
