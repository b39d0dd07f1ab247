//! ENS forward and reverse resolution through raw contract calls.

use alloy::primitives::{address, keccak256, Address, Bytes, B256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use eyre::{Context, Result};
use lens_data::SharedProvider;

/// ENS registry address on Ethereum mainnet.
const ENS_REGISTRY: Address = address!("00000000000C2E074eC69A0dFb2997BA6C7d2e1e");

sol! {
    #[allow(missing_docs)]
    function resolver(bytes32 node) external view returns (address);
    #[allow(missing_docs)]
    function addr(bytes32 node) external view returns (address);
    #[allow(missing_docs)]
    function name(bytes32 node) external view returns (string);
}

/// Name to address and address to name resolution.
///
/// `Ok(None)` means the name service answered and has no record.
#[async_trait]
pub trait NameService: Send + Sync {
    async fn resolve_name(&self, name: &str) -> Result<Option<Address>>;

    async fn lookup_address(&self, address: Address) -> Result<Option<String>>;
}

/// [`NameService`] backed by the on-chain ENS registry.
pub struct EnsResolver {
    provider: SharedProvider,
}

impl EnsResolver {
    pub fn new(provider: SharedProvider) -> Self {
        Self { provider }
    }

    async fn call(&self, to: Address, calldata: Vec<u8>) -> Result<Bytes> {
        let request = TransactionRequest::default()
            .to(to)
            .input(Bytes::from(calldata).into());
        self.provider
            .call(request)
            .await
            .wrap_err_with(|| format!("eth_call to {to} failed"))
    }

    /// Resolver contract for `node`, `None` when unset.
    async fn resolver_of(&self, node: B256) -> Result<Option<Address>> {
        let result = self
            .call(ENS_REGISTRY, resolverCall { node }.abi_encode())
            .await?;
        Ok(parse_address(&result).filter(|resolver| !resolver.is_zero()))
    }
}

#[async_trait]
impl NameService for EnsResolver {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn resolve_name(&self, name: &str) -> Result<Option<Address>> {
        let node = namehash(name);
        let Some(resolver) = self.resolver_of(node).await? else {
            return Ok(None);
        };
        let result = self.call(resolver, addrCall { node }.abi_encode()).await?;
        Ok(parse_address(&result).filter(|address| !address.is_zero()))
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn lookup_address(&self, address: Address) -> Result<Option<String>> {
        let node = namehash(&reverse_name(address));
        let Some(resolver) = self.resolver_of(node).await? else {
            return Ok(None);
        };
        let result = self.call(resolver, nameCall { node }.abi_encode()).await?;
        let Ok(decoded) = nameCall::abi_decode_returns(&result, false) else {
            return Ok(None);
        };
        let name = decoded._0;
        if name.is_empty() {
            return Ok(None);
        }

        // A reverse record only counts when the name resolves back to the address.
        match self.resolve_name(&name).await? {
            Some(forward) if forward == address => Ok(Some(name)),
            _ => {
                tracing::debug!(%address, %name, "reverse record does not resolve back");
                Ok(None)
            }
        }
    }
}

/// EIP-137 namehash.
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(node.as_slice());
        combined[32..].copy_from_slice(keccak256(label.as_bytes()).as_slice());
        node = keccak256(combined);
    }
    node
}

/// The `addr.reverse` name for `address`.
fn reverse_name(address: Address) -> String {
    let hex = format!("{address:x}");
    format!("{}.addr.reverse", hex.trim_start_matches("0x"))
}

/// Address in the last 20 bytes of a 32-byte return word.
fn parse_address(data: &Bytes) -> Option<Address> {
    (data.len() >= 32).then(|| Address::from_slice(&data[12..32]))
}
