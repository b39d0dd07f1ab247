//! On-chain ERC-20 metadata.

use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use eyre::{Context, Result};
use lens_data::SharedProvider;

sol! {
    #[allow(missing_docs)]
    function symbol() external view returns (string);
    #[allow(missing_docs)]
    function decimals() external view returns (uint8);
}

/// Token symbol and decimals lookup.
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    async fn symbol(&self, token: Address) -> Result<Option<String>>;

    async fn decimals(&self, token: Address) -> Result<Option<u8>>;
}

/// [`TokenMetadataSource`] calling `symbol()` and `decimals()` on the token contract.
pub struct Erc20Metadata {
    provider: SharedProvider,
}

impl Erc20Metadata {
    pub fn new(provider: SharedProvider) -> Self {
        Self { provider }
    }

    async fn call(&self, token: Address, calldata: Vec<u8>) -> Result<Bytes> {
        let request = TransactionRequest::default()
            .to(token)
            .input(Bytes::from(calldata).into());
        self.provider
            .call(request)
            .await
            .wrap_err_with(|| format!("eth_call to token {token} failed"))
    }
}

#[async_trait]
impl TokenMetadataSource for Erc20Metadata {
    async fn symbol(&self, token: Address) -> Result<Option<String>> {
        let result = self.call(token, symbolCall {}.abi_encode()).await?;
        Ok(decode_symbol(&result))
    }

    async fn decimals(&self, token: Address) -> Result<Option<u8>> {
        let result = self.call(token, decimalsCall {}.abi_encode()).await?;
        Ok(decimalsCall::abi_decode_returns(&result, false)
            .ok()
            .map(|decoded| decoded._0))
    }
}

/// Decodes a `string` symbol, or a `bytes32` one as returned by some older tokens.
fn decode_symbol(data: &[u8]) -> Option<String> {
    if let Ok(decoded) = symbolCall::abi_decode_returns(data, false) {
        return Some(decoded._0).filter(|symbol| !symbol.is_empty());
    }
    if data.len() != 32 {
        return None;
    }
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    std::str::from_utf8(&data[..end])
        .ok()
        .map(str::to_string)
        .filter(|symbol| !symbol.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolValue;

    #[test]
    fn decodes_string_symbol() {
        let encoded = ("USDC".to_string(),).abi_encode_params();
        assert_eq!(decode_symbol(&encoded).as_deref(), Some("USDC"));
    }

    #[test]
    fn decodes_bytes32_symbol() {
        let mut word = [0u8; 32];
        word[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_symbol(&word).as_deref(), Some("MKR"));
    }

    #[test]
    fn rejects_empty_results() {
        assert_eq!(decode_symbol(&[]), None);
        assert_eq!(decode_symbol(&[0u8; 32]), None);
    }
}
