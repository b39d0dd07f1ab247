//! Decoder configuration.

use std::time::Duration;

use alloy::primitives::Address;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::userops::entry_points;

/// Default Sourcify server root.
pub const DEFAULT_SOURCIFY_URL: &str = "https://sourcify.dev/server";
/// Default OpenChain signature database root.
pub const DEFAULT_SIGNATURE_URL: &str = "https://api.openchain.xyz";

/// Tunables for ABI resolution and block decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Chain id used for verified-source lookups.
    pub chain_id: u64,
    /// Sourcify server root, `None` disables the lookup.
    pub sourcify_url: Option<String>,
    /// Signature database root, `None` disables hints.
    pub signature_url: Option<String>,
    /// ERC-4337 bundler JSON-RPC endpoint, `None` disables user operation decoding.
    pub bundler_url: Option<String>,
    /// Maximum ABI fetches in flight across all blocks.
    pub max_concurrent_fetches: usize,
    /// Selectors or topics per signature lookup request.
    pub signature_batch_size: usize,
    /// Timeout for every outbound HTTP request.
    pub http_timeout_secs: u64,
    /// Account-abstraction EntryPoint contracts whose transactions carry user operations.
    pub entry_points: Vec<Address>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            sourcify_url: Some(DEFAULT_SOURCIFY_URL.to_string()),
            signature_url: Some(DEFAULT_SIGNATURE_URL.to_string()),
            bundler_url: None,
            max_concurrent_fetches: 8,
            signature_batch_size: 50,
            http_timeout_secs: 10,
            entry_points: entry_points::ALL.to_vec(),
        }
    }
}

impl DecoderConfig {
    /// HTTP client shared by the remote ABI and signature sources.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .user_agent(concat!("lens/", env!("CARGO_PKG_VERSION")))
            .build()
            .wrap_err("failed to build HTTP client")
    }
}
