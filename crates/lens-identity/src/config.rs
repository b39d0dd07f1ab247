//! Identity resolution configuration.

use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default exchange REST API root.
pub const DEFAULT_EXCHANGE_URL: &str = "https://api3.loopring.io";
/// Default suffix of names registered with the exchange.
pub const DEFAULT_EXCHANGE_SUFFIX: &str = ".loopring.eth";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub exchange_url: String,
    /// Names ending with this suffix are exchange names rather than plain ENS names.
    pub exchange_suffix: String,
    pub http_timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            exchange_url: DEFAULT_EXCHANGE_URL.to_string(),
            exchange_suffix: DEFAULT_EXCHANGE_SUFFIX.to_string(),
            http_timeout_secs: 10,
        }
    }
}

impl IdentityConfig {
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .build()
            .wrap_err("failed to build HTTP client")
    }
}
