//! Exchange account and name directory (Loopring REST API).

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::{eyre, Context, Result};
use lens_data::loopring::LoopringBlock;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Exchange result code for an unknown account.
const ACCOUNT_NOT_FOUND: i64 = 101_002;

/// A token listed by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeToken {
    pub token_id: u32,
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

/// Name and account lookups against an exchange.
///
/// `Ok(None)` means the exchange answered and has no record.
#[async_trait]
pub trait ExchangeDirectory: Send + Sync {
    /// Owner of an exchange name such as `alice.loopring.eth`.
    async fn address_of_name(&self, name: &str) -> Result<Option<Address>>;

    /// Exchange name registered by `owner`.
    async fn name_of(&self, owner: Address) -> Result<Option<String>>;

    /// Exchange account id of `owner`.
    async fn account_id_of(&self, owner: Address) -> Result<Option<String>>;

    /// Owner of exchange account `account_id`. Ids the exchange cannot
    /// have issued resolve to `Ok(None)`.
    async fn owner_of_account(&self, account_id: &str) -> Result<Option<Address>>;

    /// Every token listed by the exchange.
    async fn tokens(&self) -> Result<Vec<ExchangeToken>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    account_id: u64,
    owner: Address,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletEnvelope {
    #[serde(default)]
    data: String,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    result_info: ResultInfo,
}

/// [`ExchangeDirectory`] over the Loopring REST API.
pub struct LoopringApi {
    client: reqwest::Client,
    base_url: String,
}

impl LoopringApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// GETs `path`. `Ok(None)` when the exchange reports an unknown account.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err_with(|| format!("exchange request failed: {path}"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .wrap_err("failed to read exchange response")?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map(Some)
                .wrap_err_with(|| format!("unexpected exchange response for {path}"));
        }
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) if envelope.result_info.code == ACCOUNT_NOT_FOUND => Ok(None),
            Ok(envelope) => Err(eyre!(
                "exchange error {}: {}",
                envelope.result_info.code,
                envelope.result_info.message
            )),
            Err(_) => Err(eyre!("exchange returned HTTP {status} for {path}")),
        }
    }

    async fn wallet_data(&self, path: &str) -> Result<Option<String>> {
        let Some(envelope) = self.get::<WalletEnvelope>(path).await? else {
            return Ok(None);
        };
        if let Some(info) = envelope.result_info.filter(|info| info.code != 0) {
            return Err(eyre!("exchange error {}: {}", info.code, info.message));
        }
        Ok(non_empty(envelope.data))
    }

    /// Exchange block `block_id` from the block feed.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn block(&self, block_id: u64) -> Result<Option<LoopringBlock>> {
        self.get(&format!("/api/v3/block/getBlock?id={block_id}"))
            .await
    }
}

#[async_trait]
impl ExchangeDirectory for LoopringApi {
    async fn address_of_name(&self, name: &str) -> Result<Option<Address>> {
        let Some(data) = self
            .wallet_data(&format!("/api/wallet/v3/resolveEns?fullName={name}"))
            .await?
        else {
            return Ok(None);
        };
        let owner: Address = data
            .parse()
            .wrap_err_with(|| format!("exchange returned a malformed owner for {name}"))?;
        Ok((!owner.is_zero()).then_some(owner))
    }

    async fn name_of(&self, owner: Address) -> Result<Option<String>> {
        self.wallet_data(&format!("/api/wallet/v3/resolveName?owner={owner:#x}"))
            .await
    }

    async fn account_id_of(&self, owner: Address) -> Result<Option<String>> {
        let info = self
            .get::<AccountInfo>(&format!("/api/v3/account?owner={owner:#x}"))
            .await?;
        Ok(info.map(|info| info.account_id.to_string()))
    }

    async fn owner_of_account(&self, account_id: &str) -> Result<Option<Address>> {
        // Loopring account ids are numeric.
        let Ok(account_id) = account_id.parse::<u64>() else {
            return Ok(None);
        };
        let info = self
            .get::<AccountInfo>(&format!("/api/v3/account?accountId={account_id}"))
            .await?;
        Ok(info.map(|info| info.owner))
    }

    async fn tokens(&self) -> Result<Vec<ExchangeToken>> {
        Ok(self
            .get::<Vec<ExchangeToken>>("/api/v3/exchange/tokens")
            .await?
            .unwrap_or_default())
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
