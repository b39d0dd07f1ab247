//! Fungible token metadata registry.

use std::sync::Arc;

use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};
use eyre::{Context, Result};
use lens_data::store::{RecordStore, TOKENS};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::exchange::{ExchangeDirectory, ExchangeToken};
use crate::field::Field;
use crate::metadata::TokenMetadataSource;
use crate::registry::{Record, RecordId, Registry};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenInfo {
    pub symbol: Field<String>,
    pub address: Field<Address>,
    pub decimals: Field<u8>,
    #[serde(rename = "exchangeTokenId")]
    pub token_id: Field<u32>,
}

impl TokenInfo {
    /// Renders a raw integer amount with the token's decimals, `None` until they are known.
    pub fn format_amount(&self, raw: U256) -> Option<String> {
        let decimals = *self.decimals.known()?;
        format_units(raw, decimals).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKey {
    Address(Address),
    /// Upper-cased symbol.
    Symbol(String),
    TokenId(u32),
}

impl TokenKey {
    /// A hex address, a numeric exchange token id, or else a symbol.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if let Ok(address) = value.parse::<Address>() {
            return Self::Address(address);
        }
        if let Ok(token_id) = value.parse::<u32>() {
            return Self::TokenId(token_id);
        }
        Self::Symbol(value.to_ascii_uppercase())
    }

    fn store_key(&self) -> String {
        match self {
            Self::Address(address) => format!("{address:#x}"),
            Self::Symbol(symbol) => symbol.clone(),
            Self::TokenId(id) => format!("#{id}"),
        }
    }

    fn seed(&self) -> TokenInfo {
        let mut token = TokenInfo::default();
        match self {
            Self::Address(address) => token.address = Field::Known(*address),
            Self::Symbol(symbol) => token.symbol = Field::Known(symbol.clone()),
            Self::TokenId(id) => token.token_id = Field::Known(*id),
        }
        token
    }
}

impl Record for TokenInfo {
    type Key = TokenKey;

    fn keys(&self) -> Vec<TokenKey> {
        let mut keys = Vec::new();
        if let Some(address) = self.address.known() {
            keys.push(TokenKey::Address(*address));
        }
        if let Some(symbol) = self.symbol.known() {
            keys.push(TokenKey::Symbol(symbol.to_ascii_uppercase()));
        }
        if let Some(id) = self.token_id.known() {
            keys.push(TokenKey::TokenId(*id));
        }
        keys
    }
}

pub struct TokenRegistry {
    records: Registry<TokenInfo>,
    metadata: Arc<dyn TokenMetadataSource>,
    exchange: Arc<dyn ExchangeDirectory>,
    // Fetched once per process; a failed fetch is retried on next use.
    listing: OnceCell<Vec<ExchangeToken>>,
}

impl TokenRegistry {
    pub fn load(
        store: Arc<dyn RecordStore>,
        metadata: Arc<dyn TokenMetadataSource>,
        exchange: Arc<dyn ExchangeDirectory>,
    ) -> Result<Self> {
        Ok(Self {
            records: Registry::load(TOKENS, store)?,
            metadata,
            exchange,
            listing: OnceCell::new(),
        })
    }

    /// Token identified by `value`, created blank when unseen.
    pub fn get(&self, value: &str) -> Result<RecordId> {
        let key = TokenKey::parse(value);
        let store_key = key.store_key();
        let seed = key.clone();
        self.records.get_or_create(key, store_key, || seed.seed())
    }

    pub fn find(&self, value: &str) -> Result<Option<RecordId>> {
        self.records.find(&TokenKey::parse(value))
    }

    pub fn token(&self, id: RecordId) -> Result<TokenInfo> {
        self.records.snapshot(id)
    }

    pub fn tokens(&self) -> Result<Vec<TokenInfo>> {
        self.records.all()
    }

    async fn listing(&self) -> Result<&[ExchangeToken]> {
        let tokens = self
            .listing
            .get_or_try_init(|| async {
                self.exchange
                    .tokens()
                    .await
                    .wrap_err("failed to fetch exchange token list")
            })
            .await?;
        Ok(tokens.as_slice())
    }

    fn settle<T: Clone>(
        &self,
        id: RecordId,
        field: &'static str,
        select: fn(&mut TokenInfo) -> &mut Field<T>,
        outcome: Result<Option<T>>,
    ) -> Result<Field<T>> {
        if let Err(err) = &outcome {
            tracing::warn!(?id, field, error = %err, "token lookup failed");
        }
        self.records.settle(id, select, Field::from_lookup(outcome))?;
        let mut token = self.records.snapshot(id)?;
        Ok(select(&mut token).clone())
    }

    /// Contract address from the exchange token list, by token id or symbol.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve_address(&self, id: RecordId) -> Result<Field<Address>> {
        let token = self.records.snapshot(id)?;
        if !token.address.needs_lookup() {
            return Ok(token.address);
        }
        let outcome = match (token.token_id.known(), token.symbol.known()) {
            (None, None) => return Ok(token.address),
            (token_id, symbol) => self.listing().await.map(|listing| {
                listing
                    .iter()
                    .find(|listed| match token_id {
                        Some(token_id) => listed.token_id == *token_id,
                        None => symbol.is_some_and(|s| listed.symbol.eq_ignore_ascii_case(s)),
                    })
                    .map(|listed| listed.address)
            }),
        };
        self.settle(id, "address", |token| &mut token.address, outcome)
    }

    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve_symbol(&self, id: RecordId) -> Result<Field<String>> {
        let token = self.records.snapshot(id)?;
        if !token.symbol.needs_lookup() {
            return Ok(token.symbol);
        }
        let Some(address) = token.address.known().copied() else {
            return Ok(token.symbol);
        };
        let outcome = self.metadata.symbol(address).await;
        self.settle(id, "symbol", |token| &mut token.symbol, outcome)
    }

    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve_decimals(&self, id: RecordId) -> Result<Field<u8>> {
        let token = self.records.snapshot(id)?;
        if !token.decimals.needs_lookup() {
            return Ok(token.decimals);
        }
        let Some(address) = token.address.known().copied() else {
            return Ok(token.decimals);
        };
        let outcome = self.metadata.decimals(address).await;
        self.settle(id, "decimals", |token| &mut token.decimals, outcome)
    }

    /// Exchange token id listed for the token's address.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve_exchange_id(&self, id: RecordId) -> Result<Field<u32>> {
        let token = self.records.snapshot(id)?;
        if !token.token_id.needs_lookup() {
            return Ok(token.token_id);
        }
        let Some(address) = token.address.known().copied() else {
            return Ok(token.token_id);
        };
        let outcome = self.listing().await.map(|listing| {
            listing
                .iter()
                .find(|listed| listed.address == address)
                .map(|listed| listed.token_id)
        });
        self.settle(id, "exchangeTokenId", |token| &mut token.token_id, outcome)
    }

    /// Fills every unresolved field, address first.
    pub async fn resolve_all(&self, id: RecordId) -> Result<TokenInfo> {
        self.resolve_address(id).await?;
        self.resolve_symbol(id).await?;
        self.resolve_decimals(id).await?;
        self.resolve_exchange_id(id).await?;
        self.records.snapshot(id)
    }

    /// Formats `raw` for the token identified by `value`, resolving its decimals if needed.
    pub async fn format_amount(&self, value: &str, raw: U256) -> Result<Option<String>> {
        let id = self.get(value)?;
        if self.records.snapshot(id)?.address.needs_lookup() {
            self.resolve_address(id).await?;
        }
        self.resolve_decimals(id).await?;
        Ok(self.records.snapshot(id)?.format_amount(raw))
    }
}
