//! Peer records and the peer registry.

use std::sync::Arc;

use alloy::primitives::Address;
use eyre::{bail, Result};
use lens_data::store::{RecordStore, PEERS};
use serde::{Deserialize, Serialize};

use crate::config::IdentityConfig;
use crate::ens::NameService;
use crate::exchange::ExchangeDirectory;
use crate::field::Field;
use crate::registry::{Record, RecordId, Registry};

/// Identity of a chain or exchange participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Peer {
    pub address: Field<Address>,
    pub ens: Field<String>,
    #[serde(rename = "loopringENS")]
    pub loopring_ens: Field<String>,
    /// Exchange account identifier, kept as given.
    #[serde(rename = "loopringID")]
    pub loopring_id: Field<String>,
}

/// Value a peer can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerKey {
    Address(Address),
    Ens(String),
    ExchangeEns(String),
    AccountId(String),
}

impl PeerKey {
    /// Classifies a probe value by shape.
    ///
    /// A hex address, a name ending in `exchange_suffix`, any other dotted
    /// name, and otherwise an opaque exchange account id.
    pub fn parse(value: &str, exchange_suffix: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            bail!("cannot identify a peer from an empty value");
        }
        if let Ok(address) = value.parse::<Address>() {
            return Ok(Self::Address(address));
        }
        let lower = value.to_ascii_lowercase();
        if lower.ends_with(&exchange_suffix.to_ascii_lowercase()) {
            return Ok(Self::ExchangeEns(lower));
        }
        if lower.contains('.') {
            return Ok(Self::Ens(lower));
        }
        Ok(Self::AccountId(value.to_string()))
    }

    /// Key the record is persisted under.
    fn store_key(&self) -> String {
        match self {
            Self::Address(address) => format!("{address:#x}"),
            Self::Ens(name) | Self::ExchangeEns(name) | Self::AccountId(name) => name.clone(),
        }
    }

    fn seed(&self) -> Peer {
        let mut peer = Peer::default();
        match self {
            Self::Address(address) => peer.address = Field::Known(*address),
            Self::Ens(name) => peer.ens = Field::Known(name.clone()),
            Self::ExchangeEns(name) => peer.loopring_ens = Field::Known(name.clone()),
            Self::AccountId(id) => peer.loopring_id = Field::Known(id.clone()),
        }
        peer
    }
}

impl Record for Peer {
    type Key = PeerKey;

    fn keys(&self) -> Vec<PeerKey> {
        let mut keys = Vec::new();
        if let Some(address) = self.address.known() {
            keys.push(PeerKey::Address(*address));
        }
        if let Some(name) = self.ens.known() {
            keys.push(PeerKey::Ens(name.to_ascii_lowercase()));
        }
        if let Some(name) = self.loopring_ens.known() {
            keys.push(PeerKey::ExchangeEns(name.to_ascii_lowercase()));
        }
        if let Some(id) = self.loopring_id.known() {
            keys.push(PeerKey::AccountId(id.clone()));
        }
        keys
    }
}

/// Lookup-or-create registry of [`Peer`]s with lazy field resolution.
///
/// Every `resolve_*` method returns the field untouched without a network
/// call once it is `Absent` or `Known`.
pub struct PeerRegistry {
    records: Registry<Peer>,
    names: Arc<dyn NameService>,
    exchange: Arc<dyn ExchangeDirectory>,
    exchange_suffix: String,
}

impl PeerRegistry {
    pub fn load(
        store: Arc<dyn RecordStore>,
        names: Arc<dyn NameService>,
        exchange: Arc<dyn ExchangeDirectory>,
        config: &IdentityConfig,
    ) -> Result<Self> {
        Ok(Self {
            records: Registry::load(PEERS, store)?,
            names,
            exchange,
            exchange_suffix: config.exchange_suffix.clone(),
        })
    }

    pub fn parse_key(&self, value: &str) -> Result<PeerKey> {
        PeerKey::parse(value, &self.exchange_suffix)
    }

    /// Peer identified by `value`, created blank when unseen.
    pub fn get(&self, value: &str) -> Result<RecordId> {
        let key = self.parse_key(value)?;
        let store_key = key.store_key();
        let seed = key.clone();
        self.records.get_or_create(key, store_key, || seed.seed())
    }

    pub fn find(&self, value: &str) -> Result<Option<RecordId>> {
        self.records.find(&self.parse_key(value)?)
    }

    pub fn peer(&self, id: RecordId) -> Result<Peer> {
        self.records.snapshot(id)
    }

    pub fn peers(&self) -> Result<Vec<Peer>> {
        self.records.all()
    }

    fn settle<T: Clone>(
        &self,
        id: RecordId,
        field: &'static str,
        select: fn(&mut Peer) -> &mut Field<T>,
        outcome: Result<Option<T>>,
    ) -> Result<Field<T>> {
        if let Err(err) = &outcome {
            tracing::warn!(?id, field, error = %err, "peer lookup failed");
        }
        let written = self.records.settle(id, select, Field::from_lookup(outcome))?;
        tracing::debug!(?id, field, written, "peer field settled");
        let mut peer = self.records.snapshot(id)?;
        Ok(select(&mut peer).clone())
    }

    /// Address from the ENS name, the exchange name or the exchange account id,
    /// whichever the peer knows first.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve_address(&self, id: RecordId) -> Result<Field<Address>> {
        let peer = self.records.snapshot(id)?;
        if !peer.address.needs_lookup() {
            return Ok(peer.address);
        }
        let outcome = if let Some(name) = peer.ens.known() {
            self.names.resolve_name(name).await
        } else if let Some(name) = peer.loopring_ens.known() {
            self.exchange.address_of_name(name).await
        } else if let Some(account_id) = peer.loopring_id.known() {
            self.exchange.owner_of_account(account_id).await
        } else {
            return Ok(peer.address);
        };
        self.settle(id, "address", |peer| &mut peer.address, outcome)
    }

    /// Reverse ENS name of the peer's address.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve_ens(&self, id: RecordId) -> Result<Field<String>> {
        let peer = self.records.snapshot(id)?;
        if !peer.ens.needs_lookup() {
            return Ok(peer.ens);
        }
        let Some(address) = peer.address.known().copied() else {
            return Ok(peer.ens);
        };
        let outcome = self.names.lookup_address(address).await;
        self.settle(id, "ens", |peer| &mut peer.ens, outcome)
    }

    /// Exchange name registered by the peer's address.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve_exchange_name(&self, id: RecordId) -> Result<Field<String>> {
        let peer = self.records.snapshot(id)?;
        if !peer.loopring_ens.needs_lookup() {
            return Ok(peer.loopring_ens);
        }
        let Some(address) = peer.address.known().copied() else {
            return Ok(peer.loopring_ens);
        };
        let outcome = self.exchange.name_of(address).await;
        self.settle(id, "loopringENS", |peer| &mut peer.loopring_ens, outcome)
    }

    /// Exchange account id owned by the peer's address.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve_exchange_id(&self, id: RecordId) -> Result<Field<String>> {
        let peer = self.records.snapshot(id)?;
        if !peer.loopring_id.needs_lookup() {
            return Ok(peer.loopring_id);
        }
        let Some(address) = peer.address.known().copied() else {
            return Ok(peer.loopring_id);
        };
        let outcome = self.exchange.account_id_of(address).await;
        self.settle(id, "loopringID", |peer| &mut peer.loopring_id, outcome)
    }

    /// Fills every unresolved field, address first.
    pub async fn resolve_all(&self, id: RecordId) -> Result<Peer> {
        self.resolve_address(id).await?;
        self.resolve_ens(id).await?;
        self.resolve_exchange_name(id).await?;
        self.resolve_exchange_id(id).await?;
        self.records.snapshot(id)
    }
}
