//! lens-identity crate
//!
//! Peer and token registries that fill their fields lazily from ENS, the
//! exchange directory and on-chain token metadata, plus the merge of both
//! into one record per address.

pub mod config;
pub mod consolidate;
pub mod ens;
pub mod exchange;
pub mod field;
pub mod metadata;
pub mod peer;
pub mod registry;
pub mod token;

pub use config::IdentityConfig;
pub use consolidate::{consolidate_ones, One};
pub use ens::{EnsResolver, NameService};
pub use exchange::{ExchangeDirectory, ExchangeToken, LoopringApi};
pub use field::{Field, FieldValue};
pub use metadata::{Erc20Metadata, TokenMetadataSource};
pub use peer::{Peer, PeerKey, PeerRegistry};
pub use registry::RecordId;
pub use token::{TokenInfo, TokenKey, TokenRegistry};
