//! lens-data crate
//!
//! Chain data model, node client, record persistence and the exchange
//! block feed model shared by the decode and identity crates.

pub mod chain;
pub mod loopring;
pub mod store;
pub mod types;

pub use chain::{ChainClient, RpcChainClient, SharedProvider};
pub use store::{MemoryStore, RecordStore, SqliteStore};
pub use types::{Block, Log, Receipt, Transaction, UserOperation};
