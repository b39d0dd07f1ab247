//! lens-decode crate
//!
//! Turns raw blocks into decoded transactions: ABI resolution with
//! single-flight caching, method/event/revert decoding, transfer
//! classification, signature hints and ERC-4337 user operations.

pub mod abi;
pub mod classify;
pub mod config;
pub mod decoder;
pub mod pipeline;
pub mod resolver;
pub mod signatures;
pub mod sources;
pub mod userops;
pub mod value;

pub use abi::ContractAbi;
pub use classify::Action;
pub use config::DecoderConfig;
pub use decoder::{decode_error, decode_event, decode_method, DecodedCall, DecodedEvent};
pub use pipeline::{BlockDecoder, DecodedBlock, DecodedTransaction, DecodedUserOp};
pub use resolver::AbiResolver;
pub use signatures::{NoSignatures, OpenChainSignatures, SignatureHints, SignatureService};
pub use sources::{AbiSource, BytecodeDb, Sourcify};
pub use userops::{BundlerRpcIndexer, UserOpIndexer};
pub use value::{ParamValue, Params};
