//! Contract ABIs indexed for decoding.
//!
//! A [`ContractAbi`] is built once per resolved contract and keeps its
//! functions, events and errors keyed by selector so decoding never scans.
//! [`ContractAbi::standard`] merges the embedded ERC-20/721/1155, WETH and
//! ERC-4337 EntryPoint ABIs used when no contract-specific ABI is known.

use std::collections::HashMap;
use std::sync::OnceLock;

use alloy::json_abi::{Error as AbiError, Event, Function, JsonAbi};
use alloy::primitives::B256;
use eyre::{Context, Result};

/// Name reported as the origin of [`ContractAbi::standard`].
pub const STANDARD_SOURCE: &str = "standard";

const STANDARD_ABIS: [(&str, &str); 6] = [
    ("erc20", include_str!("../abis/erc20.json")),
    ("erc721", include_str!("../abis/erc721.json")),
    ("erc1155", include_str!("../abis/erc1155.json")),
    ("weth", include_str!("../abis/weth.json")),
    ("entrypoint", include_str!("../abis/entrypoint.json")),
    ("revert", include_str!("../abis/revert.json")),
];

/// A contract ABI with selector and topic lookup tables.
#[derive(Debug, Clone)]
pub struct ContractAbi {
    functions: HashMap<[u8; 4], Function>,
    // Several events may share a topic0 and differ only in which inputs are indexed.
    events: HashMap<B256, Vec<Event>>,
    errors: HashMap<[u8; 4], AbiError>,
    source: String,
}

impl ContractAbi {
    /// Parses a JSON ABI array, recording where it came from.
    pub fn parse(json: &str, source: impl Into<String>) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(json).wrap_err("invalid ABI JSON")?;
        Ok(Self::from_abis([abi], source))
    }

    /// Indexes one or more ABIs. The first function or error seen for a selector wins.
    pub fn from_abis(abis: impl IntoIterator<Item = JsonAbi>, source: impl Into<String>) -> Self {
        let mut functions = HashMap::new();
        let mut events: HashMap<B256, Vec<Event>> = HashMap::new();
        let mut errors = HashMap::new();

        for abi in abis {
            for function in abi.functions() {
                functions
                    .entry(function.selector().0)
                    .or_insert_with(|| function.clone());
            }
            for event in abi.events().filter(|event| !event.anonymous) {
                let candidates = events.entry(event.selector()).or_default();
                if !candidates.contains(event) {
                    candidates.push(event.clone());
                }
            }
            for error in abi.errors() {
                errors
                    .entry(error.selector().0)
                    .or_insert_with(|| error.clone());
            }
        }

        Self {
            functions,
            events,
            errors,
            source: source.into(),
        }
    }

    /// The merged embedded standard ABIs.
    pub fn standard() -> &'static ContractAbi {
        static STANDARD: OnceLock<ContractAbi> = OnceLock::new();
        STANDARD.get_or_init(|| {
            let abis = STANDARD_ABIS.iter().filter_map(|(name, json)| {
                serde_json::from_str::<JsonAbi>(json)
                    .inspect_err(|e| tracing::error!(abi = name, error = %e, "embedded ABI is invalid"))
                    .ok()
            });
            Self::from_abis(abis, STANDARD_SOURCE)
        })
    }

    pub fn function(&self, selector: [u8; 4]) -> Option<&Function> {
        self.functions.get(&selector)
    }

    /// Event for `topic0`, preferring the variant whose indexed input count
    /// equals `indexed_topics`.
    pub fn event(&self, topic0: B256, indexed_topics: usize) -> Option<&Event> {
        let candidates = self.events.get(&topic0)?;
        candidates
            .iter()
            .find(|event| event.inputs.iter().filter(|input| input.indexed).count() == indexed_topics)
            .or_else(|| candidates.first())
    }

    pub fn error(&self, selector: [u8; 4]) -> Option<&AbiError> {
        self.errors.get(&selector)
    }

    /// Where this ABI was obtained.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every function, event and error signature as `(kind, signature)`, sorted.
    pub fn signatures(&self) -> Vec<(&'static str, String)> {
        let mut out: Vec<_> = self
            .functions
            .values()
            .map(|function| ("function", function.signature()))
            .chain(
                self.events
                    .values()
                    .flatten()
                    .map(|event| ("event", event.signature())),
            )
            .chain(self.errors.values().map(|error| ("error", error.signature())))
            .collect();
        out.sort();
        out
    }

    /// True when the ABI declares nothing decodable.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.events.is_empty() && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;

    const TRANSFER_TOPIC: B256 =
        b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

    #[test]
    fn standard_abis_parse() {
        let standard = ContractAbi::standard();
        assert!(!standard.is_empty());
        assert_eq!(standard.source(), STANDARD_SOURCE);
        assert_eq!(
            standard.function([0xa9, 0x05, 0x9c, 0xbb]).map(|f| f.name.as_str()),
            Some("transfer")
        );
        assert_eq!(
            standard.error([0x08, 0xc3, 0x79, 0xa0]).map(|e| e.name.as_str()),
            Some("Error")
        );
    }

    #[test]
    fn transfer_variant_follows_topic_count() {
        let standard = ContractAbi::standard();

        let erc20 = standard.event(TRANSFER_TOPIC, 2).expect("erc20 transfer");
        assert_eq!(erc20.inputs[2].name, "value");
        assert!(!erc20.inputs[2].indexed);

        let erc721 = standard.event(TRANSFER_TOPIC, 3).expect("erc721 transfer");
        assert_eq!(erc721.inputs[2].name, "tokenId");
        assert!(erc721.inputs[2].indexed);
    }

    #[test]
    fn unknown_topic_count_falls_back_to_first_variant() {
        let standard = ContractAbi::standard();
        assert!(standard.event(TRANSFER_TOPIC, 0).is_some());
        assert!(standard.event(B256::repeat_byte(0x01), 2).is_none());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ContractAbi::parse("not json", "test").is_err());
        let empty = ContractAbi::parse("[]", "test").expect("empty array parses");
        assert!(empty.is_empty());
    }

    #[test]
    fn signatures_are_listed_by_kind() {
        let abi = ContractAbi::parse(include_str!("../abis/weth.json"), "test").expect("weth");
        let signatures = abi.signatures();
        assert!(signatures.contains(&("function", "deposit()".to_string())));
        assert!(signatures.contains(&("event", "Withdrawal(address,uint256)".to_string())));
        assert!(signatures.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
