//! Normalized parameter values produced by the decoder.
//!
//! Every ABI value is mapped to a [`ParamValue`] before it leaves this crate.
//! 32-byte words whose upper 12 bytes are zero and 20-byte byte strings are
//! rewritten as addresses, so consumers never see a padded account.

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, Bytes, B256, I256, U256};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A decoded parameter value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Address(Address),
    Hash(B256),
    Uint(#[serde(serialize_with = "decimal")] U256),
    Int(#[serde(serialize_with = "decimal")] I256),
    Bool(bool),
    Bytes(Bytes),
    String(String),
    Array(Vec<ParamValue>),
    Tuple(Vec<ParamValue>),
}

impl ParamValue {
    /// Converts a dynamically decoded ABI value, canonicalizing addresses.
    pub fn from_sol(value: DynSolValue) -> Self {
        #[allow(unreachable_patterns)]
        match value {
            DynSolValue::Address(address) => Self::Address(address),
            DynSolValue::Bool(flag) => Self::Bool(flag),
            DynSolValue::Int(int, _) => Self::Int(int),
            DynSolValue::Uint(uint, _) => Self::Uint(uint),
            DynSolValue::FixedBytes(word, 32) => canonical_word(word),
            DynSolValue::FixedBytes(word, size) => {
                Self::Bytes(Bytes::copy_from_slice(&word[..size.min(32)]))
            }
            DynSolValue::Function(function) => Self::Bytes(Bytes::copy_from_slice(function.as_slice())),
            DynSolValue::Bytes(bytes) => canonical_bytes(bytes.into()),
            DynSolValue::String(text) => Self::String(text),
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
                Self::Array(items.into_iter().map(Self::from_sol).collect())
            }
            DynSolValue::Tuple(items) => Self::Tuple(items.into_iter().map(Self::from_sol).collect()),
            other => Self::String(format!("{other:?}")),
        }
    }

    /// The value as an address, if it canonicalized to one.
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(address) => Some(*address),
            _ => None,
        }
    }

    /// The value as an unsigned integer.
    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Self::Uint(value) => Some(*value),
            _ => None,
        }
    }
}

/// Rewrites a 32-byte word as an address when its upper 12 bytes are zero.
pub fn canonical_word(word: B256) -> ParamValue {
    if word[..12].iter().all(|b| *b == 0) {
        ParamValue::Address(Address::from_slice(&word[12..]))
    } else {
        ParamValue::Hash(word)
    }
}

/// Rewrites a 20-byte string as an address and a 32-byte string like [`canonical_word`].
pub fn canonical_bytes(bytes: Bytes) -> ParamValue {
    match bytes.len() {
        20 => ParamValue::Address(Address::from_slice(&bytes)),
        32 => canonical_word(B256::from_slice(&bytes)),
        _ => ParamValue::Bytes(bytes),
    }
}

fn decimal<T: std::fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Parameters of a decoded call or event, in ABI declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.push((name.into(), value));
    }

    /// First parameter with the given name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(key, _)| key == name).map(|(_, value)| value)
    }

    /// First address-valued parameter among `names`, tried in order.
    pub fn address_of(&self, names: &[&str]) -> Option<Address> {
        names
            .iter()
            .find_map(|name| self.get(name).and_then(ParamValue::as_address))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Name used for an unnamed ABI parameter at position `index`.
pub(crate) fn param_name(name: &str, index: usize) -> String {
    if name.is_empty() {
        format!("arg{index}")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn padded_word_becomes_address() {
        let holder = address!("00000000000000000000000000000000000000aa");
        let word = holder.into_word();
        assert_eq!(canonical_word(word), ParamValue::Address(holder));

        let hash = B256::repeat_byte(0x11);
        assert_eq!(canonical_word(hash), ParamValue::Hash(hash));
    }

    #[test]
    fn twenty_byte_string_becomes_address() {
        let raw = Bytes::from(vec![0x42; 20]);
        assert_eq!(
            canonical_bytes(raw),
            ParamValue::Address(Address::repeat_byte(0x42))
        );
        let odd = Bytes::from(vec![0x42; 7]);
        assert_eq!(canonical_bytes(odd.clone()), ParamValue::Bytes(odd));
    }

    #[test]
    fn nested_values_are_canonicalized() {
        let value = DynSolValue::Array(vec![
            DynSolValue::FixedBytes(Address::repeat_byte(0x01).into_word(), 32),
            DynSolValue::Uint(U256::from(7), 256),
        ]);
        assert_eq!(
            ParamValue::from_sol(value),
            ParamValue::Array(vec![
                ParamValue::Address(Address::repeat_byte(0x01)),
                ParamValue::Uint(U256::from(7)),
            ])
        );
    }

    #[test]
    fn short_fixed_bytes_are_truncated() {
        let mut word = B256::ZERO;
        word[0] = 0xab;
        word[1] = 0xcd;
        assert_eq!(
            ParamValue::from_sol(DynSolValue::FixedBytes(word, 2)),
            ParamValue::Bytes(Bytes::from(vec![0xab, 0xcd]))
        );
    }

    #[test]
    fn params_serialize_in_declaration_order() {
        let mut params = Params::new();
        params.push("to", ParamValue::Address(Address::repeat_byte(0x22)));
        params.push("value", ParamValue::Uint(U256::from(1_000u64)));
        params.push("memo", ParamValue::String("hi".into()));

        let json = serde_json::to_string(&params).expect("serialize");
        assert_eq!(
            json,
            r#"{"to":"0x2222222222222222222222222222222222222222","value":"1000","memo":"hi"}"#
        );
    }

    #[test]
    fn address_of_tries_names_in_order() {
        let mut params = Params::new();
        params.push("src", ParamValue::Address(Address::repeat_byte(0x03)));
        params.push("wad", ParamValue::Uint(U256::from(1)));
        assert_eq!(
            params.address_of(&["from", "src"]),
            Some(Address::repeat_byte(0x03))
        );
        assert_eq!(params.address_of(&["wad"]), None);
    }
}
