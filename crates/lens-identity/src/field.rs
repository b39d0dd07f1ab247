//! Lazily resolved record fields.
//!
//! A [`Field`] remembers whether a lookup was ever attempted and how it
//! ended. Persisted records keep the compact text encoding:
//!
//! | state     | stored as |
//! |-----------|-----------|
//! | `Unknown` | `""`      |
//! | `Absent`  | `"."`     |
//! | `Failed`  | `"!"`     |
//! | `Known`   | the value |
//!
//! `".."` found in older records reads as `Absent`. Addresses are stored as
//! lowercase hex, matching record keys.

use alloy::primitives::Address;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// State of one lazily resolved value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Field<T> {
    /// Never looked up.
    #[default]
    Unknown,
    /// Looked up; confirmed to have no value. Terminal.
    Absent,
    /// Last lookup failed; may be retried.
    Failed,
    /// Resolved. Terminal.
    Known(T),
}

impl<T> Field<T> {
    /// True for `Unknown` and `Failed`, the only states that permit a lookup.
    pub fn needs_lookup(&self) -> bool {
        matches!(self, Self::Unknown | Self::Failed)
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Self::Known(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// Maps a lookup outcome onto a field state.
    pub fn from_lookup<E>(outcome: Result<Option<T>, E>) -> Self {
        match outcome {
            Ok(Some(value)) => Self::Known(value),
            Ok(None) => Self::Absent,
            Err(_) => Self::Failed,
        }
    }

    /// Overwrites `self` with `other` unless `other` is `Unknown`.
    pub fn merge_from(&mut self, other: &Self)
    where
        T: Clone,
    {
        if !matches!(other, Self::Unknown) {
            *self = other.clone();
        }
    }
}

/// Text encoding of a resolved value.
pub trait FieldValue: Sized {
    fn encode(&self) -> String;
    fn decode(text: &str) -> Result<Self, String>;
}

macro_rules! parsed_field_value {
    ($($ty:ty),*) => {$(
        impl FieldValue for $ty {
            fn encode(&self) -> String {
                self.to_string()
            }

            fn decode(text: &str) -> Result<Self, String> {
                text.parse().map_err(|e| format!("invalid {}: {e}", stringify!($ty)))
            }
        }
    )*};
}

parsed_field_value!(String, u8, u32, u64);

impl FieldValue for Address {
    fn encode(&self) -> String {
        format!("{self:#x}")
    }

    fn decode(text: &str) -> Result<Self, String> {
        text.parse().map_err(|e| format!("invalid address: {e}"))
    }
}

impl<T: FieldValue> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unknown => serializer.serialize_str(""),
            Self::Absent => serializer.serialize_str("."),
            Self::Failed => serializer.serialize_str("!"),
            Self::Known(value) => serializer.serialize_str(&value.encode()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored {
    Text(String),
    Number(u64),
}

impl<'de, T: FieldValue> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = match Option::<Stored>::deserialize(deserializer)? {
            None => return Ok(Self::Unknown),
            Some(Stored::Text(text)) => text,
            Some(Stored::Number(number)) => number.to_string(),
        };
        match text.trim() {
            "" => Ok(Self::Unknown),
            "." | ".." => Ok(Self::Absent),
            "!" => Ok(Self::Failed),
            value => T::decode(value).map(Self::Known).map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_read_as_states() {
        let cases = [
            (r#""""#, Field::Unknown),
            (r#"".""#, Field::Absent),
            (r#""..""#, Field::Absent),
            (r#""!""#, Field::Failed),
            ("null", Field::Unknown),
            (r#""alice.eth""#, Field::Known("alice.eth".to_string())),
        ];
        for (json, expected) in cases {
            let field: Field<String> = serde_json::from_str(json).expect(json);
            assert_eq!(field, expected, "{json}");
        }
    }

    #[test]
    fn double_dot_is_written_back_as_single_dot() {
        let field: Field<String> = serde_json::from_str(r#""..""#).expect("valid");
        assert_eq!(serde_json::to_string(&field).expect("serialize"), r#"".""#);
    }

    #[test]
    fn numbers_accept_text_or_json_numbers() {
        let text: Field<u64> = serde_json::from_str(r#""12345""#).expect("text");
        let number: Field<u64> = serde_json::from_str("12345").expect("number");
        assert_eq!(text, Field::Known(12345));
        assert_eq!(number, Field::Known(12345));
        assert!(serde_json::from_str::<Field<u64>>(r#""abc""#).is_err());
    }

    #[test]
    fn addresses_are_stored_lowercase() {
        let address = Address::repeat_byte(0xab);
        let field = Field::Known(address);
        let json = serde_json::to_value(&field).expect("serialize");
        assert_eq!(json, format!("{address:#x}"));
        assert_eq!(json, "0xabababababababababababababababababababab");

        let back: Field<Address> = serde_json::from_value(json).expect("parse");
        assert_eq!(back, field);
        let checksummed: Field<Address> =
            serde_json::from_str(&format!("\"{address}\"")).expect("checksummed input");
        assert_eq!(checksummed, field);
    }

    #[test]
    fn only_unknown_and_failed_need_lookup() {
        assert!(Field::<u8>::Unknown.needs_lookup());
        assert!(Field::<u8>::Failed.needs_lookup());
        assert!(!Field::<u8>::Absent.needs_lookup());
        assert!(!Field::Known(1u8).needs_lookup());
    }

    #[test]
    fn lookup_outcomes_map_to_states() {
        assert_eq!(Field::from_lookup::<()>(Ok(Some(3u8))), Field::Known(3));
        assert_eq!(Field::<u8>::from_lookup::<()>(Ok(None)), Field::Absent);
        assert_eq!(Field::<u8>::from_lookup(Err("timeout")), Field::Failed);
    }

    #[test]
    fn merge_ignores_unknown() {
        let mut field = Field::Known(1u8);
        field.merge_from(&Field::Unknown);
        assert_eq!(field, Field::Known(1));
        field.merge_from(&Field::Absent);
        assert_eq!(field, Field::Absent);
    }
}
