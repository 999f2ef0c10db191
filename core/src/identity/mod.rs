// Identity — rotating anonymous identifiers broadcast over BLE

pub mod codec;
mod manager;
mod store;

pub use codec::{decode, encode_value, DecodeError, IdentifierCodec, Payload, PAYLOAD_LEN};
pub use manager::IdentifierManager;
pub use store::{BackendIdentifierStore, IdentifierStore, StoredIdentifier};

#[cfg(test)]
pub use store::MockIdentifierStore;

use crate::clock::Millis;
use serde::Serialize;
use std::fmt;

/// Prefix of every identifier string
pub const ID_PREFIX: &str = "ble-";

/// A short anonymous identifier derived from one 32-bit value.
///
/// `id` is always `"ble-"` followed by the value in lowercase hex without
/// leading zeros, so the wire payload can be recovered from the id alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identifier {
    id: String,
    created_at: Millis,
    #[serde(skip)]
    value: u32,
}

impl Identifier {
    pub fn from_value(value: u32, created_at: Millis) -> Self {
        Self {
            id: format!("{ID_PREFIX}{value:x}"),
            created_at,
            value,
        }
    }

    /// Rebuild an identifier from its persisted string form
    pub fn from_id(id: &str, created_at: Millis) -> Option<Self> {
        parse_id(id).map(|value| Self::from_value(value, created_at))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Millis {
        self.created_at
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Four-byte wire payload for this identifier
    pub fn payload(&self) -> Payload {
        encode_value(self.value)
    }

    /// Milliseconds elapsed since creation (zero if the clock went backwards)
    pub fn age_at(&self, now: Millis) -> Millis {
        now.saturating_sub(self.created_at)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Parse a canonical `ble-<hex>` id back into its 32-bit value.
///
/// Non-canonical spellings (uppercase, leading zeros, sign) are rejected so
/// that one value maps to exactly one id.
pub fn parse_id(id: &str) -> Option<u32> {
    let digits = id.strip_prefix(ID_PREFIX)?;
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    let value = u32::from_str_radix(digits, 16).ok()?;
    (format!("{value:x}") == digits).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_from_value() {
        let identifier = Identifier::from_value(0x00ab_cdef, 5);
        assert_eq!(identifier.id(), "ble-abcdef");
        assert_eq!(identifier.created_at(), 5);
        assert_eq!(identifier.payload(), [0x00, 0xab, 0xcd, 0xef]);
        assert_eq!(identifier.to_string(), "ble-abcdef");
    }

    #[test]
    fn test_identifier_zero_value() {
        let identifier = Identifier::from_value(0, 0);
        assert_eq!(identifier.id(), "ble-0");
        assert_eq!(parse_id("ble-0"), Some(0));
    }

    #[test]
    fn test_parse_id_roundtrip() {
        let identifier = Identifier::from_value(u32::MAX, 0);
        assert_eq!(identifier.id(), "ble-ffffffff");
        assert_eq!(parse_id(identifier.id()), Some(u32::MAX));
    }

    #[test]
    fn test_parse_id_rejects_non_canonical() {
        assert_eq!(parse_id("ble-"), None);
        assert_eq!(parse_id("ble-00ff"), None);
        assert_eq!(parse_id("ble-FF"), None);
        assert_eq!(parse_id("ble-+ff"), None);
        assert_eq!(parse_id("ble--1"), None);
        assert_eq!(parse_id("ble-100000000"), None);
        assert_eq!(parse_id("usr-ff"), None);
    }

    #[test]
    fn test_identifier_from_id() {
        let identifier = Identifier::from_id("ble-1f", 99).unwrap();
        assert_eq!(identifier.value(), 0x1f);
        assert_eq!(identifier.created_at(), 99);
        assert!(Identifier::from_id("garbage", 99).is_none());
    }

    #[test]
    fn test_identifier_age_saturates() {
        let identifier = Identifier::from_value(1, 1_000);
        assert_eq!(identifier.age_at(1_500), 500);
        assert_eq!(identifier.age_at(500), 0);
    }
}
