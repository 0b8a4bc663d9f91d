//! `0x`-prefixed lowercase hex (de)serializers matching the wire encoding:
//! the empty byte string is `0x`, never `0x0`.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Deserializer, Serializer};

fn to_0x_lower(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn from_0x<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    let stripped = s
        .strip_prefix("0x")
        .ok_or_else(|| serde::de::Error::custom(format!("value '{s}' is not 0x-prefixed hex")))?;
    hex::decode(stripped).map_err(serde::de::Error::custom)
}

pub mod address {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_0x_lower(value.as_slice()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let raw = from_0x(deserializer)?;
        if raw.len() != 20 {
            return Err(serde::de::Error::custom(format!(
                "expected 40 hex nibbles for an address, got {}",
                raw.len() * 2
            )));
        }
        Ok(Address::from_slice(&raw))
    }
}

pub mod bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_0x_lower(value.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        from_0x(deserializer).map(Bytes::from)
    }
}

pub mod u256 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{value:x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| serde::de::Error::custom(format!("value '{s}' is not 0x-prefixed hex")))?;
        U256::from_str_radix(stripped, 16).map_err(serde::de::Error::custom)
    }
}

pub mod hash {
    use super::*;

    pub fn serialize<S: Serializer>(value: &B256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_0x_lower(value.as_slice()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<B256, D::Error> {
        let raw = from_0x(deserializer)?;
        if raw.len() != 32 {
            return Err(serde::de::Error::custom(format!(
                "expected 64 hex nibbles for a hash, got {}",
                raw.len() * 2
            )));
        }
        Ok(B256::from_slice(&raw))
    }
}

pub mod opt_hash {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<B256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(h) => serializer.serialize_str(&to_0x_lower(h.as_slice())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<B256>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => {
                let stripped = s.strip_prefix("0x").ok_or_else(|| {
                    serde::de::Error::custom(format!("value '{s}' is not 0x-prefixed hex"))
                })?;
                let bytes = hex::decode(stripped).map_err(serde::de::Error::custom)?;
                if bytes.len() != 32 {
                    return Err(serde::de::Error::custom("expected 64 hex nibbles for a hash"));
                }
                Ok(Some(B256::from_slice(&bytes)))
            }
        }
    }
}

/// `0x`-prefixed hex for a non-negative `i64`, used for the persisted
/// timestamp fields (`valid_after`/`valid_until`/`expires_at`) on the wire.
pub mod timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{value:x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| serde::de::Error::custom(format!("value '{s}' is not 0x-prefixed hex")))?;
        i64::from_str_radix(stripped, 16).map_err(serde::de::Error::custom)
    }
}
