//! Fixed 32-byte big-endian adapter between `U256` and the `bytea` columns
//! used for persisted 256-bit-width integers.

use alloy::primitives::U256;

pub fn u256_to_be32(value: U256) -> [u8; 32] {
    value.to_be_bytes()
}

pub fn be32_to_u256(bytes: &[u8]) -> U256 {
    U256::from_be_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let value = U256::from(123_456_789u64);
        assert_eq!(be32_to_u256(&u256_to_be32(value)), value);
    }

    #[test]
    fn zero_round_trips() {
        assert_eq!(be32_to_u256(&u256_to_be32(U256::ZERO)), U256::ZERO);
    }
}
