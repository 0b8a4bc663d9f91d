//! Canonical UserOp value object: ABI-encoding, calldata-gas, and prefund arithmetic.

pub mod hex0x;
pub mod trace;
pub mod u256_bytes;

use alloy::primitives::{keccak256, Address, Bytes, U256};
use alloy::sol_types::SolValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum non-zero-value CALL cost, used as the floor for `call_gas_limit`.
pub const CALL_GAS: u64 = 21_000;

#[derive(Debug, Error)]
pub enum UserOpEncodingError {
    #[error("field '{field}' is not a 0x-prefixed hex value")]
    NotHex { field: &'static str },
    #[error("field '{field}' has invalid hex length: expected {expected} nibbles, got {got}")]
    BadLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("integer field '{field}' is out of range [0, 2^256)")]
    IntegerOutOfRange { field: &'static str },
}

/// A UserOperation as defined by ERC-4337, immutable after construction.
///
/// Mirrors the EVM wire fields exactly; `hash` is intentionally not a stored
/// field of this type because it depends on the EntryPoint address and chain
/// id, neither of which the value object owns (see `UserOp::hash`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOp {
    #[serde(with = "hex0x::address")]
    pub sender: Address,
    #[serde(with = "hex0x::u256")]
    pub nonce: U256,
    #[serde(with = "hex0x::bytes")]
    pub init_code: Bytes,
    #[serde(with = "hex0x::bytes")]
    pub call_data: Bytes,
    #[serde(with = "hex0x::u256")]
    pub call_gas_limit: U256,
    #[serde(with = "hex0x::u256")]
    pub verification_gas_limit: U256,
    #[serde(with = "hex0x::u256")]
    pub pre_verification_gas: U256,
    #[serde(with = "hex0x::u256")]
    pub max_fee_per_gas: U256,
    #[serde(with = "hex0x::u256")]
    pub max_priority_fee_per_gas: U256,
    #[serde(with = "hex0x::bytes")]
    pub paymaster_and_data: Bytes,
    #[serde(with = "hex0x::bytes")]
    pub signature: Bytes,
}

alloy::sol! {
    struct UserOpEncoded {
        address sender;
        uint256 nonce;
        bytes32 init_code_hash;
        bytes32 call_data_hash;
        uint256 call_gas_limit;
        uint256 verification_gas_limit;
        uint256 pre_verification_gas;
        uint256 max_fee_per_gas;
        uint256 max_priority_fee_per_gas;
        bytes32 paymaster_and_data_hash;
    }
}

impl UserOp {
    /// Address embedded in `init_code`'s first 20 bytes, if `init_code` is non-empty.
    pub fn factory(&self) -> Option<Address> {
        (!self.init_code.is_empty()).then(|| Address::from_slice(&self.init_code[..20]))
    }

    /// Address embedded in `paymaster_and_data`'s first 20 bytes, if non-empty.
    pub fn paymaster(&self) -> Option<Address> {
        (!self.paymaster_and_data.is_empty())
            .then(|| Address::from_slice(&self.paymaster_and_data[..20]))
    }

    /// Validates invariants (b)/(c) of the UserOp value object: `init_code` and
    /// `paymaster_and_data` are either empty or at least 20 bytes long.
    pub fn validate_shape(&self) -> Result<(), UserOpEncodingError> {
        if !self.init_code.is_empty() && self.init_code.len() < 20 {
            return Err(UserOpEncodingError::BadLength {
                field: "init_code",
                expected: 40,
                got: self.init_code.len() * 2,
            });
        }
        if !self.paymaster_and_data.is_empty() && self.paymaster_and_data.len() < 20 {
            return Err(UserOpEncodingError::BadLength {
                field: "paymaster_and_data",
                expected: 40,
                got: self.paymaster_and_data.len() * 2,
            });
        }
        Ok(())
    }

    /// ABI-encodes the UserOp's gas-relevant fields, hashing the three
    /// variable-length byte strings into the tuple per ERC-4337's calldata
    /// encoding. `with_signature` appends the raw signature bytes as a
    /// trailing dynamic `bytes` value.
    pub fn abi_encode(&self, with_signature: bool) -> Vec<u8> {
        let encoded = UserOpEncoded {
            sender: self.sender,
            nonce: self.nonce,
            init_code_hash: keccak256(&self.init_code),
            call_data_hash: keccak256(&self.call_data),
            call_gas_limit: self.call_gas_limit,
            verification_gas_limit: self.verification_gas_limit,
            pre_verification_gas: self.pre_verification_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            paymaster_and_data_hash: keccak256(&self.paymaster_and_data),
        };
        let mut out = encoded.abi_encode();
        if with_signature {
            out.extend_from_slice(self.signature.as_ref());
        }
        out
    }

    /// `4*zero_bytes + 16*nonzero_bytes` of the signed ABI-encoded form, the
    /// EVM calldata-gas model applied to this UserOp as if it were a transaction.
    pub fn calldata_gas(&self) -> u64 {
        let encoded = self.abi_encode(true);
        let zero = encoded.iter().filter(|b| **b == 0).count() as u64;
        let nonzero = encoded.len() as u64 - zero;
        4 * zero + 16 * nonzero
    }

    /// Gas cost upper bound the EntryPoint (or paymaster) must be able to cover
    /// before execution starts. Saturates instead of panicking: gas fields are
    /// attacker-controlled and unbounded at this point in the pipeline (the
    /// step-3 gas checks that cap them run after this is first needed).
    pub fn required_prefund(&self, with_paymaster: bool) -> U256 {
        let verification_multiplier = if with_paymaster { U256::from(3) } else { U256::from(1) };
        let verification_cost = self.verification_gas_limit.saturating_mul(verification_multiplier);
        let gas_sum = self
            .pre_verification_gas
            .saturating_add(verification_cost)
            .saturating_add(self.call_gas_limit);
        self.max_fee_per_gas.saturating_mul(gas_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UserOp {
        UserOp {
            sender: Address::repeat_byte(0x11),
            nonce: U256::from(0),
            init_code: Bytes::new(),
            call_data: Bytes::from_static(b"\xde\xad\xbe\xef"),
            call_gas_limit: U256::from(100_000),
            verification_gas_limit: U256::from(200_000),
            pre_verification_gas: U256::from(50_000),
            max_fee_per_gas: U256::from(10),
            max_priority_fee_per_gas: U256::from(1),
            paymaster_and_data: Bytes::new(),
            signature: Bytes::from_static(&[0u8; 65]),
        }
    }

    #[test]
    fn required_prefund_without_paymaster() {
        let op = sample();
        let expected = U256::from(10) * (U256::from(50_000) + U256::from(200_000) + U256::from(100_000));
        assert_eq!(op.required_prefund(false), expected);
    }

    #[test]
    fn required_prefund_with_paymaster_triples_verification_gas() {
        let op = sample();
        let expected =
            U256::from(10) * (U256::from(50_000) + U256::from(200_000) * U256::from(3) + U256::from(100_000));
        assert_eq!(op.required_prefund(true), expected);
    }

    #[test]
    fn calldata_gas_counts_zero_and_nonzero_bytes() {
        let op = sample();
        let encoded = op.abi_encode(true);
        let zero = encoded.iter().filter(|b| **b == 0).count() as u64;
        let nonzero = encoded.len() as u64 - zero;
        assert_eq!(op.calldata_gas(), 4 * zero + 16 * nonzero);
    }

    #[test]
    fn factory_and_paymaster_parse_first_20_bytes() {
        let mut op = sample();
        let factory = Address::repeat_byte(0x22);
        op.init_code = Bytes::from([factory.as_slice(), b"\x01\x02"].concat());
        assert_eq!(op.factory(), Some(factory));
        assert_eq!(op.paymaster(), None);
    }

    #[test]
    fn validate_shape_rejects_short_init_code() {
        let mut op = sample();
        op.init_code = Bytes::from_static(&[0u8; 10]);
        assert!(matches!(
            op.validate_shape(),
            Err(UserOpEncodingError::BadLength { field: "init_code", .. })
        ));
    }

    #[test]
    fn json_round_trip_preserves_abi_encoding() {
        let op = sample();
        let json = serde_json::to_string(&op).unwrap();
        let decoded: UserOp = serde_json::from_str(&json).unwrap();
        assert_eq!(op.abi_encode(true), decoded.abi_encode(true));
    }
}
