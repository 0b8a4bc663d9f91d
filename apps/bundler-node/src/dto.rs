//! Wire-format request/response bodies for the RPC surface: byte
//! strings and addresses are `0x`-prefixed lowercase hex, integers
//! (including timestamps) are `0x`-prefixed hex, and the empty byte string
//! is `0x`, never `0x0`.

use alloy::primitives::{Address, B256, U256};
use bundler_mempool::PooledUserOp;
use bundler_types::{hex0x, UserOp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub user_op: UserOp,
    #[serde(with = "hex0x::address")]
    pub entry_point: Address,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    #[serde(with = "hex0x::u256")]
    pub pre_verification_gas: U256,
    #[serde(with = "hex0x::u256")]
    pub verification_gas: U256,
    #[serde(with = "hex0x::u256")]
    pub call_gas_limit: U256,
}

#[derive(Debug, Deserialize)]
pub struct HashRequest {
    #[serde(with = "hex0x::hash")]
    pub hash: B256,
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    #[serde(with = "hex0x::hash")]
    pub tx_hash: B256,
    pub accepted: bool,
}

/// The HTTP-facing serialization of a `PooledUserOp`: the UserOp's own
/// fields flattened alongside the mempool bookkeeping fields.
#[derive(Debug, Serialize)]
pub struct PooledUserOpDto {
    #[serde(with = "hex0x::hash")]
    pub hash: B256,
    #[serde(flatten)]
    pub user_op: UserOp,
    #[serde(with = "hex0x::address")]
    pub entry_point: Address,
    #[serde(with = "hex0x::u256")]
    pub pre_op_gas: U256,
    #[serde(with = "hex0x::timestamp")]
    pub valid_after: i64,
    #[serde(with = "hex0x::timestamp")]
    pub valid_until: i64,
    #[serde(with = "hex0x::timestamp")]
    pub expires_at: i64,
    pub is_trusted: bool,
    #[serde(with = "hex0x::opt_hash")]
    pub tx_hash: Option<B256>,
    pub accepted: Option<bool>,
}

impl From<PooledUserOp> for PooledUserOpDto {
    fn from(p: PooledUserOp) -> Self {
        Self {
            hash: p.hash,
            user_op: p.user_op,
            entry_point: p.entry_point,
            pre_op_gas: p.pre_op_gas,
            valid_after: p.valid_after,
            valid_until: p.valid_until,
            expires_at: p.expires_at,
            is_trusted: p.is_trusted,
            tx_hash: p.tx_hash,
            accepted: p.accepted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}
