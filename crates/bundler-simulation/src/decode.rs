//! Decodes the revert payload of `simulateValidation` into a typed record,
//! selecting the variant by 4-byte selector.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolError;
use thiserror::Error;

/// Platform-independent ceiling substituted for `valid_until == 0` ("no
/// expiry"). Chosen to safely fit the persisted (Postgres `bigint`)
/// timestamp column.
pub const MAX_TIMESTAMP: i64 = i64::MAX;

alloy::sol! {
    pub struct ReturnInfo {
        uint256 preOpGas;
        uint256 prefund;
        bool sigFailed;
        uint48 validAfter;
        uint48 validUntil;
        bytes paymasterContext;
    }

    pub struct StakeInfo {
        uint256 stake;
        uint256 unstakeDelaySec;
    }

    pub struct AggregatorStakeInfo {
        address aggregator;
        StakeInfo stakeInfo;
    }

    pub error ValidationResult(ReturnInfo returnInfo, StakeInfo senderInfo, StakeInfo factoryInfo, StakeInfo paymasterInfo);
    pub error ValidationResultWithAggregation(ReturnInfo returnInfo, StakeInfo senderInfo, StakeInfo factoryInfo, StakeInfo paymasterInfo, AggregatorStakeInfo aggregatorInfo);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stake {
    pub stake: U256,
    pub unstake_delay_sec: U256,
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    pub aggregator: Address,
    pub stake: Stake,
}

/// A decoded, typed reply to `simulateValidation` — never an untyped dict.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub pre_op_gas: U256,
    pub prefund: U256,
    pub sig_failed: bool,
    pub valid_after: u64,
    /// Raw `valid_until` as returned by the contract; 0 means "no expiry".
    pub valid_until_raw: u64,
    pub paymaster_context: Bytes,
    pub sender_stake: Stake,
    pub factory_stake: Stake,
    pub paymaster_stake: Stake,
    pub aggregation: Option<Aggregation>,
}

#[derive(Debug, Error)]
pub enum SimulationDecodeError {
    #[error("simulateValidation reverted with an unrecognized selector: {0:?}")]
    SimulationFailure([u8; 4]),
    #[error("malformed ValidationResult payload: {0}")]
    Malformed(String),
}

impl SimulationResult {
    /// `valid_until` normalized: the contract's 0 denotes "no expiry".
    pub fn valid_until_normalized(&self) -> i64 {
        if self.valid_until_raw == 0 {
            MAX_TIMESTAMP
        } else {
            self.valid_until_raw as i64
        }
    }

    /// `min(now + user_op_lifetime, valid_until_normalized)`.
    pub fn expires_at(&self, now: i64, user_op_lifetime_secs: i64) -> i64 {
        std::cmp::min(now.saturating_add(user_op_lifetime_secs), self.valid_until_normalized())
    }
}

fn from_return_info(info: &ReturnInfo) -> (U256, U256, bool, u64, u64, Bytes) {
    (
        info.preOpGas,
        info.prefund,
        info.sigFailed,
        info.validAfter as u64,
        info.validUntil as u64,
        info.paymasterContext.clone(),
    )
}

fn from_stake_info(info: &StakeInfo) -> Stake {
    Stake { stake: info.stake, unstake_delay_sec: info.unstakeDelaySec }
}

/// Parses the 4-byte selector plus revert payload. Any selector other than
/// `ValidationResult`/`ValidationResultWithAggregation` is surfaced as
/// `SimulationFailure(raw)`.
pub fn decode_simulation_result(selector: [u8; 4], payload: &[u8]) -> Result<SimulationResult, SimulationDecodeError> {
    if selector == ValidationResult::SELECTOR {
        let decoded = ValidationResult::abi_decode_raw(payload).map_err(|e| SimulationDecodeError::Malformed(e.to_string()))?;
        let (pre_op_gas, prefund, sig_failed, valid_after, valid_until_raw, paymaster_context) = from_return_info(&decoded.returnInfo);
        return Ok(SimulationResult {
            pre_op_gas,
            prefund,
            sig_failed,
            valid_after,
            valid_until_raw,
            paymaster_context,
            sender_stake: from_stake_info(&decoded.senderInfo),
            factory_stake: from_stake_info(&decoded.factoryInfo),
            paymaster_stake: from_stake_info(&decoded.paymasterInfo),
            aggregation: None,
        });
    }

    if selector == ValidationResultWithAggregation::SELECTOR {
        let decoded =
            ValidationResultWithAggregation::abi_decode_raw(payload).map_err(|e| SimulationDecodeError::Malformed(e.to_string()))?;
        let (pre_op_gas, prefund, sig_failed, valid_after, valid_until_raw, paymaster_context) = from_return_info(&decoded.returnInfo);
        return Ok(SimulationResult {
            pre_op_gas,
            prefund,
            sig_failed,
            valid_after,
            valid_until_raw,
            paymaster_context,
            sender_stake: from_stake_info(&decoded.senderInfo),
            factory_stake: from_stake_info(&decoded.factoryInfo),
            paymaster_stake: from_stake_info(&decoded.paymasterInfo),
            aggregation: Some(Aggregation {
                aggregator: decoded.aggregatorInfo.aggregator,
                stake: from_stake_info(&decoded.aggregatorInfo.stakeInfo),
            }),
        });
    }

    Err(SimulationDecodeError::SimulationFailure(selector))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn return_info() -> ReturnInfo {
        ReturnInfo {
            preOpGas: U256::from(50_000),
            prefund: U256::from(1_000_000),
            sigFailed: false,
            validAfter: 0,
            validUntil: 1_700_000_000,
            paymasterContext: Bytes::new(),
        }
    }

    fn stake() -> StakeInfo {
        StakeInfo { stake: U256::from(1), unstakeDelaySec: U256::from(86_400) }
    }

    #[test]
    fn decodes_validation_result() {
        let err = ValidationResult { returnInfo: return_info(), senderInfo: stake(), factoryInfo: stake(), paymasterInfo: stake() };
        let encoded = err.abi_encode();
        let (selector, payload) = encoded.split_at(4);
        let mut sel = [0u8; 4];
        sel.copy_from_slice(selector);
        let decoded = decode_simulation_result(sel, payload).unwrap();
        assert_eq!(decoded.pre_op_gas, U256::from(50_000));
        assert!(decoded.aggregation.is_none());
        assert_eq!(decoded.valid_until_normalized(), 1_700_000_000);
    }

    #[test]
    fn decodes_validation_result_with_aggregation() {
        let err = ValidationResultWithAggregation {
            returnInfo: return_info(),
            senderInfo: stake(),
            factoryInfo: stake(),
            paymasterInfo: stake(),
            aggregatorInfo: AggregatorStakeInfo { aggregator: Address::repeat_byte(0x33), stakeInfo: stake() },
        };
        let encoded = err.abi_encode();
        let (selector, payload) = encoded.split_at(4);
        let mut sel = [0u8; 4];
        sel.copy_from_slice(selector);
        let decoded = decode_simulation_result(sel, payload).unwrap();
        assert!(decoded.aggregation.is_some());
    }

    #[test]
    fn unknown_selector_is_simulation_failure() {
        let result = decode_simulation_result([0xde, 0xad, 0xbe, 0xef], &[]);
        assert!(matches!(result, Err(SimulationDecodeError::SimulationFailure(_))));
    }

    #[test]
    fn zero_valid_until_normalizes_to_max_timestamp() {
        let mut info = return_info();
        info.validUntil = 0;
        let err = ValidationResult { returnInfo: info, senderInfo: stake(), factoryInfo: stake(), paymasterInfo: stake() };
        let encoded = err.abi_encode();
        let (selector, payload) = encoded.split_at(4);
        let mut sel = [0u8; 4];
        sel.copy_from_slice(selector);
        let decoded = decode_simulation_result(sel, payload).unwrap();
        assert_eq!(decoded.valid_until_normalized(), MAX_TIMESTAMP);
    }
}
