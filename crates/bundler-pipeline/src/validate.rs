//! The validation pipeline: composes the RPC adapter, simulation decoder,
//! trace validator, and bytecode reputation store into a single
//! `accept(UserOp, EntryPoint) → Decision` entry point.

use alloy::primitives::{Address, B256, U256};
use bundler_mempool::{EntryPointRegistry, MempoolStore};
use bundler_reputation::BytecodeStore;
use bundler_rpc_client::EthereumRpc;
use bundler_simulation::decode::{decode_simulation_result, SimulationResult};
use bundler_simulation::trace;
use bundler_types::{UserOp, CALL_GAS};

use crate::error::{describe_opcode_violation, PipelineError};

pub struct PipelineDeps<'a> {
    pub rpc: &'a dyn EthereumRpc,
    pub mempool: &'a MempoolStore,
    pub reputation: &'a BytecodeStore,
    pub entry_points: &'a EntryPointRegistry,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub max_verification_gas_limit: U256,
    pub min_max_fee_per_gas: U256,
    pub min_max_priority_fee_per_gas: U256,
    pub user_op_lifetime_secs: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_verification_gas_limit: U256::from(6_000_000u64),
            min_max_fee_per_gas: U256::from(1u64),
            min_max_priority_fee_per_gas: U256::from(1u64),
            user_op_lifetime_secs: 1800,
        }
    }
}

/// Purely informational output of the pipeline; persistence is performed by
/// `MempoolStore::add` in `accept` below.
#[derive(Debug, Clone)]
pub struct Decision {
    pub hash: B256,
    pub simulation: SimulationResult,
    pub is_trusted: bool,
    pub helper_bytecode_hashes: Vec<B256>,
    pub valid_after: i64,
    pub valid_until: i64,
    pub expires_at: i64,
}

/// Runs the 10-step admission sequence, stopping at the first failure.
pub async fn validate(deps: &PipelineDeps<'_>, settings: &Settings, user_op: &UserOp, entry_point: Address, now: i64) -> Result<Decision, PipelineError> {
    user_op.validate_shape().map_err(|e| PipelineError::Encoding(e.to_string()))?;

    if !deps.entry_points.is_supported(entry_point).await? {
        return Err(PipelineError::EntryPointNotSupported);
    }

    let hash = deps.rpc.get_user_op_hash(entry_point, user_op).await?;

    // 1. Uniqueness.
    if deps.mempool.get_by_hash(hash).await?.is_some() {
        return Err(PipelineError::Duplicate);
    }

    // 2. Origin: sender is a deployed contract, or init_code's factory is.
    let sender_is_contract = deps.rpc.is_contract(user_op.sender).await?;
    let mut helper_addresses: Vec<Address> = Vec::new();
    let initializing;
    if sender_is_contract {
        helper_addresses.push(user_op.sender);
        initializing = false;
    } else {
        let factory = user_op.factory().ok_or(PipelineError::OriginError)?;
        if !deps.rpc.is_contract(factory).await? {
            return Err(PipelineError::OriginError);
        }
        helper_addresses.push(factory);
        initializing = true;
    }

    // 3. Gas arithmetic.
    if user_op.call_gas_limit < U256::from(CALL_GAS) {
        return Err(PipelineError::GasError("call_gas_limit below the minimum non-zero-value CALL cost"));
    }
    if user_op.pre_verification_gas < U256::from(user_op.calldata_gas()) {
        return Err(PipelineError::GasError("pre_verification_gas below calldata_gas(user_op)"));
    }
    if user_op.verification_gas_limit > settings.max_verification_gas_limit {
        return Err(PipelineError::GasError("verification_gas_limit exceeds max_verification_gas_limit"));
    }
    if user_op.max_fee_per_gas < settings.min_max_fee_per_gas {
        return Err(PipelineError::GasError("max_fee_per_gas below min_max_fee_per_gas"));
    }
    if user_op.max_priority_fee_per_gas < settings.min_max_priority_fee_per_gas {
        return Err(PipelineError::GasError("max_priority_fee_per_gas below min_max_priority_fee_per_gas"));
    }
    let base_fee = deps.rpc.base_fee().await?;
    if user_op.max_fee_per_gas < user_op.max_priority_fee_per_gas + base_fee {
        return Err(PipelineError::GasError("max_fee_per_gas below max_priority_fee_per_gas plus current base fee"));
    }

    // 4. Paymaster.
    let with_paymaster = !user_op.paymaster_and_data.is_empty();
    if with_paymaster {
        let paymaster = user_op.paymaster().ok_or(PipelineError::PaymasterError("paymaster_and_data too short to contain an address"))?;
        if !deps.rpc.is_contract(paymaster).await? {
            return Err(PipelineError::PaymasterError("paymaster prefix is not a contract"));
        }
        let deposit = deps.rpc.balance_of_deposit(entry_point, paymaster).await?;
        if deposit < user_op.required_prefund(true) {
            return Err(PipelineError::PaymasterError("paymaster deposit is below the required prefund"));
        }
        helper_addresses.push(paymaster);
    }

    // 5. Simulate.
    let outcome = deps.rpc.simulate_validation(entry_point, user_op).await?;
    let simulation = decode_simulation_result(outcome.revert_selector, &outcome.revert_payload)
        .map_err(|e| PipelineError::SimulationError(e.to_string()))?;
    if let Some(agg) = &simulation.aggregation {
        helper_addresses.push(agg.aggregator);
    }

    // 6. Temporal validity.
    if (simulation.valid_until_raw as i64) <= now && simulation.valid_until_raw != 0 {
        return Err(PipelineError::TemporalError("expired on arrival"));
    }
    if (simulation.valid_after as i64) > now + settings.user_op_lifetime_secs {
        return Err(PipelineError::TemporalError("validity window starts after the pool lifetime"));
    }
    let valid_until = simulation.valid_until_normalized();
    let expires_at = simulation.expires_at(now, settings.user_op_lifetime_secs);

    // 7. Ban check.
    let mut helper_bytecode_hashes = Vec::with_capacity(helper_addresses.len());
    for addr in &helper_addresses {
        helper_bytecode_hashes.push(deps.rpc.code_hash(*addr).await?);
    }
    if deps.reputation.any_banned(&helper_bytecode_hashes).await? {
        return Err(PipelineError::BannedBytecode);
    }

    // 8. Trust computation.
    let is_trusted = deps.reputation.all_trusted(&helper_bytecode_hashes).await?;

    // 9. Same-bytecode tenancy (only if not trusted).
    if !is_trusted
        && deps
            .mempool
            .any_other_sender_using_unknown_bytecode(user_op.sender, &helper_bytecode_hashes, now)
            .await?
    {
        return Err(PipelineError::UntrustedTenancy);
    }

    // 10. Trace validation (only if not trusted AND a trace was produced).
    if !is_trusted {
        if let Some(trace_frames) = &outcome.trace {
            let mut contract_cache: std::collections::HashMap<Address, bool> =
                helper_addresses.iter().map(|a| (*a, true)).collect();
            for addr in trace::addresses_needing_contract_check(trace_frames, entry_point) {
                if let std::collections::hash_map::Entry::Vacant(entry) = contract_cache.entry(addr) {
                    let is_contract = deps.rpc.is_contract(addr).await?;
                    entry.insert(is_contract);
                }
            }
            if let Some(violation) =
                trace::validate_trace(trace_frames, entry_point, initializing, |a| contract_cache.get(&a).copied().unwrap_or(false))
            {
                // `helper_contract_index` is -1 when the violation occurs before the
                // first depth-1 NUMBER boundary; the original implementation bans
                // `helper_contracts_bytecode_hashes[-1]` (the *last* helper) in that
                // case, not the first. Clamping to 0 here is a deliberate deviation,
                // not a port of that behavior: the pre-boundary frames belong to
                // whichever helper runs first (the sender or factory), so index 0
                // is the more defensible attribution when no boundary has fired yet.
                let offending_index = if violation.helper_contract_index < 0 {
                    0
                } else {
                    violation.helper_contract_index as usize
                };
                if let Some(offending_addr) = helper_addresses.get(offending_index) {
                    deps.reputation.set_by_address(deps.rpc, *offending_addr, false).await?;
                }
                return Err(PipelineError::OpcodeViolation(describe_opcode_violation(violation.kind)));
            }
        }
    }

    Ok(Decision { hash, simulation, is_trusted, helper_bytecode_hashes, valid_after: simulation_valid_after(&simulation), valid_until, expires_at })
}

fn simulation_valid_after(simulation: &SimulationResult) -> i64 {
    simulation.valid_after as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_configuration_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_verification_gas_limit, U256::from(6_000_000u64));
        assert_eq!(settings.user_op_lifetime_secs, 1800);
    }
}

/// Runs `validate`, then persists the accepted UserOp via the mempool store.
pub async fn accept(
    deps: &PipelineDeps<'_>,
    settings: &Settings,
    user_op: &UserOp,
    entry_point: Address,
    now: i64,
) -> Result<Decision, PipelineError> {
    let decision = validate(deps, settings, user_op, entry_point, now).await?;
    deps.mempool
        .add(
            decision.hash,
            user_op,
            entry_point,
            decision.simulation.pre_op_gas,
            decision.is_trusted,
            decision.valid_after,
            decision.valid_until,
            decision.expires_at,
            &decision.helper_bytecode_hashes,
        )
        .await?;
    tracing::info!(user_op_hash = %decision.hash, sender = %user_op.sender, is_trusted = decision.is_trusted, "user operation admitted");
    Ok(decision)
}
