//! Typed facade over the Ethereum node: the only way the core ever touches
//! `eth_call`, `debug_traceCall`, `eth_getCode`, `eth_estimateGas`,
//! `eth_getBlock`, and event-log filters.

mod json_client;
pub mod mock;
mod quantity;

pub use json_client::JsonRpcEthereumClient;
pub use mock::MockEthereumRpc;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use bundler_types::trace::Trace;
use bundler_types::UserOp;

/// Outcome of `simulateValidation`: the call is expected to revert with a
/// structured payload; the decoder (`bundler-simulation`) interprets it.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub revert_selector: [u8; 4],
    pub revert_payload: Bytes,
    pub trace: Option<Trace>,
}

/// The two ways a pooled UserOp's fate can be observed on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserOpReceipt {
    pub tx_hash: B256,
    pub accepted: bool,
}

#[async_trait]
pub trait EthereumRpc: Send + Sync {
    /// True iff `eth_getCode(address)` is non-empty and address is not the
    /// zero address.
    async fn is_contract(&self, address: Address) -> anyhow::Result<bool>;

    /// keccak256 of the code at `address` (the well-known empty-bytes hash
    /// when the address has no code).
    async fn code_hash(&self, address: Address) -> anyhow::Result<B256>;

    /// `baseFeePerGas` of the latest block, or 0 on a pre-London chain.
    async fn base_fee(&self) -> anyhow::Result<U256>;

    /// EntryPoint's recorded deposit balance for `paymaster`.
    async fn balance_of_deposit(&self, entry_point: Address, paymaster: Address) -> anyhow::Result<U256>;

    /// Invokes `simulateValidation`. The call must revert; a non-revert is a
    /// fatal simulator-mismatch error surfaced to the caller as `Err`.
    async fn simulate_validation(&self, entry_point: Address, user_op: &UserOp) -> anyhow::Result<SimulationOutcome>;

    /// Scans `UserOperationEvent`/`UserOperationRevertReason` for `hash`,
    /// starting from `from_block`. When both are present the revert wins.
    async fn user_op_receipt(
        &self,
        entry_point: Address,
        hash: B256,
        from_block: u64,
    ) -> anyhow::Result<Option<UserOpReceipt>>;

    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes) -> anyhow::Result<U256>;

    /// Calls `EntryPoint.getUserOpHash`, the only sanctioned way to derive a
    /// UserOp's canonical hash (never recomputed locally).
    async fn get_user_op_hash(&self, entry_point: Address, user_op: &UserOp) -> anyhow::Result<B256>;

    /// Monotone cursor bounding event-log queries; advanced only by
    /// `user_op_receipt`. Process-wide, never persisted by the trait itself.
    fn last_seen_block(&self) -> u64;
}
