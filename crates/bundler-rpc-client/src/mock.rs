//! In-memory `EthereumRpc` test double: fixed, pre-programmed responses keyed
//! by address/hash, with no network I/O. Used by `bundler-pipeline` and
//! `bundler-mempool` integration tests to drive the pipeline deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use bundler_types::UserOp;

use crate::{EthereumRpc, SimulationOutcome, UserOpReceipt};

#[derive(Default)]
pub struct MockEthereumRpc {
    contract_code: RwLock<HashMap<Address, Bytes>>,
    deposits: RwLock<HashMap<(Address, Address), U256>>,
    base_fee: RwLock<U256>,
    simulations: RwLock<HashMap<B256, SimulationOutcome>>,
    receipts: RwLock<HashMap<B256, UserOpReceipt>>,
    user_op_hashes: RwLock<HashMap<B256, B256>>,
    last_seen_block: AtomicU64,
}

impl MockEthereumRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_code(&self, address: Address, code: impl Into<Bytes>) {
        self.contract_code.write().unwrap().insert(address, code.into());
    }

    pub fn set_deposit(&self, entry_point: Address, paymaster: Address, amount: U256) {
        self.deposits.write().unwrap().insert((entry_point, paymaster), amount);
    }

    pub fn set_base_fee(&self, value: U256) {
        *self.base_fee.write().unwrap() = value;
    }

    /// Keys a canned `simulateValidation` outcome off the UserOp's hash, as
    /// returned by `set_user_op_hash`.
    pub fn set_simulation(&self, user_op_hash: B256, outcome: SimulationOutcome) {
        self.simulations.write().unwrap().insert(user_op_hash, outcome);
    }

    pub fn set_user_op_hash(&self, user_op_sentinel: B256, hash: B256) {
        self.user_op_hashes.write().unwrap().insert(user_op_sentinel, hash);
    }

    pub fn set_receipt(&self, hash: B256, receipt: UserOpReceipt) {
        self.receipts.write().unwrap().insert(hash, receipt);
    }

    fn sentinel(user_op: &UserOp) -> B256 {
        keccak256(user_op.abi_encode(true))
    }
}

#[async_trait]
impl EthereumRpc for MockEthereumRpc {
    async fn is_contract(&self, address: Address) -> anyhow::Result<bool> {
        if address.is_zero() {
            return Ok(false);
        }
        Ok(self.contract_code.read().unwrap().get(&address).map(|c| !c.is_empty()).unwrap_or(false))
    }

    async fn code_hash(&self, address: Address) -> anyhow::Result<B256> {
        let code = self.contract_code.read().unwrap().get(&address).cloned().unwrap_or_default();
        Ok(keccak256(code))
    }

    async fn base_fee(&self) -> anyhow::Result<U256> {
        Ok(*self.base_fee.read().unwrap())
    }

    async fn balance_of_deposit(&self, entry_point: Address, paymaster: Address) -> anyhow::Result<U256> {
        Ok(self.deposits.read().unwrap().get(&(entry_point, paymaster)).copied().unwrap_or(U256::ZERO))
    }

    async fn simulate_validation(&self, _entry_point: Address, user_op: &UserOp) -> anyhow::Result<SimulationOutcome> {
        let sentinel = Self::sentinel(user_op);
        self.simulations
            .read()
            .unwrap()
            .get(&sentinel)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no simulation result programmed for this user op"))
    }

    async fn user_op_receipt(&self, _entry_point: Address, hash: B256, _from_block: u64) -> anyhow::Result<Option<UserOpReceipt>> {
        Ok(self.receipts.read().unwrap().get(&hash).copied())
    }

    async fn estimate_gas(&self, _from: Address, _to: Address, _data: Bytes) -> anyhow::Result<U256> {
        Ok(U256::from(21_000))
    }

    async fn get_user_op_hash(&self, _entry_point: Address, user_op: &UserOp) -> anyhow::Result<B256> {
        let sentinel = Self::sentinel(user_op);
        Ok(self.user_op_hashes.read().unwrap().get(&sentinel).copied().unwrap_or(sentinel))
    }

    fn last_seen_block(&self) -> u64 {
        self.last_seen_block.load(Ordering::Relaxed)
    }
}
