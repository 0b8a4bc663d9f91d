//! Shared application state: one instance wired up in `main`, handed to every
//! axum handler behind an `Arc`.

use std::sync::Arc;

use bundler_mempool::{EntryPointRegistry, MempoolStore};
use bundler_pipeline::Settings;
use bundler_reputation::BytecodeStore;
use bundler_rpc_client::{EthereumRpc, JsonRpcEthereumClient};

use crate::config::AppConfig;

pub struct AppState {
    pub rpc: JsonRpcEthereumClient,
    pub mempool: MempoolStore,
    pub reputation: BytecodeStore,
    pub entry_points: EntryPointRegistry,
    pub settings: Settings,
    pub last_user_ops_count: usize,
}

impl AppState {
    pub fn rpc(&self) -> &dyn EthereumRpc {
        &self.rpc
    }
}

pub fn settings_from_config(cfg: &AppConfig) -> Settings {
    Settings {
        max_verification_gas_limit: alloy::primitives::U256::from(cfg.max_verification_gas_limit),
        min_max_fee_per_gas: alloy::primitives::U256::from(cfg.min_max_fee_per_gas),
        min_max_priority_fee_per_gas: alloy::primitives::U256::from(cfg.min_max_priority_fee_per_gas),
        user_op_lifetime_secs: cfg.user_op_lifetime_secs,
    }
}

pub type SharedState = Arc<AppState>;
