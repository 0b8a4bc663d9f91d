//! Recognized configuration options: gas and temporal policy knobs, the RPC
//! endpoint, environment selection, and DB connection parameters. Flat `Env`
//! struct deserialized via `envy`.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    App,
    Test,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "APP" => Ok(Environment::App),
            "TEST" => Ok(Environment::Test),
            other => anyhow::bail!("invalid ENVIRONMENT value: {other} (expected APP|TEST)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc_endpoint_uri: String,
    pub environment: Environment,
    pub max_verification_gas_limit: u64,
    pub min_max_fee_per_gas: u64,
    pub min_max_priority_fee_per_gas: u64,
    pub user_op_lifetime_secs: i64,
    pub last_user_ops_count: usize,
    pub bind_addr: String,
    pub db_url: String,
    pub db_max_connections: u32,
    /// Supported entry points seeded on first boot; the registry itself lives
    /// in Postgres and is the source of truth thereafter.
    pub seed_entry_points: Vec<Address>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Env {
    rpc_endpoint_uri: String,
    environment: String,
    max_verification_gas_limit: u64,
    min_max_fee_per_gas: u64,
    min_max_priority_fee_per_gas: u64,
    user_op_lifetime: i64,
    last_user_ops_count: usize,
    bind_addr: String,
    db_url: String,
    db_max_connections: u32,
    /// Comma-separated list of 0x-addresses.
    supported_entry_points: String,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            rpc_endpoint_uri: String::new(),
            environment: "APP".to_string(),
            max_verification_gas_limit: DEFAULT_MAX_VERIFICATION_GAS_LIMIT,
            min_max_fee_per_gas: DEFAULT_MIN_MAX_FEE_PER_GAS,
            min_max_priority_fee_per_gas: DEFAULT_MIN_MAX_PRIORITY_FEE_PER_GAS,
            user_op_lifetime: DEFAULT_USER_OP_LIFETIME_SECS,
            last_user_ops_count: DEFAULT_LAST_USER_OPS_COUNT,
            bind_addr: "127.0.0.1:8000".to_string(),
            db_url: String::new(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            supported_entry_points: String::new(),
        }
    }
}

pub fn load_config() -> Result<AppConfig> {
    let env: Env = envy::from_env().context("load bundler-node env config")?;

    if env.rpc_endpoint_uri.trim().is_empty() {
        anyhow::bail!("RPC_ENDPOINT_URI must be set");
    }
    if env.db_url.trim().is_empty() {
        anyhow::bail!("DB_URL must be set");
    }

    let environment = env.environment.parse().context("ENVIRONMENT")?;

    let seed_entry_points = env
        .supported_entry_points
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Address>().with_context(|| format!("parse SUPPORTED_ENTRY_POINTS entry '{s}'")))
        .collect::<Result<Vec<_>>>()?;

    Ok(AppConfig {
        rpc_endpoint_uri: env.rpc_endpoint_uri,
        environment,
        max_verification_gas_limit: env.max_verification_gas_limit,
        min_max_fee_per_gas: env.min_max_fee_per_gas,
        min_max_priority_fee_per_gas: env.min_max_priority_fee_per_gas,
        user_op_lifetime_secs: env.user_op_lifetime.max(1),
        last_user_ops_count: env.last_user_ops_count.max(1),
        bind_addr: env.bind_addr,
        db_url: env.db_url,
        db_max_connections: env.db_max_connections.max(1),
        seed_entry_points,
    })
}

const DEFAULT_MAX_VERIFICATION_GAS_LIMIT: u64 = 6_000_000;
const DEFAULT_MIN_MAX_FEE_PER_GAS: u64 = 1;
const DEFAULT_MIN_MAX_PRIORITY_FEE_PER_GAS: u64 = 1;
const DEFAULT_USER_OP_LIFETIME_SECS: i64 = 1800;
const DEFAULT_LAST_USER_OPS_COUNT: usize = 100;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("app".parse::<Environment>().unwrap(), Environment::App);
        assert_eq!("TEST".parse::<Environment>().unwrap(), Environment::Test);
        assert!("prod".parse::<Environment>().is_err());
    }
}
