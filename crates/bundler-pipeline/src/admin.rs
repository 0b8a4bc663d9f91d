//! Admin operations (component I): update a bytecode's reputation by
//! address, and toggle supported-EntryPoint membership. Both are invoked by
//! the admin CLI; neither is reachable from the public RPC surface.

use alloy::primitives::{Address, B256};
use bundler_mempool::EntryPointRegistry;
use bundler_reputation::BytecodeStore;
use bundler_rpc_client::EthereumRpc;

/// Fetches the current code at `address`, hashes it, and upserts the
/// reputation row — banning cascade-deletes dependent pooled UserOps inside
/// `BytecodeStore::set_by_address`.
pub async fn update_bytecode_from_address(
    reputation: &BytecodeStore,
    rpc: &dyn EthereumRpc,
    address: Address,
    is_trusted: bool,
) -> anyhow::Result<B256> {
    reputation.set_by_address(rpc, address, is_trusted).await
}

/// Adds or removes `address` from the supported-EntryPoint registry.
pub async fn update_entry_point(
    entry_points: &EntryPointRegistry,
    address: Address,
    is_supported: bool,
) -> anyhow::Result<()> {
    if is_supported {
        entry_points.add(address).await
    } else {
        entry_points.remove(address).await
    }
}

#[cfg(test)]
mod tests {
    // Exercised end to end in the bundler-node admin CLI integration tests
    // (these two functions are thin delegations with no branch logic of
    // their own worth unit-testing against a real database).
}
