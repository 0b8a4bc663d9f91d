//! Admin subcommands: `initialize-db`, `runserver`,
//! `update-bytecode-from-address`, `update-entry-point`.

use alloy::primitives::Address;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bundler-node", about = "ERC-4337 UserOp admission node")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Applies pending schema migrations and exits.
    InitializeDb,
    /// Serves the RPC surface until signaled to stop. The default when no
    /// subcommand is given.
    Runserver,
    /// Sets a contract's bytecode reputation by fetching its current code.
    UpdateBytecodeFromAddress {
        address: Address,
        is_trusted: bool,
    },
    /// Adds or removes an EntryPoint from the supported-entry-point registry.
    UpdateEntryPoint {
        address: Address,
        is_supported: bool,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Runserver
    }
}
