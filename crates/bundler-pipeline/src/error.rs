//! Error taxonomy: every variant maps 1:1 to a distinct, human-readable
//! detail message the HTTP layer surfaces as `422 {detail: "..."}`.

use bundler_simulation::trace::OpcodeViolationKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("entry point is not supported")]
    EntryPointNotSupported,

    #[error("user operation is already in the pool")]
    Duplicate,

    #[error("sender is not a contract and init_code's factory is not a contract")]
    OriginError,

    #[error("gas error: {0}")]
    GasError(&'static str),

    #[error("paymaster error: {0}")]
    PaymasterError(&'static str),

    #[error("simulation error: {0}")]
    SimulationError(String),

    #[error("temporal error: {0}")]
    TemporalError(&'static str),

    #[error("bytecode is blacklisted")]
    BannedBytecode,

    #[error("an unknown-reputation helper contract is already occupied by another sender")]
    UntrustedTenancy,

    #[error("opcode violation: {0}")]
    OpcodeViolation(String),

    #[error("not found")]
    NotFound,

    /// A condition the pipeline treats as a fatal node/contract mismatch
    /// rather than a rejection — e.g. `simulateValidation` did not revert.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

pub fn describe_opcode_violation(kind: OpcodeViolationKind) -> String {
    match kind {
        OpcodeViolationKind::ProhibitedOpcode(op) => format!("prohibited opcode '{}'", opcode_name(op)),
        OpcodeViolationKind::Create2UnacceptableContext => "CREATE2 used in an unacceptable context".to_string(),
        OpcodeViolationKind::GasNotFollowedByExternalCall => "GAS opcode not immediately followed by an external call".to_string(),
        OpcodeViolationKind::ExtcodeOnNonContract => "accesses code at an address without a smart contract".to_string(),
        OpcodeViolationKind::CallToNonContract => "calls an address that is neither a precompile nor a smart contract".to_string(),
        OpcodeViolationKind::ForbiddenEntryPointSelector => {
            "calls the EntryPoint with a selector other than depositTo or the fallback".to_string()
        }
    }
}

fn opcode_name(op: bundler_types::trace::Opcode) -> &'static str {
    use bundler_types::trace::Opcode::*;
    match op {
        Balance => "BALANCE",
        Basefee => "BASEFEE",
        Blockhash => "BLOCKHASH",
        Coinbase => "COINBASE",
        Create => "CREATE",
        Create2 => "CREATE2",
        Prevrandao => "PREVRANDAO",
        Gaslimit => "GASLIMIT",
        Gasprice => "GASPRICE",
        Number => "NUMBER",
        Origin => "ORIGIN",
        Selfbalance => "SELFBALANCE",
        Selfdestruct => "SELFDESTRUCT",
        Timestamp => "TIMESTAMP",
        Gas => "GAS",
        Call => "CALL",
        Callcode => "CALLCODE",
        Delegatecall => "DELEGATECALL",
        Staticcall => "STATICCALL",
        Extcodehash => "EXTCODEHASH",
        Extcodesize => "EXTCODESIZE",
        Extcodecopy => "EXTCODECOPY",
        Other => "OTHER",
    }
}
