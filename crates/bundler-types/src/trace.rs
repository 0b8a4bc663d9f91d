//! Execution-trace primitives shared between the RPC adapter (which produces
//! them from `debug_traceCall`) and the trace validator (which consumes them).

use alloy::primitives::{Bytes, U256};
use serde::{Deserialize, Serialize};

/// The subset of EVM opcodes the trace validator cares about. Anything else
/// observed in a trace is carried as `Other` and never participates in a
/// prohibited-opcode or CALL-target check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Balance,
    Basefee,
    Blockhash,
    Coinbase,
    Create,
    Create2,
    /// Covers both the pre-Merge `DIFFICULTY` opcode and its post-Merge
    /// `PREVRANDAO` alias at the same opcode byte.
    Prevrandao,
    Gaslimit,
    Gasprice,
    Number,
    Origin,
    Selfbalance,
    Selfdestruct,
    Timestamp,
    Gas,
    Call,
    Callcode,
    Delegatecall,
    Staticcall,
    Extcodehash,
    Extcodesize,
    Extcodecopy,
    Other,
}

/// One frame of an opcode-level execution trace, as produced by
/// `debug_traceCall` with the struct-logger tracer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFrame {
    /// Call-stack depth; top-level execution is depth 1.
    pub depth: u32,
    pub op: Opcode,
    /// Stack contents at the time `op` executes, top-of-stack last.
    pub stack: Vec<U256>,
    pub memory: Bytes,
    /// Address of the contract currently executing this frame.
    pub executing_contract: alloy::primitives::Address,
}

pub type Trace = Vec<TraceFrame>;
