//! Walks an opcode-level execution trace and enforces the ERC-4337
//! validation-phase storage- and opcode-restriction rules. A pure function:
//! no RPC or DB access, so it is unit-testable against hand-built frames.

use alloy::primitives::{Address, U256};
use bundler_types::trace::{Opcode, TraceFrame};

const PROHIBITED_OPCODES: &[Opcode] = &[
    Opcode::Balance,
    Opcode::Basefee,
    Opcode::Blockhash,
    Opcode::Coinbase,
    Opcode::Create,
    Opcode::Prevrandao, // covers both DIFFICULTY and PREVRANDAO, the pre/post-Merge alias.
    Opcode::Gaslimit,
    Opcode::Gasprice,
    Opcode::Number,
    Opcode::Origin,
    Opcode::Selfbalance,
    Opcode::Selfdestruct,
    Opcode::Timestamp,
];

const EXTERNAL_CALL_OPCODES: &[Opcode] = &[Opcode::Call, Opcode::Delegatecall, Opcode::Callcode, Opcode::Staticcall];

/// `depositTo(address)` selector — the only non-fallback EntryPoint method a
/// helper contract's validation code is allowed to call during simulation.
const DEPOSIT_TO_SELECTOR: [u8; 4] = {
    // keccak256("depositTo(address)")[..4]
    [0x4f, 0xaa, 0x13, 0x60]
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeViolationKind {
    ProhibitedOpcode(Opcode),
    Create2UnacceptableContext,
    GasNotFollowedByExternalCall,
    ExtcodeOnNonContract,
    CallToNonContract,
    ForbiddenEntryPointSelector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    /// Zero-based index of the helper contract (factory/sender/paymaster/
    /// aggregator, in entry order) whose validation code caused the violation.
    pub helper_contract_index: i32,
    pub kind: OpcodeViolationKind,
}

fn stack_from_top(stack: &[U256], n: usize) -> Option<U256> {
    stack.len().checked_sub(n).map(|idx| stack[idx])
}

fn address_from_u256(v: U256) -> Address {
    Address::from_slice(&v.to_be_bytes::<32>()[12..])
}

fn is_precompile(address: Address) -> bool {
    let bytes = address.into_array();
    bytes[..19].iter().all(|b| *b == 0) && (1..=9).contains(&bytes[19])
}

/// Every address that a clean pass over `frames` would need an `is_contract`
/// answer for (EXTCODE*/CALL* targets, skipping EntryPoint self-calls and
/// precompiles). The pipeline resolves these via the RPC adapter and builds
/// the `is_contract` lookup `validate_trace` is given, so the validator never
/// has to assume an address is a contract just because it's a known helper.
pub fn addresses_needing_contract_check(frames: &[TraceFrame], entry_point: Address) -> Vec<Address> {
    let mut out = Vec::new();
    for frame in frames {
        if frame.depth == 1 || frame.executing_contract == entry_point {
            continue;
        }
        if matches!(frame.op, Opcode::Extcodehash | Opcode::Extcodesize | Opcode::Extcodecopy) {
            if let Some(target) = stack_from_top(&frame.stack, 1) {
                out.push(address_from_u256(target));
            }
        }
        if matches!(frame.op, Opcode::Call | Opcode::Callcode | Opcode::Delegatecall | Opcode::Staticcall) {
            if let Some(target) = stack_from_top(&frame.stack, 2) {
                let target = address_from_u256(target);
                if !is_precompile(target) {
                    out.push(target);
                }
            }
        }
    }
    out
}

/// Walks `frames` in order, maintaining the per-helper-contract-boundary
/// state machine described in the opcode-restriction rules. Returns the
/// first violation found, or `None` on a clean trace.
pub fn validate_trace<F>(frames: &[TraceFrame], entry_point: Address, initializing: bool, is_contract: F) -> Option<Violation>
where
    F: Fn(Address) -> bool,
{
    let mut create2_can_be_called = initializing;
    let mut helper_contract_index: i32 = -1;

    for (i, frame) in frames.iter().enumerate() {
        if frame.depth == 1 {
            if frame.op == Opcode::Number {
                helper_contract_index += 1;
            }
            continue;
        }

        if frame.executing_contract == entry_point {
            continue;
        }

        if frame.op == Opcode::Number {
            create2_can_be_called = false;
        }

        if PROHIBITED_OPCODES.contains(&frame.op) {
            return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::ProhibitedOpcode(frame.op) });
        }

        if frame.op == Opcode::Create2 {
            if create2_can_be_called {
                create2_can_be_called = false;
            } else {
                return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::Create2UnacceptableContext });
            }
        }

        if frame.op == Opcode::Gas {
            let followed_by_external_call =
                frames.get(i + 1).map(|next| EXTERNAL_CALL_OPCODES.contains(&next.op)).unwrap_or(false);
            if !followed_by_external_call {
                return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::GasNotFollowedByExternalCall });
            }
        }

        if matches!(frame.op, Opcode::Extcodehash | Opcode::Extcodesize | Opcode::Extcodecopy) {
            let Some(target) = stack_from_top(&frame.stack, 1) else {
                return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::ExtcodeOnNonContract });
            };
            let target = address_from_u256(target);
            if !is_contract(target) {
                return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::ExtcodeOnNonContract });
            }
        }

        if matches!(frame.op, Opcode::Call | Opcode::Callcode | Opcode::Delegatecall | Opcode::Staticcall) {
            let Some(target) = stack_from_top(&frame.stack, 2) else {
                return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::CallToNonContract });
            };
            let target = address_from_u256(target);
            if !is_precompile(target) && !is_contract(target) {
                return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::CallToNonContract });
            }

            if target == entry_point {
                let bytes_offset_arg = match frame.op {
                    Opcode::Call | Opcode::Callcode => 4,
                    _ => 3,
                };
                let Some(offset) = stack_from_top(&frame.stack, bytes_offset_arg) else {
                    return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::ForbiddenEntryPointSelector });
                };
                let offset: usize = offset.try_into().unwrap_or(usize::MAX);
                let selector = frame.memory.get(offset..offset + 4);
                let allowed = match selector {
                    Some(s) => s == DEPOSIT_TO_SELECTOR || s == [0u8; 4],
                    None => false,
                };
                if !allowed {
                    return Some(Violation { helper_contract_index, kind: OpcodeViolationKind::ForbiddenEntryPointSelector });
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;

    fn frame(depth: u32, op: Opcode) -> TraceFrame {
        TraceFrame { depth, op, stack: vec![], memory: Bytes::new(), executing_contract: Address::ZERO }
    }

    fn boundary(n: u32) -> Vec<TraceFrame> {
        (0..n).map(|_| frame(1, Opcode::Number)).collect()
    }

    fn always_contract(_: Address) -> bool {
        true
    }

    #[test]
    fn clean_trace_has_no_violation() {
        let mut frames = boundary(1);
        frames.push(frame(2, Opcode::Other));
        assert!(validate_trace(&frames, Address::ZERO, false, always_contract).is_none());
    }

    #[test]
    fn prohibited_opcode_is_flagged_with_its_helper_index() {
        let mut frames = boundary(2); // helper_contract_index becomes 1
        frames.push(frame(2, Opcode::Gasprice));
        let violation = validate_trace(&frames, Address::ZERO, false, always_contract).unwrap();
        assert_eq!(violation.helper_contract_index, 1);
        assert_eq!(violation.kind, OpcodeViolationKind::ProhibitedOpcode(Opcode::Gasprice));
    }

    #[test]
    fn create2_allowed_once_when_initializing() {
        let mut frames = boundary(1);
        frames.push(frame(2, Opcode::Create2));
        assert!(validate_trace(&frames, Address::ZERO, true, always_contract).is_none());
    }

    #[test]
    fn second_create2_in_same_trace_is_a_violation() {
        let mut frames = boundary(1);
        frames.push(frame(2, Opcode::Create2));
        frames.push(frame(2, Opcode::Create2));
        let violation = validate_trace(&frames, Address::ZERO, true, always_contract).unwrap();
        assert_eq!(violation.kind, OpcodeViolationKind::Create2UnacceptableContext);
    }

    #[test]
    fn create2_without_initializing_is_a_violation() {
        let mut frames = boundary(1);
        frames.push(frame(2, Opcode::Create2));
        let violation = validate_trace(&frames, Address::ZERO, false, always_contract).unwrap();
        assert_eq!(violation.kind, OpcodeViolationKind::Create2UnacceptableContext);
    }

    #[test]
    fn gas_must_immediately_precede_external_call() {
        let mut frames = boundary(1);
        frames.push(frame(2, Opcode::Gas));
        frames.push(frame(2, Opcode::Other));
        let violation = validate_trace(&frames, Address::ZERO, false, always_contract).unwrap();
        assert_eq!(violation.kind, OpcodeViolationKind::GasNotFollowedByExternalCall);
    }

    #[test]
    fn gas_followed_by_call_is_fine() {
        let mut frames = boundary(1);
        frames.push(frame(2, Opcode::Gas));
        let mut call_frame = frame(2, Opcode::Call);
        // stack is top-of-stack-last: [.., target, gas] so target is second-from-top.
        call_frame.stack = vec![U256::from(9), U256::from(1)]; // target = precompile 9
        frames.push(call_frame);
        assert!(validate_trace(&frames, Address::ZERO, false, always_contract).is_none());
    }

    #[test]
    fn extcodehash_on_eoa_is_a_violation() {
        let mut frames = boundary(1);
        let mut f = frame(2, Opcode::Extcodehash);
        f.stack = vec![U256::from(0xbeef)];
        frames.push(f);
        let violation = validate_trace(&frames, Address::ZERO, false, |_| false).unwrap();
        assert_eq!(violation.kind, OpcodeViolationKind::ExtcodeOnNonContract);
    }

    #[test]
    fn call_to_precompile_is_allowed() {
        let mut frames = boundary(1);
        let mut f = frame(2, Opcode::Staticcall);
        f.stack = vec![U256::from(2), U256::from(0)]; // target = precompile 2 (sha256), gas on top
        frames.push(f);
        assert!(validate_trace(&frames, Address::ZERO, false, |_| false).is_none());
    }

    /// CALL stack laid out bottom-to-top as the EVM pops it, so `stack_from_top`
    /// (top-of-stack-last) lines up with the spec's "second-from-top"/"-4th"
    /// offsets: `[retLength, retOffset, argsLength, argsOffset, value, target, gas]`.
    fn call_stack(target: U256, args_offset: u64) -> Vec<U256> {
        vec![
            U256::ZERO,
            U256::ZERO,
            U256::from(4),
            U256::from(args_offset),
            U256::ZERO,
            target,
            U256::from(100_000),
        ]
    }

    #[test]
    fn call_to_entry_point_with_deposit_to_selector_is_allowed() {
        let entry_point = Address::repeat_byte(0xEE);
        let mut frames = boundary(1);
        let mut f = frame(2, Opcode::Call);
        let target = U256::from_be_slice(entry_point.as_slice());
        f.stack = call_stack(target, 32);
        let mut memory = vec![0u8; 32];
        memory.extend_from_slice(&DEPOSIT_TO_SELECTOR);
        f.memory = Bytes::from(memory);
        frames.push(f);
        assert!(validate_trace(&frames, entry_point, false, always_contract).is_none());
    }

    #[test]
    fn call_to_entry_point_with_other_selector_is_forbidden() {
        let entry_point = Address::repeat_byte(0xEE);
        let mut frames = boundary(1);
        let mut f = frame(2, Opcode::Call);
        let target = U256::from_be_slice(entry_point.as_slice());
        f.stack = call_stack(target, 32);
        let mut memory = vec![0u8; 32];
        memory.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        f.memory = Bytes::from(memory);
        frames.push(f);
        let violation = validate_trace(&frames, entry_point, false, always_contract).unwrap();
        assert_eq!(violation.kind, OpcodeViolationKind::ForbiddenEntryPointSelector);
    }

    #[test]
    fn entry_point_self_calls_are_skipped() {
        let entry_point = Address::repeat_byte(0xEE);
        let mut frames = boundary(1);
        let mut f = frame(2, Opcode::Gasprice);
        f.executing_contract = entry_point;
        frames.push(f);
        assert!(validate_trace(&frames, entry_point, false, always_contract).is_none());
    }
}
