// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;

/// An EVM operation: its mnemonic, byte value, and stack arity.
///
/// Synthetic operations produced during decompilation (`CONST`, `NOP`,
/// `THROW`, `THROWI`, `MISSING`) live above the byte range and are never
/// returned by [`opcode_by_value`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Opcode {
    pub name: &'static str,
    pub code: u16,
    pub pop: usize,
    pub push: usize,
}

impl Opcode {
    const fn new(name: &'static str, code: u16, pop: usize, push: usize) -> Self {
        Self {
            name,
            code,
            pop,
            push,
        }
    }

    /// Net change in stack depth caused by this operation.
    pub fn stack_delta(&self) -> isize {
        self.push as isize - self.pop as isize
    }

    pub fn is_push(&self) -> bool {
        matches!(self.code, 0x60..=0x7f)
    }

    /// Width in bytes of a PUSH immediate, zero for anything else.
    pub fn push_len(&self) -> usize {
        if self.is_push() {
            (self.code - 0x5f) as usize
        } else {
            0
        }
    }

    pub fn is_dup(&self) -> bool {
        matches!(self.code, 0x80..=0x8f)
    }

    /// The 1-based stack index duplicated by a DUP.
    pub fn dup_index(&self) -> usize {
        debug_assert!(self.is_dup());
        (self.code - 0x7f) as usize
    }

    pub fn is_swap(&self) -> bool {
        matches!(self.code, 0x90..=0x9f)
    }

    /// The 1-based stack index exchanged with the top by a SWAP.
    pub fn swap_index(&self) -> usize {
        debug_assert!(self.is_swap());
        (self.code - 0x8f) as usize
    }

    pub fn is_log(&self) -> bool {
        matches!(self.code, 0xa0..=0xa4)
    }

    /// Topic count of a LOG, zero for anything else.
    pub fn log_len(&self) -> usize {
        if self.is_log() {
            (self.code - 0xa0) as usize
        } else {
            0
        }
    }

    pub fn is_missing(&self) -> bool {
        self.code == MISSING.code
    }

    pub fn is_invalid(&self) -> bool {
        self.code == INVALID.code || self.is_missing()
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self.code, 0x01..=0x0b | 0x10..=0x1d)
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.code, 0x51..=0x53 | 0x59)
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.code, 0x54 | 0x55)
    }

    pub fn is_call(&self) -> bool {
        matches!(self.code, 0xf0..=0xf2 | 0xf4 | 0xf5 | 0xfa)
    }

    /// Whether execution can never proceed past this operation. Unknown
    /// opcodes halt abstractly, like INVALID.
    pub fn halts(&self) -> bool {
        matches!(self.code, 0x00 | 0xf3 | 0xfd | 0xfe | 0xff)
            || self.code == THROW.code
            || self.is_missing()
    }

    /// Whether this operation may end execution on some path.
    pub fn possibly_halts(&self) -> bool {
        self.halts() || self.code == JUMPI.code || self.code == THROWI.code
    }

    /// Whether this operation ends a basic block.
    pub fn alters_flow(&self) -> bool {
        matches!(self.code, 0x56 | 0x57) || self.code == THROWI.code || self.halts()
    }

    pub fn is_jump(&self) -> bool {
        matches!(self.code, 0x56 | 0x57)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// 0s: halting and arithmetic
pub const STOP: Opcode = Opcode::new("STOP", 0x00, 0, 0);
pub const ADD: Opcode = Opcode::new("ADD", 0x01, 2, 1);
pub const MUL: Opcode = Opcode::new("MUL", 0x02, 2, 1);
pub const SUB: Opcode = Opcode::new("SUB", 0x03, 2, 1);
pub const DIV: Opcode = Opcode::new("DIV", 0x04, 2, 1);
pub const SDIV: Opcode = Opcode::new("SDIV", 0x05, 2, 1);
pub const MOD: Opcode = Opcode::new("MOD", 0x06, 2, 1);
pub const SMOD: Opcode = Opcode::new("SMOD", 0x07, 2, 1);
pub const ADDMOD: Opcode = Opcode::new("ADDMOD", 0x08, 3, 1);
pub const MULMOD: Opcode = Opcode::new("MULMOD", 0x09, 3, 1);
pub const EXP: Opcode = Opcode::new("EXP", 0x0a, 2, 1);
pub const SIGNEXTEND: Opcode = Opcode::new("SIGNEXTEND", 0x0b, 2, 1);

// 10s: comparison and bitwise logic
pub const LT: Opcode = Opcode::new("LT", 0x10, 2, 1);
pub const GT: Opcode = Opcode::new("GT", 0x11, 2, 1);
pub const SLT: Opcode = Opcode::new("SLT", 0x12, 2, 1);
pub const SGT: Opcode = Opcode::new("SGT", 0x13, 2, 1);
pub const EQ: Opcode = Opcode::new("EQ", 0x14, 2, 1);
pub const ISZERO: Opcode = Opcode::new("ISZERO", 0x15, 1, 1);
pub const AND: Opcode = Opcode::new("AND", 0x16, 2, 1);
pub const OR: Opcode = Opcode::new("OR", 0x17, 2, 1);
pub const XOR: Opcode = Opcode::new("XOR", 0x18, 2, 1);
pub const NOT: Opcode = Opcode::new("NOT", 0x19, 1, 1);
pub const BYTE: Opcode = Opcode::new("BYTE", 0x1a, 2, 1);
pub const SHL: Opcode = Opcode::new("SHL", 0x1b, 2, 1);
pub const SHR: Opcode = Opcode::new("SHR", 0x1c, 2, 1);
pub const SAR: Opcode = Opcode::new("SAR", 0x1d, 2, 1);

// 20s: hashing
pub const SHA3: Opcode = Opcode::new("SHA3", 0x20, 2, 1);

// 30s: environmental information
pub const ADDRESS: Opcode = Opcode::new("ADDRESS", 0x30, 0, 1);
pub const BALANCE: Opcode = Opcode::new("BALANCE", 0x31, 1, 1);
pub const ORIGIN: Opcode = Opcode::new("ORIGIN", 0x32, 0, 1);
pub const CALLER: Opcode = Opcode::new("CALLER", 0x33, 0, 1);
pub const CALLVALUE: Opcode = Opcode::new("CALLVALUE", 0x34, 0, 1);
pub const CALLDATALOAD: Opcode = Opcode::new("CALLDATALOAD", 0x35, 1, 1);
pub const CALLDATASIZE: Opcode = Opcode::new("CALLDATASIZE", 0x36, 0, 1);
pub const CALLDATACOPY: Opcode = Opcode::new("CALLDATACOPY", 0x37, 3, 0);
pub const CODESIZE: Opcode = Opcode::new("CODESIZE", 0x38, 0, 1);
pub const CODECOPY: Opcode = Opcode::new("CODECOPY", 0x39, 3, 0);
pub const GASPRICE: Opcode = Opcode::new("GASPRICE", 0x3a, 0, 1);
pub const EXTCODESIZE: Opcode = Opcode::new("EXTCODESIZE", 0x3b, 1, 1);
pub const EXTCODECOPY: Opcode = Opcode::new("EXTCODECOPY", 0x3c, 4, 0);
pub const RETURNDATASIZE: Opcode = Opcode::new("RETURNDATASIZE", 0x3d, 0, 1);
pub const RETURNDATACOPY: Opcode = Opcode::new("RETURNDATACOPY", 0x3e, 3, 0);
pub const EXTCODEHASH: Opcode = Opcode::new("EXTCODEHASH", 0x3f, 1, 1);

// 40s: block information
pub const BLOCKHASH: Opcode = Opcode::new("BLOCKHASH", 0x40, 1, 1);
pub const COINBASE: Opcode = Opcode::new("COINBASE", 0x41, 0, 1);
pub const TIMESTAMP: Opcode = Opcode::new("TIMESTAMP", 0x42, 0, 1);
pub const NUMBER: Opcode = Opcode::new("NUMBER", 0x43, 0, 1);
pub const DIFFICULTY: Opcode = Opcode::new("DIFFICULTY", 0x44, 0, 1);
pub const GASLIMIT: Opcode = Opcode::new("GASLIMIT", 0x45, 0, 1);
pub const CHAINID: Opcode = Opcode::new("CHAINID", 0x46, 0, 1);
pub const SELFBALANCE: Opcode = Opcode::new("SELFBALANCE", 0x47, 0, 1);
pub const BASEFEE: Opcode = Opcode::new("BASEFEE", 0x48, 0, 1);

// 50s: stack, memory, storage and flow
pub const POP: Opcode = Opcode::new("POP", 0x50, 1, 0);
pub const MLOAD: Opcode = Opcode::new("MLOAD", 0x51, 1, 1);
pub const MSTORE: Opcode = Opcode::new("MSTORE", 0x52, 2, 0);
pub const MSTORE8: Opcode = Opcode::new("MSTORE8", 0x53, 2, 0);
pub const SLOAD: Opcode = Opcode::new("SLOAD", 0x54, 1, 1);
pub const SSTORE: Opcode = Opcode::new("SSTORE", 0x55, 2, 0);
pub const JUMP: Opcode = Opcode::new("JUMP", 0x56, 1, 0);
pub const JUMPI: Opcode = Opcode::new("JUMPI", 0x57, 2, 0);
pub const PC: Opcode = Opcode::new("PC", 0x58, 0, 1);
pub const MSIZE: Opcode = Opcode::new("MSIZE", 0x59, 0, 1);
pub const GAS: Opcode = Opcode::new("GAS", 0x5a, 0, 1);
pub const JUMPDEST: Opcode = Opcode::new("JUMPDEST", 0x5b, 0, 0);

// 60s & 70s: pushes
pub const PUSH1: Opcode = Opcode::new("PUSH1", 0x60, 0, 1);
pub const PUSH2: Opcode = Opcode::new("PUSH2", 0x61, 0, 1);
pub const PUSH3: Opcode = Opcode::new("PUSH3", 0x62, 0, 1);
pub const PUSH4: Opcode = Opcode::new("PUSH4", 0x63, 0, 1);
pub const PUSH5: Opcode = Opcode::new("PUSH5", 0x64, 0, 1);
pub const PUSH6: Opcode = Opcode::new("PUSH6", 0x65, 0, 1);
pub const PUSH7: Opcode = Opcode::new("PUSH7", 0x66, 0, 1);
pub const PUSH8: Opcode = Opcode::new("PUSH8", 0x67, 0, 1);
pub const PUSH9: Opcode = Opcode::new("PUSH9", 0x68, 0, 1);
pub const PUSH10: Opcode = Opcode::new("PUSH10", 0x69, 0, 1);
pub const PUSH11: Opcode = Opcode::new("PUSH11", 0x6a, 0, 1);
pub const PUSH12: Opcode = Opcode::new("PUSH12", 0x6b, 0, 1);
pub const PUSH13: Opcode = Opcode::new("PUSH13", 0x6c, 0, 1);
pub const PUSH14: Opcode = Opcode::new("PUSH14", 0x6d, 0, 1);
pub const PUSH15: Opcode = Opcode::new("PUSH15", 0x6e, 0, 1);
pub const PUSH16: Opcode = Opcode::new("PUSH16", 0x6f, 0, 1);
pub const PUSH17: Opcode = Opcode::new("PUSH17", 0x70, 0, 1);
pub const PUSH18: Opcode = Opcode::new("PUSH18", 0x71, 0, 1);
pub const PUSH19: Opcode = Opcode::new("PUSH19", 0x72, 0, 1);
pub const PUSH20: Opcode = Opcode::new("PUSH20", 0x73, 0, 1);
pub const PUSH21: Opcode = Opcode::new("PUSH21", 0x74, 0, 1);
pub const PUSH22: Opcode = Opcode::new("PUSH22", 0x75, 0, 1);
pub const PUSH23: Opcode = Opcode::new("PUSH23", 0x76, 0, 1);
pub const PUSH24: Opcode = Opcode::new("PUSH24", 0x77, 0, 1);
pub const PUSH25: Opcode = Opcode::new("PUSH25", 0x78, 0, 1);
pub const PUSH26: Opcode = Opcode::new("PUSH26", 0x79, 0, 1);
pub const PUSH27: Opcode = Opcode::new("PUSH27", 0x7a, 0, 1);
pub const PUSH28: Opcode = Opcode::new("PUSH28", 0x7b, 0, 1);
pub const PUSH29: Opcode = Opcode::new("PUSH29", 0x7c, 0, 1);
pub const PUSH30: Opcode = Opcode::new("PUSH30", 0x7d, 0, 1);
pub const PUSH31: Opcode = Opcode::new("PUSH31", 0x7e, 0, 1);
pub const PUSH32: Opcode = Opcode::new("PUSH32", 0x7f, 0, 1);

// 80s: duplications
pub const DUP1: Opcode = Opcode::new("DUP1", 0x80, 1, 2);
pub const DUP2: Opcode = Opcode::new("DUP2", 0x81, 2, 3);
pub const DUP3: Opcode = Opcode::new("DUP3", 0x82, 3, 4);
pub const DUP4: Opcode = Opcode::new("DUP4", 0x83, 4, 5);
pub const DUP5: Opcode = Opcode::new("DUP5", 0x84, 5, 6);
pub const DUP6: Opcode = Opcode::new("DUP6", 0x85, 6, 7);
pub const DUP7: Opcode = Opcode::new("DUP7", 0x86, 7, 8);
pub const DUP8: Opcode = Opcode::new("DUP8", 0x87, 8, 9);
pub const DUP9: Opcode = Opcode::new("DUP9", 0x88, 9, 10);
pub const DUP10: Opcode = Opcode::new("DUP10", 0x89, 10, 11);
pub const DUP11: Opcode = Opcode::new("DUP11", 0x8a, 11, 12);
pub const DUP12: Opcode = Opcode::new("DUP12", 0x8b, 12, 13);
pub const DUP13: Opcode = Opcode::new("DUP13", 0x8c, 13, 14);
pub const DUP14: Opcode = Opcode::new("DUP14", 0x8d, 14, 15);
pub const DUP15: Opcode = Opcode::new("DUP15", 0x8e, 15, 16);
pub const DUP16: Opcode = Opcode::new("DUP16", 0x8f, 16, 17);

// 90s: exchanges
pub const SWAP1: Opcode = Opcode::new("SWAP1", 0x90, 2, 2);
pub const SWAP2: Opcode = Opcode::new("SWAP2", 0x91, 3, 3);
pub const SWAP3: Opcode = Opcode::new("SWAP3", 0x92, 4, 4);
pub const SWAP4: Opcode = Opcode::new("SWAP4", 0x93, 5, 5);
pub const SWAP5: Opcode = Opcode::new("SWAP5", 0x94, 6, 6);
pub const SWAP6: Opcode = Opcode::new("SWAP6", 0x95, 7, 7);
pub const SWAP7: Opcode = Opcode::new("SWAP7", 0x96, 8, 8);
pub const SWAP8: Opcode = Opcode::new("SWAP8", 0x97, 9, 9);
pub const SWAP9: Opcode = Opcode::new("SWAP9", 0x98, 10, 10);
pub const SWAP10: Opcode = Opcode::new("SWAP10", 0x99, 11, 11);
pub const SWAP11: Opcode = Opcode::new("SWAP11", 0x9a, 12, 12);
pub const SWAP12: Opcode = Opcode::new("SWAP12", 0x9b, 13, 13);
pub const SWAP13: Opcode = Opcode::new("SWAP13", 0x9c, 14, 14);
pub const SWAP14: Opcode = Opcode::new("SWAP14", 0x9d, 15, 15);
pub const SWAP15: Opcode = Opcode::new("SWAP15", 0x9e, 16, 16);
pub const SWAP16: Opcode = Opcode::new("SWAP16", 0x9f, 17, 17);

// a0s: logging
pub const LOG0: Opcode = Opcode::new("LOG0", 0xa0, 2, 0);
pub const LOG1: Opcode = Opcode::new("LOG1", 0xa1, 3, 0);
pub const LOG2: Opcode = Opcode::new("LOG2", 0xa2, 4, 0);
pub const LOG3: Opcode = Opcode::new("LOG3", 0xa3, 5, 0);
pub const LOG4: Opcode = Opcode::new("LOG4", 0xa4, 6, 0);

// f0s: system operations
pub const CREATE: Opcode = Opcode::new("CREATE", 0xf0, 3, 1);
pub const CALL: Opcode = Opcode::new("CALL", 0xf1, 7, 1);
pub const CALLCODE: Opcode = Opcode::new("CALLCODE", 0xf2, 7, 1);
pub const RETURN: Opcode = Opcode::new("RETURN", 0xf3, 2, 0);
pub const DELEGATECALL: Opcode = Opcode::new("DELEGATECALL", 0xf4, 6, 1);
pub const CREATE2: Opcode = Opcode::new("CREATE2", 0xf5, 4, 1);
pub const STATICCALL: Opcode = Opcode::new("STATICCALL", 0xfa, 6, 1);
pub const REVERT: Opcode = Opcode::new("REVERT", 0xfd, 2, 0);
pub const INVALID: Opcode = Opcode::new("INVALID", 0xfe, 0, 0);
pub const SELFDESTRUCT: Opcode = Opcode::new("SELFDESTRUCT", 0xff, 1, 0);

// Synthetic operations, produced only by the decompiler itself.
pub const CONST: Opcode = Opcode::new("CONST", 0x100, 0, 1);
pub const NOP: Opcode = Opcode::new("NOP", 0x101, 0, 0);
pub const THROW: Opcode = Opcode::new("THROW", 0x102, 0, 0);
pub const THROWI: Opcode = Opcode::new("THROWI", 0x103, 1, 0);
pub const MISSING: Opcode = Opcode::new("MISSING", 0x1ff, 0, 0);

/// The full catalogue, synthetic operations included.
pub static OPCODES: &[Opcode] = &[
    STOP,
    ADD,
    MUL,
    SUB,
    DIV,
    SDIV,
    MOD,
    SMOD,
    ADDMOD,
    MULMOD,
    EXP,
    SIGNEXTEND,
    LT,
    GT,
    SLT,
    SGT,
    EQ,
    ISZERO,
    AND,
    OR,
    XOR,
    NOT,
    BYTE,
    SHL,
    SHR,
    SAR,
    SHA3,
    ADDRESS,
    BALANCE,
    ORIGIN,
    CALLER,
    CALLVALUE,
    CALLDATALOAD,
    CALLDATASIZE,
    CALLDATACOPY,
    CODESIZE,
    CODECOPY,
    GASPRICE,
    EXTCODESIZE,
    EXTCODECOPY,
    RETURNDATASIZE,
    RETURNDATACOPY,
    EXTCODEHASH,
    BLOCKHASH,
    COINBASE,
    TIMESTAMP,
    NUMBER,
    DIFFICULTY,
    GASLIMIT,
    CHAINID,
    SELFBALANCE,
    BASEFEE,
    POP,
    MLOAD,
    MSTORE,
    MSTORE8,
    SLOAD,
    SSTORE,
    JUMP,
    JUMPI,
    PC,
    MSIZE,
    GAS,
    JUMPDEST,
    PUSH1,
    PUSH2,
    PUSH3,
    PUSH4,
    PUSH5,
    PUSH6,
    PUSH7,
    PUSH8,
    PUSH9,
    PUSH10,
    PUSH11,
    PUSH12,
    PUSH13,
    PUSH14,
    PUSH15,
    PUSH16,
    PUSH17,
    PUSH18,
    PUSH19,
    PUSH20,
    PUSH21,
    PUSH22,
    PUSH23,
    PUSH24,
    PUSH25,
    PUSH26,
    PUSH27,
    PUSH28,
    PUSH29,
    PUSH30,
    PUSH31,
    PUSH32,
    DUP1,
    DUP2,
    DUP3,
    DUP4,
    DUP5,
    DUP6,
    DUP7,
    DUP8,
    DUP9,
    DUP10,
    DUP11,
    DUP12,
    DUP13,
    DUP14,
    DUP15,
    DUP16,
    SWAP1,
    SWAP2,
    SWAP3,
    SWAP4,
    SWAP5,
    SWAP6,
    SWAP7,
    SWAP8,
    SWAP9,
    SWAP10,
    SWAP11,
    SWAP12,
    SWAP13,
    SWAP14,
    SWAP15,
    SWAP16,
    LOG0,
    LOG1,
    LOG2,
    LOG3,
    LOG4,
    CREATE,
    CALL,
    CALLCODE,
    RETURN,
    DELEGATECALL,
    CREATE2,
    STATICCALL,
    REVERT,
    INVALID,
    SELFDESTRUCT,
    CONST,
    NOP,
    THROW,
    THROWI,
    MISSING,
];

lazy_static! {
    static ref BY_NAME: HashMap<&'static str, Opcode> =
        OPCODES.iter().map(|op| (op.name, *op)).collect();
    static ref BY_VALUE: HashMap<u8, Opcode> = OPCODES
        .iter()
        .filter(|op| op.code <= 0xff)
        .map(|op| (op.code as u8, *op))
        .collect();
}

/// Looks up an opcode by mnemonic, synthetic names included.
pub fn opcode_by_name(name: &str) -> Option<Opcode> {
    BY_NAME.get(name).copied()
}

/// Looks up a real EVM opcode by byte value.
pub fn opcode_by_value(value: u8) -> Option<Opcode> {
    BY_VALUE.get(&value).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_agree() {
        for op in OPCODES {
            assert_eq!(opcode_by_name(op.name), Some(*op));
        }
        for byte in 0u8..=0xff {
            if let Some(op) = opcode_by_value(byte) {
                assert_eq!(op.code, byte as u16);
            }
        }
        assert_eq!(opcode_by_value(0x0c), None);
        assert_eq!(opcode_by_name("CONST"), Some(CONST));
    }

    #[test]
    fn families() {
        assert!(PUSH1.is_push() && PUSH32.is_push());
        assert_eq!(PUSH1.push_len(), 1);
        assert_eq!(PUSH32.push_len(), 32);
        assert_eq!(DUP1.dup_index(), 1);
        assert_eq!(DUP16.dup_index(), 16);
        assert_eq!(SWAP16.swap_index(), 16);
        assert_eq!(LOG0.log_len(), 0);
        assert_eq!(LOG4.log_len(), 4);
        assert!(!ADD.is_push() && !ADD.is_dup() && !ADD.is_swap());
    }

    #[test]
    fn stack_deltas() {
        assert_eq!(PUSH1.stack_delta(), 1);
        assert_eq!(ADD.stack_delta(), -1);
        assert_eq!(DUP3.stack_delta(), 1);
        assert_eq!(SWAP5.stack_delta(), 0);
        assert_eq!(LOG2.stack_delta(), -4);
        assert_eq!(CALL.stack_delta(), -6);
        assert_eq!(MSTORE.stack_delta(), -2);
    }

    #[test]
    fn flow_predicates() {
        for op in [JUMP, JUMPI, STOP, RETURN, REVERT, INVALID, SELFDESTRUCT] {
            assert!(op.alters_flow(), "{op} should alter flow");
        }
        assert!(!JUMPDEST.alters_flow());
        assert!(STOP.halts() && !JUMPI.halts());
        assert!(JUMPI.possibly_halts());
        assert!(MISSING.is_invalid() && MISSING.alters_flow());
        assert_eq!(MISSING.stack_delta(), 0);
    }

    #[test]
    fn category_predicates() {
        assert!(ADD.is_arithmetic() && SAR.is_arithmetic());
        assert!(!SHA3.is_arithmetic());
        assert!(MLOAD.is_memory() && MSTORE8.is_memory());
        assert!(SLOAD.is_storage() && SSTORE.is_storage());
        assert!(CALL.is_call() && CREATE2.is_call() && STATICCALL.is_call());
        assert!(!RETURN.is_call());
    }
}
