// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use alloy_primitives::U256;
use evmdec_util::text;

use crate::evm_cfg::EVMOp;
use crate::logger::Ctx;
use crate::opcodes::{self, Opcode};

/// Raw input to be decompiled.
#[derive(Clone, Debug)]
pub enum Source {
    /// A hex string, optionally "0x"-prefixed.
    Hex(String),
    /// A raw byte buffer.
    Bytes(Vec<u8>),
    /// Output lines of Ethereum's disasm tool:
    /// `<pc_decimal> <MNEMONIC> [=> 0x<hex_immediate>]`.
    DisasmLines(Vec<String>),
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("malformed hex input: {0}")]
    BadHex(String),
    #[error("unknown opcode byte {byte:#04x} at pc {pc:#x}")]
    UnknownOpcode { byte: u8, pc: usize },
    #[error("unknown mnemonic {0} on line {1}")]
    UnknownMnemonic(String, usize),
}

/// Turns raw bytecode or disassembly into an ordered operation stream. The
/// pc of every op is its byte offset within the contract, never a sequence
/// index.
pub struct Parser {
    strict: bool,
}

impl Parser {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn parse(&self, source: Source, ctx: &Ctx) -> Result<Vec<EVMOp>, ParseError> {
        match source {
            Source::Hex(hex) => {
                let bytes = text::decode0x(&hex).map_err(|e| ParseError::BadHex(e.to_string()))?;
                self.parse_bytes(&bytes, ctx)
            }
            Source::Bytes(bytes) => self.parse_bytes(&bytes, ctx),
            Source::DisasmLines(lines) => self.parse_disasm(&lines, ctx),
        }
    }

    fn parse_bytes(&self, bytes: &[u8], ctx: &Ctx) -> Result<Vec<EVMOp>, ParseError> {
        let mut ops = Vec::new();
        let mut pc = 0;
        while pc < bytes.len() {
            let byte = bytes[pc];
            let Some(opcode) = opcodes::opcode_by_value(byte) else {
                if self.strict {
                    return Err(ParseError::UnknownOpcode { byte, pc });
                }
                ctx.warning(&format!("unknown opcode {byte:#04x} at pc {pc:#x}"));
                ops.push(EVMOp::new(pc, opcodes::MISSING, None));
                pc += 1;
                continue;
            };

            let width = opcode.push_len();
            let mut value = None;
            if width > 0 {
                let end = (pc + 1 + width).min(bytes.len());
                let immediate = &bytes[pc + 1..end];
                if immediate.len() < width {
                    ctx.warning(&format!(
                        "incomplete {opcode} at pc {pc:#x}: expected {width} immediate bytes, got {}",
                        immediate.len()
                    ));
                }
                value = Some(U256::from_be_slice(immediate));
            }
            ops.push(EVMOp::new(pc, opcode, value));
            pc += 1 + width;
        }
        Ok(ops)
    }

    fn parse_disasm(&self, lines: &[String], ctx: &Ctx) -> Result<Vec<EVMOp>, ParseError> {
        let mut ops = Vec::new();
        for (number, line) in lines.iter().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                // The first line of disasm output is the raw hex, which
                // splits to a single token.
                if !tokens.is_empty() {
                    ctx.warning(&format!(
                        "line {}: skipping invalid disassembly: {}",
                        number + 1,
                        line.trim_end()
                    ));
                }
                continue;
            }

            let Ok(pc) = tokens[0].parse::<usize>() else {
                ctx.warning(&format!(
                    "line {}: skipping line with bad pc: {}",
                    number + 1,
                    line.trim_end()
                ));
                continue;
            };
            let Some(opcode) = opcodes::opcode_by_name(tokens[1]) else {
                if self.strict {
                    return Err(ParseError::UnknownMnemonic(tokens[1].into(), number + 1));
                }
                ctx.warning(&format!(
                    "line {}: unknown mnemonic {}",
                    number + 1,
                    tokens[1]
                ));
                ops.push(EVMOp::new(pc, opcodes::MISSING, None));
                continue;
            };

            let value = parse_immediate(opcode, &tokens);
            ops.push(EVMOp::new(pc, opcode, value));
        }
        Ok(ops)
    }
}

fn parse_immediate(opcode: Opcode, tokens: &[&str]) -> Option<U256> {
    if !opcode.is_push() || tokens.len() < 4 {
        return None;
    }
    let text = tokens[3].strip_prefix("0x").unwrap_or(tokens[3]);
    U256::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::{JUMP, JUMPDEST, MISSING, MSTORE, PUSH1, PUSH2, RETURN, STOP};

    fn parse_hex(hex: &str) -> Vec<EVMOp> {
        Parser::new(false)
            .parse(Source::Hex(hex.into()), &Ctx::default())
            .unwrap()
    }

    #[test]
    fn parses_bytecode_with_immediates() {
        let ops = parse_hex("0x60016000526001601ff3");
        let expect = [
            (0, PUSH1, Some(1u64)),
            (2, PUSH1, Some(0)),
            (4, MSTORE, None),
            (5, PUSH1, Some(1)),
            (7, PUSH1, Some(0x1f)),
            (9, RETURN, None),
        ];
        assert_eq!(ops.len(), expect.len());
        for (op, (pc, opcode, value)) in ops.iter().zip(expect) {
            assert_eq!(op.pc, pc);
            assert_eq!(op.opcode, opcode);
            assert_eq!(op.value, value.map(U256::from));
        }
    }

    #[test]
    fn pc_is_byte_offset_not_index() {
        // PUSH2 0x0102; JUMPDEST
        let ops = parse_hex("6101025b");
        assert_eq!(ops[0].opcode, PUSH2);
        assert_eq!(ops[1].pc, 3);
        assert_eq!(ops[1].opcode, JUMPDEST);
    }

    #[test]
    fn truncated_push_keeps_short_immediate() {
        let ctx = Ctx::default();
        let ops = Parser::new(false)
            .parse(Source::Hex("6101".into()), &ctx)
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].value, Some(U256::from(1)));
        assert!(ctx.warned());
    }

    #[test]
    fn unknown_byte_strict_and_lenient() {
        let strict = Parser::new(true).parse(Source::Hex("0c".into()), &Ctx::default());
        assert!(matches!(
            strict,
            Err(ParseError::UnknownOpcode { byte: 0x0c, pc: 0 })
        ));

        let ctx = Ctx::default();
        let ops = Parser::new(false)
            .parse(Source::Hex("0c00".into()), &ctx)
            .unwrap();
        assert_eq!(ops[0].opcode, MISSING);
        assert_eq!(ops[1].opcode, STOP);
        assert!(ctx.warned());
    }

    #[test]
    fn malformed_hex_is_fatal() {
        let got = Parser::new(false).parse(Source::Hex("0xzz".into()), &Ctx::default());
        assert!(matches!(got, Err(ParseError::BadHex(_))));
    }

    #[test]
    fn parses_disasm_lines() {
        let lines: Vec<String> = [
            "60056000f3",
            "0 PUSH1 => 0x05",
            "2 JUMP",
            "",
            "5 JUMPDEST",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let ctx = Ctx::default();
        let ops = Parser::new(false)
            .parse(Source::DisasmLines(lines), &ctx)
            .unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].opcode, PUSH1);
        assert_eq!(ops[0].value, Some(U256::from(5)));
        assert_eq!(ops[1].opcode, JUMP);
        assert_eq!(ops[2].pc, 5);
        // The leading raw-hex line was skipped with a warning.
        assert!(ctx.warned());
    }

    #[test]
    fn disasm_round_trips() {
        let lines: Vec<String> = ["0 PUSH1 => 0x05", "2 JUMP", "5 JUMPDEST", "6 STOP"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ops = Parser::new(false)
            .parse(Source::DisasmLines(lines.clone()), &Ctx::default())
            .unwrap();

        let emitted: Vec<String> = ops
            .iter()
            .map(|op| match op.value {
                Some(value) => format!("{} {} => {:#x}", op.pc, op.opcode, value),
                None => format!("{} {}", op.pc, op.opcode),
            })
            .collect();
        let expect: Vec<String> = ["0 PUSH1 => 0x5", "2 JUMP", "5 JUMPDEST", "6 STOP"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(emitted, expect);
    }
}
