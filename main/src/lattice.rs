// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use alloy_primitives::U256;
use std::collections::BTreeSet;
use std::fmt;

use crate::opcodes::{self, Opcode};

/// An abstract 256-bit word: unreachable, one of a small set of concrete
/// values, or unknown. Sets whose cardinality exceeds the configured bound
/// are widened to [`Value::Top`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    Bottom,
    Const(BTreeSet<U256>),
    Top,
}

impl Value {
    pub fn concrete(value: U256) -> Self {
        Self::Const(BTreeSet::from([value]))
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Self::Top)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Self::Bottom)
    }

    /// The value if exactly one concrete candidate is known.
    pub fn single(&self) -> Option<U256> {
        match self {
            Self::Const(set) if set.len() == 1 => set.iter().next().copied(),
            _ => None,
        }
    }

    /// All concrete candidates, if any are known.
    pub fn candidates(&self) -> Option<&BTreeSet<U256>> {
        match self {
            Self::Const(set) => Some(set),
            _ => None,
        }
    }

    /// Least upper bound of two elements, widening past `bound` candidates.
    pub fn join(&self, other: &Self, bound: usize) -> Self {
        match (self, other) {
            (Self::Bottom, v) | (v, Self::Bottom) => v.clone(),
            (Self::Top, _) | (_, Self::Top) => Self::Top,
            (Self::Const(a), Self::Const(b)) => {
                let union: BTreeSet<U256> = a.union(b).copied().collect();
                if union.len() > bound {
                    Self::Top
                } else {
                    Self::Const(union)
                }
            }
        }
    }

    /// Evaluates an EVM operation pointwise over the candidate sets of its
    /// inputs. Any unknown input makes the result unknown; an unreachable
    /// input makes it unreachable.
    pub fn eval(op: Opcode, args: &[&Value], bound: usize) -> Self {
        if args.iter().any(|v| v.is_bottom()) {
            return Self::Bottom;
        }
        let mut sets = Vec::with_capacity(args.len());
        for arg in args {
            match arg.candidates() {
                Some(set) => sets.push(set),
                None => return Self::Top,
            }
        }

        let mut out = BTreeSet::new();
        match sets.len() {
            1 => {
                for &a in sets[0] {
                    out.insert(eval_unary(op, a));
                }
            }
            2 => {
                for &a in sets[0] {
                    for &b in sets[1] {
                        out.insert(eval_binary(op, a, b));
                        if out.len() > bound {
                            return Self::Top;
                        }
                    }
                }
            }
            3 => {
                for &a in sets[0] {
                    for &b in sets[1] {
                        for &c in sets[2] {
                            out.insert(eval_ternary(op, a, b, c));
                            if out.len() > bound {
                                return Self::Top;
                            }
                        }
                    }
                }
            }
            _ => return Self::Top,
        }
        if out.len() > bound {
            Self::Top
        } else {
            Self::Const(out)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bottom => write!(f, "_"),
            Self::Top => write!(f, "T"),
            Self::Const(set) => {
                if let Some(v) = self.single() {
                    write!(f, "{v:#x}")
                } else {
                    let items: Vec<String> = set.iter().map(|v| format!("{v:#x}")).collect();
                    write!(f, "{{{}}}", items.join(", "))
                }
            }
        }
    }
}

fn bool_word(b: bool) -> U256 {
    if b {
        U256::from(1)
    } else {
        U256::ZERO
    }
}

fn is_neg(x: U256) -> bool {
    x.bit(255)
}

fn twos_neg(x: U256) -> U256 {
    (!x).wrapping_add(U256::from(1))
}

fn magnitude(x: U256) -> U256 {
    if is_neg(x) {
        twos_neg(x)
    } else {
        x
    }
}

/// Shift amount as a small integer, or None when it shifts everything out.
fn shift_amount(x: U256) -> Option<usize> {
    if x >= U256::from(256) {
        None
    } else {
        Some(x.as_limbs()[0] as usize)
    }
}

fn eval_unary(op: Opcode, a: U256) -> U256 {
    match op.code {
        c if c == opcodes::ISZERO.code => bool_word(a.is_zero()),
        c if c == opcodes::NOT.code => !a,
        _ => U256::ZERO,
    }
}

fn eval_binary(op: Opcode, a: U256, b: U256) -> U256 {
    match op.code {
        c if c == opcodes::ADD.code => a.wrapping_add(b),
        c if c == opcodes::MUL.code => a.wrapping_mul(b),
        c if c == opcodes::SUB.code => a.wrapping_sub(b),
        c if c == opcodes::DIV.code => a.checked_div(b).unwrap_or(U256::ZERO),
        c if c == opcodes::SDIV.code => sdiv(a, b),
        c if c == opcodes::MOD.code => a.checked_rem(b).unwrap_or(U256::ZERO),
        c if c == opcodes::SMOD.code => smod(a, b),
        c if c == opcodes::EXP.code => a.pow(b),
        c if c == opcodes::SIGNEXTEND.code => signextend(a, b),
        c if c == opcodes::LT.code => bool_word(a < b),
        c if c == opcodes::GT.code => bool_word(a > b),
        c if c == opcodes::SLT.code => bool_word(slt(a, b)),
        c if c == opcodes::SGT.code => bool_word(slt(b, a)),
        c if c == opcodes::EQ.code => bool_word(a == b),
        c if c == opcodes::AND.code => a & b,
        c if c == opcodes::OR.code => a | b,
        c if c == opcodes::XOR.code => a ^ b,
        c if c == opcodes::BYTE.code => byte(a, b),
        c if c == opcodes::SHL.code => match shift_amount(a) {
            Some(sh) => b << sh,
            None => U256::ZERO,
        },
        c if c == opcodes::SHR.code => match shift_amount(a) {
            Some(sh) => b >> sh,
            None => U256::ZERO,
        },
        c if c == opcodes::SAR.code => sar(a, b),
        _ => U256::ZERO,
    }
}

fn eval_ternary(op: Opcode, a: U256, b: U256, m: U256) -> U256 {
    if m.is_zero() {
        return U256::ZERO;
    }
    match op.code {
        c if c == opcodes::ADDMOD.code => a.add_mod(b, m),
        c if c == opcodes::MULMOD.code => a.mul_mod(b, m),
        _ => U256::ZERO,
    }
}

fn sdiv(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let quotient = magnitude(a)
        .checked_div(magnitude(b))
        .unwrap_or(U256::ZERO);
    if is_neg(a) != is_neg(b) {
        twos_neg(quotient)
    } else {
        quotient
    }
}

fn smod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let rem = magnitude(a).checked_rem(magnitude(b)).unwrap_or(U256::ZERO);
    if is_neg(a) {
        twos_neg(rem)
    } else {
        rem
    }
}

fn slt(a: U256, b: U256) -> bool {
    match (is_neg(a), is_neg(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

fn sar(shift: U256, value: U256) -> U256 {
    let neg = is_neg(value);
    match shift_amount(shift) {
        Some(0) => value,
        Some(sh) => {
            let shifted = value >> sh;
            if neg {
                shifted | !(U256::MAX >> sh)
            } else {
                shifted
            }
        }
        None => {
            if neg {
                U256::MAX
            } else {
                U256::ZERO
            }
        }
    }
}

fn signextend(k: U256, value: U256) -> U256 {
    if k >= U256::from(31) {
        return value;
    }
    let bit = (k.as_limbs()[0] as usize) * 8 + 7;
    let mask = (U256::from(1) << (bit + 1)).wrapping_sub(U256::from(1));
    if value.bit(bit) {
        value | !mask
    } else {
        value & mask
    }
}

fn byte(index: U256, value: U256) -> U256 {
    if index >= U256::from(32) {
        return U256::ZERO;
    }
    let i = index.as_limbs()[0] as usize;
    (value >> (8 * (31 - i))) & U256::from(0xff)
}
