// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use alloy_primitives::U256;
use std::collections::BTreeSet;
use std::fmt;

use crate::constants::MAX_STACK_DEPTH;
use crate::lattice::Value;

/// Broken structural invariants. These are bugs, not input problems, and
/// abort the contract being analysed.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
pub enum InternalInvariant {
    #[error("popped a stack whose bottom is known to be empty")]
    PopEmptyStack,
    #[error("asymmetric edge between blocks {0} and {1}")]
    EdgeAsymmetry(usize, usize),
}

/// Identity of an SSA variable in a [`VarPool`]. Two variables are the same
/// variable only when their ids are equal, never merely by value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VarId(pub usize);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// An SSA value: its lattice element and the set of program counters that
/// may define it.
#[derive(Clone, Debug)]
pub struct Variable {
    pub value: Value,
    pub def_sites: BTreeSet<usize>,
}

/// Arena of all variables created while decompiling one contract. Variables
/// are shared by identity across the stacks of every block that references
/// them and live as long as the CFG.
#[derive(Default, Debug)]
pub struct VarPool {
    vars: Vec<Variable>,
}

impl VarPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_var(&mut self, value: Value, def_sites: BTreeSet<usize>) -> VarId {
        self.vars.push(Variable { value, def_sites });
        VarId(self.vars.len() - 1)
    }

    /// A fresh variable of unknown value and no definition site, standing in
    /// for a stack slot of unknown origin.
    pub fn fresh_top(&mut self) -> VarId {
        self.new_var(Value::Top, BTreeSet::new())
    }

    pub fn fresh_const(&mut self, value: U256, pc: usize) -> VarId {
        self.new_var(Value::concrete(value), BTreeSet::from([pc]))
    }

    pub fn get(&self, id: VarId) -> &Variable {
        &self.vars[id.0]
    }

    pub fn value(&self, id: VarId) -> &Value {
        &self.vars[id.0].value
    }

    /// Overwrites a variable's value, reporting whether it changed.
    pub fn set_value(&mut self, id: VarId, value: Value) -> bool {
        if self.vars[id.0].value == value {
            return false;
        }
        self.vars[id.0].value = value;
        true
    }

    pub fn add_def_sites(&mut self, id: VarId, sites: &BTreeSet<usize>) {
        self.vars[id.0].def_sites.extend(sites.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// An opaque reference into one of the EVM's addressable spaces, keyed by
/// its address variable. Never an SSA definition.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Location {
    Memory(VarId),
    Storage(VarId),
    Calldata(VarId),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(addr) => write!(f, "M[{addr}]"),
            Self::Storage(addr) => write!(f, "S[{addr}]"),
            Self::Calldata(addr) => write!(f, "C[{addr}]"),
        }
    }
}

/// A bounded model of the EVM stack: the visible prefix of variables with
/// the top at index 0, plus whether anything of unknown origin may sit
/// below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbstractStack {
    items: Vec<VarId>,
    empty_bottom: bool,
}

impl AbstractStack {
    /// An empty stack known to have nothing below it.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            empty_bottom: true,
        }
    }

    /// An empty stack that may have unknown slots below it.
    pub fn unknown() -> Self {
        Self {
            items: Vec::new(),
            empty_bottom: false,
        }
    }

    pub fn from_items(items: Vec<VarId>, empty_bottom: bool) -> Self {
        Self {
            items,
            empty_bottom,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn empty_bottom(&self) -> bool {
        self.empty_bottom
    }

    pub fn items(&self) -> &[VarId] {
        &self.items
    }

    pub fn peek(&self, depth: usize) -> Option<VarId> {
        self.items.get(depth).copied()
    }

    /// Pushes a variable, discarding the bottom slot if the modelled depth
    /// is exhausted. A discarded slot leaves the bottom unknown.
    pub fn push(&mut self, var: VarId) {
        if self.items.len() >= MAX_STACK_DEPTH {
            self.items.pop();
            self.empty_bottom = false;
        }
        self.items.insert(0, var);
    }

    /// Pops the top variable. Popping past the visible prefix of a stack
    /// with an unknown bottom draws an unknown variable from the supplier;
    /// doing so on a known-empty stack is an internal error.
    pub fn pop(
        &mut self,
        mut supplier: impl FnMut() -> VarId,
    ) -> Result<VarId, InternalInvariant> {
        if let Some(&top) = self.items.first() {
            self.items.remove(0);
            return Ok(top);
        }
        if self.empty_bottom {
            return Err(InternalInvariant::PopEmptyStack);
        }
        Ok(supplier())
    }

    /// Extends the visible prefix to at least `depth` slots, drawing fresh
    /// unknown variables from the supplier for the missing bottom slots.
    pub fn ensure_depth(
        &mut self,
        depth: usize,
        mut supplier: impl FnMut() -> VarId,
    ) -> Result<(), InternalInvariant> {
        if self.items.len() >= depth {
            return Ok(());
        }
        if self.empty_bottom {
            return Err(InternalInvariant::PopEmptyStack);
        }
        while self.items.len() < depth {
            self.items.push(supplier());
        }
        Ok(())
    }

    /// Duplicates the `n`th slot (1-based) onto the top, preserving the
    /// variable's identity.
    pub fn dup(
        &mut self,
        n: usize,
        supplier: impl FnMut() -> VarId,
    ) -> Result<(), InternalInvariant> {
        self.ensure_depth(n, supplier)?;
        let var = self.items[n - 1];
        self.push(var);
        Ok(())
    }

    /// Exchanges the top slot with the `n`th slot below it (1-based).
    pub fn swap(
        &mut self,
        n: usize,
        supplier: impl FnMut() -> VarId,
    ) -> Result<(), InternalInvariant> {
        self.ensure_depth(n + 1, supplier)?;
        self.items.swap(0, n);
        Ok(())
    }
}

impl fmt::Display for AbstractStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.items.iter().map(|v| v.to_string()).collect();
        let bottom = if self.empty_bottom { "" } else { ", .." };
        write!(f, "[{}{bottom}]", items.join(", "))
    }
}
