// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

/// Maximum modelled depth of the abstract EVM stack.
pub const MAX_STACK_DEPTH: usize = 1024;

/// Default cardinality bound on constant value sets tracked per variable.
/// Sets that grow beyond this are widened to an unknown value.
pub const DEFAULT_VALUE_SET_BOUND: usize = 32;

/// Default bound on how many times a block may be cloned for path sensitivity.
pub const DEFAULT_MAX_CLONE_DEPTH: usize = 2;

/// Process exit code used when the run completed but logged warnings.
pub const WARNING_EXIT_CODE: i32 = 3;
