// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use clap::{Args, Parser, Subcommand};
use eyre::{eyre, Context, Result};
use std::path::PathBuf;
use std::process;

use constants::{DEFAULT_MAX_CLONE_DEPTH, DEFAULT_VALUE_SET_BOUND};
use logger::Ctx;

mod constants;
mod dataflow;
mod decompile;
mod dis2bb;
mod dominators;
mod evm_cfg;
mod exporter;
mod lattice;
mod logger;
mod memtypes;
mod opcodes;
mod parser;
mod stacksize;
mod tac_cfg;

#[derive(Parser, Debug)]
#[command(name = "evmdec")]
#[command(author = "Offchain Labs, Inc.")]
#[command(about = "Decompiles EVM bytecode into an analysable three-address form", long_about = None)]
#[command(propagate_version = true)]
#[command(version)]
struct Opts {
    #[command(subcommand)]
    command: Apis,
}

#[derive(Subcommand, Debug, Clone)]
enum Apis {
    /// Decompile a contract and write fact relations for the Datalog analyser.
    #[command(visible_alias = "d")]
    Decompile(DecompileConfig),
    /// Print basic blocks of disassembly read on stdin, with stack depths.
    Dis2bb(Dis2bbConfig),
}

#[derive(Args, Clone, Debug)]
pub struct CommonConfig {
    /// Verbosity of debug output on stderr (0 = silent, 4 = everything).
    #[arg(short, long, default_value_t = 1)]
    verbosity: u8,
    /// Reject unknown opcodes instead of lowering them to MISSING.
    #[arg(long)]
    strict: bool,
}

#[derive(Args, Clone, Debug)]
pub struct DecompileConfig {
    /// File of contract bytecode as hex, or "-" for stdin.
    input: String,
    #[command(flatten)]
    common: CommonConfig,
    /// Directory the fact files are written into.
    #[arg(short, long, default_value = "facts")]
    out_dir: PathBuf,
    /// Treat the input as Ethereum disasm output rather than hex.
    #[arg(long)]
    disasm: bool,
    /// Maximum outer analysis iterations before giving up on a fixed point.
    #[arg(long)]
    max_iter: Option<usize>,
    /// Seconds of analysis before bailing out with partial results.
    #[arg(long)]
    bailout_seconds: Option<u64>,
    /// How many concrete candidates a value may track before widening.
    #[arg(long, default_value_t = DEFAULT_VALUE_SET_BOUND)]
    value_set_bound: usize,
    /// How many rounds of predecessor-context cloning a block may undergo.
    #[arg(long, default_value_t = DEFAULT_MAX_CLONE_DEPTH)]
    max_clone_depth: usize,
    /// Also export dominance relations over the TAC graph.
    #[arg(long)]
    dominators: bool,
    /// Restrict per-opcode statement relations to these mnemonics.
    #[arg(long, value_delimiter = ',', value_name = "LIST")]
    out_opcodes: Option<Vec<String>>,
}

#[derive(Args, Clone, Debug)]
pub struct Dis2bbConfig {
    #[command(flatten)]
    common: CommonConfig,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    macro_rules! run {
        ($expr:expr, $($msg:expr),+) => {
            $expr.wrap_err_with(|| eyre!($($msg),+))?
        };
    }

    let ctx = match &opts.command {
        Apis::Decompile(config) => Ctx::new(config.common.verbosity.into()),
        Apis::Dis2bb(config) => Ctx::new(config.common.verbosity.into()),
    };

    match opts.command {
        Apis::Decompile(config) => {
            run!(decompile::decompile(&config, &ctx), "decompilation failed");
        }
        Apis::Dis2bb(config) => {
            run!(dis2bb::dis2bb(&config, &ctx), "dis2bb failed");
        }
    }

    process::exit(ctx.exit_code());
}
