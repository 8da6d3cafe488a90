// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use evmdec_util::color::Color;
use std::cell::Cell;

use crate::constants::WARNING_EXIT_CODE;

/// Status line for the human driving the CLI. Diagnostics and warnings go
/// through [`Ctx`] instead, which writes to stderr.
macro_rules! greyln {
    ($($msg:expr),*) => {{
        use evmdec_util::color::Color;
        println!("{}", format!($($msg),*).grey())
    }};
}

pub(crate) use greyln;

/// Available verbosity levels, from least to most chatty.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum Verbosity {
    Silent = 0,
    #[default]
    Quiet = 1,
    Low = 2,
    Medium = 3,
    High = 4,
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        match level {
            0 => Self::Silent,
            1 => Self::Quiet,
            2 => Self::Low,
            3 => Self::Medium,
            _ => Self::High,
        }
    }
}

/// Logging context threaded through the pipeline. Debug output goes to
/// stderr when its threshold is at or below the configured verbosity.
/// Calling [`Ctx::warning`] latches the process exit code to 3.
#[derive(Debug, Default)]
pub struct Ctx {
    level: Verbosity,
    warned: Cell<bool>,
}

impl Ctx {
    pub fn new(level: Verbosity) -> Self {
        Self {
            level,
            warned: Cell::new(false),
        }
    }

    pub fn log(&self, threshold: Verbosity, message: &str) {
        if threshold <= self.level {
            eprintln!("{message}");
        }
    }

    pub fn log_low(&self, message: &str) {
        self.log(Verbosity::Low, message);
    }

    pub fn log_med(&self, message: &str) {
        self.log(Verbosity::Medium, message);
    }

    pub fn log_high(&self, message: &str) {
        self.log(Verbosity::High, message);
    }

    /// Logs at the quiet level and marks the run as having warned.
    pub fn warning(&self, message: &str) {
        self.warned.set(true);
        self.log(Verbosity::Quiet, &format!("Warning: {message}").yellow());
    }

    pub fn warned(&self) -> bool {
        self.warned.get()
    }

    pub fn exit_code(&self) -> i32 {
        if self.warned.get() {
            WARNING_EXIT_CODE
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_latches_exit_code() {
        let ctx = Ctx::new(Verbosity::Silent);
        assert_eq!(ctx.exit_code(), 0);
        ctx.warning("skipped a line");
        ctx.warning("and another");
        assert!(ctx.warned());
        assert_eq!(ctx.exit_code(), 3);
    }

    #[test]
    fn verbosity_orders_and_converts() {
        assert!(Verbosity::Quiet < Verbosity::High);
        assert_eq!(Verbosity::from(0), Verbosity::Silent);
        assert_eq!(Verbosity::from(9), Verbosity::High);
    }
}
