// Copyright 2023-2024, Offchain Labs, Inc.
// For licensing, see https://github.com/OffchainLabs/cargo-stylus/blob/main/licenses/COPYRIGHT.md

use std::fmt::{Debug, Display};

pub const BLUE: &str = "\x1b[0;34m";
pub const GREY: &str = "\x1b[0;90m";
pub const MINT: &str = "\x1b[0;38;5;48;1m";
pub const PINK: &str = "\x1b[0;38;5;161;1m";
pub const RED: &str = "\x1b[0;31;1m";
pub const LAVENDER: &str = "\x1b[0;38;5;183;1m";
pub const YELLOW: &str = "\x1b[0;33;1m";
pub const CLEAR: &str = "\x1b[0;0m";

pub trait Color {
    fn blue(&self) -> String;
    fn grey(&self) -> String;
    fn mint(&self) -> String;
    fn pink(&self) -> String;
    fn red(&self) -> String;
    fn lavender(&self) -> String;
    fn yellow(&self) -> String;
}

/// Colors a string only when printing to a terminal.
fn color(text: impl Display, color: &str) -> String {
    format!("{color}{text}{CLEAR}")
}

impl<T> Color for T
where
    T: Display,
{
    fn blue(&self) -> String {
        color(self, BLUE)
    }
    fn grey(&self) -> String {
        color(self, GREY)
    }
    fn mint(&self) -> String {
        color(self, MINT)
    }
    fn pink(&self) -> String {
        color(self, PINK)
    }
    fn red(&self) -> String {
        color(self, RED)
    }
    fn lavender(&self) -> String {
        color(self, LAVENDER)
    }
    fn yellow(&self) -> String {
        color(self, YELLOW)
    }
}

pub trait DebugColor {
    fn debug_blue(&self) -> String;
    fn debug_grey(&self) -> String;
    fn debug_mint(&self) -> String;
    fn debug_pink(&self) -> String;
    fn debug_red(&self) -> String;
    fn debug_lavender(&self) -> String;
    fn debug_yellow(&self) -> String;
}

fn debug_color(text: impl Debug, color: &str) -> String {
    format!("{color}{text:?}{CLEAR}")
}

impl<T> DebugColor for T
where
    T: Debug,
{
    fn debug_blue(&self) -> String {
        debug_color(self, BLUE)
    }
    fn debug_grey(&self) -> String {
        debug_color(self, GREY)
    }
    fn debug_mint(&self) -> String {
        debug_color(self, MINT)
    }
    fn debug_pink(&self) -> String {
        debug_color(self, PINK)
    }
    fn debug_red(&self) -> String {
        debug_color(self, RED)
    }
    fn debug_lavender(&self) -> String {
        debug_color(self, LAVENDER)
    }
    fn debug_yellow(&self) -> String {
        debug_color(self, YELLOW)
    }
}
