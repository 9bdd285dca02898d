//! Source positions, interned for the lifetime of the analysis.

use std::fmt;

use crate::interner::{Interned, Interner};

/// A source position: file path and line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    path: String,
    line: u32,
}

pub type PositionHandle = Interned<Position>;

impl Position {
    pub fn new(path: String, line: u32) -> Self {
        Position { path, line }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn is_unknown(&self) -> bool {
        self.path.is_empty() && self.line == 0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}", self.path, self.line)
        }
    }
}

/// Interner for positions.
pub struct Positions {
    interner: Interner<Position>,
}

impl Positions {
    pub fn new() -> Self {
        Self {
            interner: Interner::new(),
        }
    }

    pub fn get(&self, path: &str, line: u32) -> PositionHandle {
        self.interner.intern(Position::new(path.to_string(), line))
    }

    pub fn unknown(&self) -> PositionHandle {
        self.interner.intern(Position::new(String::new(), 0))
    }
}

impl Default for Positions {
    fn default() -> Self {
        Self::new()
    }
}
