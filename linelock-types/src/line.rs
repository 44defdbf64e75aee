//! Line numbering.
//!
//! Lines are 0-based everywhere in memory and 1-based on the wire. The
//! conversion happens only at the codec boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// A 0-based line index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct LineNumber(usize);

impl LineNumber {
    /// Create from a 0-based index.
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Create from a 1-based wire number.
    pub fn from_wire(number: usize) -> Result<Self, WireError> {
        number
            .checked_sub(1)
            .map(Self)
            .ok_or_else(|| WireError::InvalidLineNumber(number.to_string()))
    }

    /// Parse a 1-based wire number.
    pub fn parse_wire(s: &str) -> Result<Self, WireError> {
        let number = s
            .parse::<usize>()
            .map_err(|_| WireError::InvalidLineNumber(s.to_string()))?;
        Self::from_wire(number)
    }

    /// The 0-based index.
    pub fn index(&self) -> usize {
        self.0
    }

    /// The 1-based wire number.
    pub fn to_wire(&self) -> usize {
        self.0 + 1
    }

    /// Shift by a signed line-count delta, `None` if it would go negative.
    pub fn shifted(&self, delta: isize) -> Option<Self> {
        self.0.checked_add_signed(delta).map(Self)
    }
}

impl fmt::Display for LineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

impl fmt::Debug for LineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineNumber({})", self.0)
    }
}
