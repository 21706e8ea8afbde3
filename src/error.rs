//! # Typed Error Values
//!
//! Most fallible operations in this crate return `eyre::Result` and report
//! contract violations (out-of-range indexes, malformed blocks) through
//! `ensure!`/`bail!`. The one condition callers must *branch* on rather than
//! propagate is capacity exhaustion: an insert that does not fit triggers a
//! node split, not an error surfaced to the user. That condition gets a
//! dedicated lightweight type so it can be matched without string
//! inspection.

use std::error::Error;
use std::fmt;

/// A segment or block cannot grow within its fixed allocation.
///
/// Recovered locally by splitting the owning node; never truncates and is
/// never surfaced as a fatal error by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExceeded {
    /// Bytes the operation needed.
    pub requested: usize,
    /// Bytes actually available in the block.
    pub available: usize,
}

impl fmt::Display for CapacityExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block capacity exceeded: need {} bytes, {} available",
            self.requested, self.available
        )
    }
}

impl Error for CapacityExceeded {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_both_sizes() {
        let err = CapacityExceeded {
            requested: 128,
            available: 24,
        };
        let msg = err.to_string();
        assert!(msg.contains("128"));
        assert!(msg.contains("24"));
    }
}
