//! Process-wide source of unique milk identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::MilkId;

/// Hands out strictly increasing ids starting at 1.
pub struct IdentifierGenerator {
    next: AtomicU64,
}

impl IdentifierGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next unused id; never returns the same value twice.
    pub fn next(&self) -> MilkId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst) - 1
    }
}

impl Default for IdentifierGenerator {
    fn default() -> Self {
        Self::new()
    }
}
