#![forbid(unsafe_code)]

//! Subscription identifiers.
//!
//! Ids are handed out by a per-container [`IdGenerator`] in strictly
//! increasing order. An id is never reused by the generator that issued it,
//! so a cancelled token can never remove a later subscription by accident.

use std::fmt;

/// Opaque key identifying one subscription within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value, mostly useful for logging.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Monotonic id source.
#[derive(Debug, Default)]
pub(crate) struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next);
        // Never wraps: a wrapped counter would hand out live ids again.
        self.next = self.next.saturating_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let mut ids = IdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        let c = ids.next_id();
        assert!(a < b && b < c);
        assert_eq!(a.get(), 0);
        assert_eq!(c.get(), 2);
    }

    #[test]
    fn display_format() {
        let mut ids = IdGenerator::new();
        ids.next_id();
        assert_eq!(ids.next_id().to_string(), "sub#1");
    }
}
