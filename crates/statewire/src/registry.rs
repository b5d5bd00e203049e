#![forbid(unsafe_code)]

//! Insertion-ordered subscriber storage.
//!
//! [`Registry<C>`] is the arena behind every container in this crate: a map
//! from [`SubscriptionId`] to an entry `C` (normally a reference-counted
//! callback). Because ids are generated monotonically, ordering the map by id
//! is the same as ordering it by insertion, which gives deterministic
//! notification order without a separate sequence vector.
//!
//! # Invariants
//!
//! 1. Every key was issued by this registry's own generator.
//! 2. A removed key is never inserted again.
//! 3. [`Registry::snapshot`] yields entries in insertion order.

use std::collections::BTreeMap;

use crate::id::{IdGenerator, SubscriptionId};

/// Ordered map of live subscriptions.
#[derive(Debug)]
pub struct Registry<C> {
    ids: IdGenerator,
    entries: BTreeMap<SubscriptionId, C>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Registry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: IdGenerator::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Store `entry` under a fresh id.
    pub fn insert(&mut self, entry: C) -> SubscriptionId {
        self.insert_with(|_| entry)
    }

    /// Store the entry produced by `make`, which receives the id it will be
    /// stored under. Useful for entries that need to refer to themselves.
    pub fn insert_with(&mut self, make: impl FnOnce(SubscriptionId) -> C) -> SubscriptionId {
        let id = self.ids.next_id();
        self.entries.insert(id, make(id));
        id
    }

    /// Remove the entry for `id`, returning it if it was present.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<C> {
        self.entries.remove(&id)
    }

    /// Whether `id` is still registered.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: Clone> Registry<C> {
    /// Clone out every entry, in insertion order.
    ///
    /// Notification passes iterate over this copy so that callbacks are free
    /// to subscribe or cancel while the pass is running.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SubscriptionId, C)> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove() {
        let mut reg = Registry::new();
        let a = reg.insert("a");
        let b = reg.insert("b");
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.remove(a), Some("a"));
        assert_eq!(reg.remove(a), None);
        assert!(reg.contains(b));
        assert!(!reg.contains(a));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn snapshot_is_insertion_ordered() {
        let mut reg = Registry::new();
        for name in ["first", "second", "third"] {
            reg.insert(name);
        }
        let names: Vec<_> = reg.snapshot().into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn ids_not_reused_after_removal() {
        let mut reg = Registry::new();
        let a = reg.insert(1);
        reg.remove(a);
        let b = reg.insert(2);
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn insert_with_sees_own_id() {
        let mut reg = Registry::new();
        let id = reg.insert_with(|id| id.get() * 10);
        assert_eq!(reg.snapshot(), vec![(id, id.get() * 10)]);
    }

    #[test]
    fn empty_registry() {
        let reg: Registry<()> = Registry::default();
        assert!(reg.is_empty());
        assert!(reg.snapshot().is_empty());
    }
}
