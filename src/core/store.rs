//! Values owned by a node.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::common::{Entry, Id, IdSpace};

#[derive(Debug, Default, Clone)]
/// A node's local key-value map.
///
/// It knows nothing about ownership, the server checks that before reading or
/// writing, and uses [Store::split_off_outside] and [Store::drain] to migrate keys.
pub struct Store {
    values: BTreeMap<Id, Bytes>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // === Getters ===

    pub fn get(&self, key: &Id) -> Option<&Bytes> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    // === Public Methods ===

    /// Insert or overwrite, returning the previous value.
    pub fn put(&mut self, key: Id, value: Bytes) -> Option<Bytes> {
        self.values.insert(key, value)
    }

    /// Remove and return every entry whose key is not in `(from, to]`.
    pub fn split_off_outside(&mut self, space: &IdSpace, from: Id, to: Id) -> Vec<Entry> {
        let outside: Vec<Id> = self
            .values
            .keys()
            .filter(|key| !space.in_arc(**key, from, to))
            .copied()
            .collect();

        outside
            .into_iter()
            .filter_map(|key| self.values.remove(&key).map(|value| Entry::new(key, value)))
            .collect()
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.values)
            .into_iter()
            .map(|(key, value)| Entry::new(key, value))
            .collect()
    }

    /// Insert migrated entries, overwriting existing keys.
    pub fn extend(&mut self, entries: Vec<Entry>) {
        self.values
            .extend(entries.into_iter().map(|entry| (entry.key, entry.value)));
    }
}
