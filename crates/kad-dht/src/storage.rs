//! The local value store: a plain `key -> opaque bytes` mapping, with no
//! expiry, no per-key capacity limit, and no validation of value size —
//! those are left to whatever sits above this crate.

use std::collections::HashMap;

use kad_core::Id;

/// Owned exclusively by the verb-dispatch layer.
#[derive(Default)]
pub struct ValueStore {
    entries: HashMap<Id, Vec<u8>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `key -> value`.
    pub fn put(&mut self, key: Id, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &Id) -> Option<&Vec<u8>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &Id) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
