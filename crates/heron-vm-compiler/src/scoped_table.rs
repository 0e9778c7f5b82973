//! A hash table with nested scopes
//!
//! Entries inserted inside a scope disappear when the scope is popped,
//! uncovering whatever the key mapped to before.

use std::hash::Hash;

use rustc_hash::FxHashMap;

/// Scoped key/value table
#[derive(Debug)]
pub struct ScopedTable<K, V> {
    map: FxHashMap<K, Vec<V>>,
    scopes: Vec<Vec<K>>,
}

impl<K: Hash + Eq + Clone, V> Default for ScopedTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V> ScopedTable<K, V> {
    /// Table with a single open scope
    pub fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            scopes: vec![Vec::new()],
        }
    }

    /// Open a nested scope
    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Drop every entry of the innermost scope
    pub fn pop_scope(&mut self) {
        let keys = self
            .scopes
            .pop()
            .unwrap_or_else(|| panic!("pop_scope on an empty scoped table"));
        for key in keys.into_iter().rev() {
            if let Some(stack) = self.map.get_mut(&key) {
                stack.pop();
                if stack.is_empty() {
                    self.map.remove(&key);
                }
            }
        }
    }

    /// Bind `key` in the innermost scope
    pub fn insert(&mut self, key: K, value: V) {
        self.map.entry(key.clone()).or_default().push(value);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(key);
        }
    }

    /// Innermost binding of `key`
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.map.get(key).and_then(|stack| stack.last())
    }
}
