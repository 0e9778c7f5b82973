//! String table shared by all functions of a bytecode module
//!
//! Strings are uniqued and keep their insertion order, so the same sequence of
//! additions always yields the same ids. Identifiers (property keys and
//! names) live in the same table and carry a flag the loader uses to intern
//! them eagerly.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::operand::StringId;

/// One string table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringEntry {
    /// String contents
    pub value: String,
    /// Used as an identifier (property key or name)
    pub identifier: bool,
}

/// String table with deduplication
#[derive(Debug, Clone, Default, Serialize)]
pub struct StringTable {
    entries: Vec<StringEntry>,
    #[serde(skip)]
    index: FxHashMap<String, u32>,
}

impl StringTable {
    /// Create a new empty string table
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, s: &str, identifier: bool) -> StringId {
        if let Some(&idx) = self.index.get(s) {
            if identifier {
                self.entries[idx as usize].identifier = true;
            }
            return StringId(idx);
        }
        let idx = self.entries.len() as u32;
        self.entries.push(StringEntry {
            value: s.to_string(),
            identifier,
        });
        self.index.insert(s.to_string(), idx);
        StringId(idx)
    }

    /// Add a general string, returns its id
    pub fn add_string(&mut self, s: &str) -> StringId {
        self.intern(s, false)
    }

    /// Add an identifier, returns its id
    pub fn add_identifier(&mut self, s: &str) -> StringId {
        self.intern(s, true)
    }

    /// Look up an already added string
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.index.get(s).copied().map(StringId)
    }

    /// Get a string by id
    pub fn get(&self, id: StringId) -> Option<&str> {
        self.entries.get(id.0 as usize).map(|e| e.value.as_str())
    }

    /// Is this id flagged as an identifier
    pub fn is_identifier(&self, id: StringId) -> bool {
        self.entries
            .get(id.0 as usize)
            .is_some_and(|e| e.identifier)
    }

    /// Number of strings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in id order
    pub fn iter(&self) -> impl Iterator<Item = &StringEntry> {
        self.entries.iter()
    }

    /// Rebuild a table from decoded entries
    pub(crate) fn from_entries(entries: Vec<StringEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.value.clone(), i as u32))
            .collect();
        Self { entries, index }
    }
}

impl PartialEq for StringTable {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_id() {
        let mut table = StringTable::new();
        let a = table.add_string("hello");
        let b = table.add_string("world");
        let c = table.add_string("hello");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(b), Some("world"));
    }

    #[test]
    fn test_identifier_flag_is_sticky() {
        let mut table = StringTable::new();
        let id = table.add_string("length");
        assert!(!table.is_identifier(id));

        assert_eq!(table.add_identifier("length"), id);
        assert!(table.is_identifier(id));

        table.add_string("length");
        assert!(table.is_identifier(id));
    }
}
