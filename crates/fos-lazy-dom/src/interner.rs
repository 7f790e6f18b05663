//! String Interner - Deduplicate strings in the deferred store
//!
//! Element and attribute names repeat constantly in parsed documents, so
//! the store keeps every name, value and namespace URI once and refers to
//! it by a 4-byte id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Interned string ID - just 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct InternedString(pub u32);

impl InternedString {
    /// Empty string
    pub const EMPTY: InternedString = InternedString(0);
}

/// String interner for deduplicating strings
///
/// Memory layout:
/// - All strings stored in a single contiguous buffer
/// - Each InternedString indexes a (start, len) span into that buffer
///
/// The lookup map is not persisted; it is rebuilt from the spans the first
/// time a deserialized interner is asked to intern something.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringInterner {
    buffer: String,
    spans: Vec<(u32, u32)>,
    #[serde(skip)]
    map: HashMap<Box<str>, u32>,
}

impl StringInterner {
    /// Create a new string interner with the empty string at index 0
    pub fn new() -> Self {
        let mut interner = Self {
            buffer: String::with_capacity(1024),
            map: HashMap::with_capacity(64),
            spans: Vec::with_capacity(64),
        };
        interner.intern("");
        interner
    }

    /// Intern a string, returning its ID
    /// If the string is already interned, returns the existing ID
    pub fn intern(&mut self, s: &str) -> InternedString {
        if self.map.len() != self.spans.len() {
            self.rebuild_index();
        }
        if let Some(&id) = self.map.get(s) {
            return InternedString(id);
        }

        let id = self.spans.len() as u32;
        let start = self.buffer.len() as u32;
        self.buffer.push_str(s);
        self.spans.push((start, s.len() as u32));
        self.map.insert(s.into(), id);

        InternedString(id)
    }

    /// Look up a string without interning it
    pub fn lookup(&self, s: &str) -> Option<InternedString> {
        if self.map.len() == self.spans.len() {
            return self.map.get(s).map(|&id| InternedString(id));
        }
        (0..self.spans.len() as u32)
            .map(InternedString)
            .find(|&id| self.get(id) == Some(s))
    }

    /// Get the string for an interned ID
    #[inline]
    pub fn get(&self, id: InternedString) -> Option<&str> {
        let &(start, len) = self.spans.get(id.0 as usize)?;
        self.buffer.get(start as usize..start as usize + len as usize)
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    fn rebuild_index(&mut self) {
        let mut map = HashMap::with_capacity(self.spans.len());
        for (id, &(start, len)) in self.spans.iter().enumerate() {
            if let Some(s) = self.buffer.get(start as usize..start as usize + len as usize) {
                map.entry(s.into()).or_insert(id as u32);
            }
        }
        self.map = map;
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedup() {
        let mut interner = StringInterner::new();
        let id1 = interner.intern("hello");
        let id2 = interner.intern("hello");
        assert_eq!(id1, id2);
        assert_eq!(interner.intern(""), InternedString::EMPTY);
    }

    #[test]
    fn test_get_string() {
        let mut interner = StringInterner::new();
        let id = interner.intern("world");
        assert_eq!(interner.get(id), Some("world"));
        assert_eq!(interner.get(InternedString(999)), None);
    }

    #[test]
    fn test_rebuild_after_clearing_index() {
        let mut interner = StringInterner::new();
        let a = interner.intern("a");
        let b = interner.intern("b");
        interner.map.clear();

        assert_eq!(interner.lookup("b"), Some(b));
        assert_eq!(interner.intern("a"), a);
        assert_eq!(interner.len(), 3);
    }
}
