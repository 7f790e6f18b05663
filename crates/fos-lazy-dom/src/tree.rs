//! DOM Tree (arena-based allocation)
//!
//! Slots are addressed by `u32` inside the crate; the public `NodeId`
//! adds the document identity and the slot generation. Freed slots go on a
//! free list and are reused with a bumped generation.

use crate::node::NodeRecord;
use crate::{DocumentId, DomError, DomResult, Generation, NodeId};
use std::ops::{Index, IndexMut};

#[derive(Debug)]
struct Slot {
    generation: Generation,
    record: Option<NodeRecord>,
}

/// Arena of node records for one document
#[derive(Debug)]
pub(crate) struct DomTree {
    doc: DocumentId,
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl DomTree {
    /// Create a new empty DOM tree
    pub fn new(doc: DocumentId) -> Self {
        Self {
            doc,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Store a record, reusing a freed slot when one is available
    pub fn alloc(&mut self, record: NodeRecord) -> u32 {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize].record = Some(record);
            return slot;
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: Generation::INITIAL,
            record: Some(record),
        });
        slot
    }

    /// Release a slot; its generation advances so old ids stop resolving
    pub fn free(&mut self, slot: u32) -> Option<NodeRecord> {
        let entry = self.slots.get_mut(slot as usize)?;
        let record = entry.record.take()?;
        entry.generation = entry.generation.next();
        self.free.push(slot);
        self.live -= 1;
        Some(record)
    }

    /// Public handle for a live slot
    pub fn id(&self, slot: u32) -> NodeId {
        NodeId {
            doc: self.doc,
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    /// Resolve a public handle to a slot of this tree
    pub fn resolve(&self, id: NodeId) -> DomResult<u32> {
        if id.doc != self.doc {
            return Err(DomError::WrongDocument);
        }
        match self.slots.get(id.slot as usize) {
            Some(entry) if entry.generation == id.generation && entry.record.is_some() => {
                Ok(id.slot)
            }
            _ => Err(DomError::NotFound),
        }
    }

    /// Get a record by slot
    pub fn get(&self, slot: u32) -> Option<&NodeRecord> {
        self.slots.get(slot as usize)?.record.as_ref()
    }

    /// Number of live nodes in the tree
    pub fn len(&self) -> usize {
        self.live
    }
}

impl Index<u32> for DomTree {
    type Output = NodeRecord;

    fn index(&self, slot: u32) -> &NodeRecord {
        match self.slots[slot as usize].record.as_ref() {
            Some(record) => record,
            None => panic!("node slot {slot} was discarded while still linked"),
        }
    }
}

impl IndexMut<u32> for DomTree {
    fn index_mut(&mut self, slot: u32) -> &mut NodeRecord {
        match self.slots[slot as usize].record.as_mut() {
            Some(record) => record,
            None => panic!("node slot {slot} was discarded while still linked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeData;

    #[test]
    fn test_alloc_and_resolve() {
        let doc = DocumentId::next();
        let mut tree = DomTree::new(doc);
        let slot = tree.alloc(NodeRecord::new(NodeData::Text("a".into())));
        let id = tree.id(slot);

        assert_eq!(tree.resolve(id), Ok(slot));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[slot].data.value(), Some("a"));
    }

    #[test]
    fn test_stale_id_after_reuse() {
        let mut tree = DomTree::new(DocumentId::next());
        let slot = tree.alloc(NodeRecord::new(NodeData::Comment("x".into())));
        let old = tree.id(slot);

        assert!(tree.free(slot).is_some());
        assert_eq!(tree.resolve(old), Err(DomError::NotFound));

        let reused = tree.alloc(NodeRecord::new(NodeData::Comment("y".into())));
        assert_eq!(reused, slot);
        assert_eq!(tree.resolve(old), Err(DomError::NotFound));
        assert_eq!(tree.resolve(tree.id(reused)), Ok(reused));
    }

    #[test]
    fn test_foreign_id() {
        let mut a = DomTree::new(DocumentId::next());
        let b = DomTree::new(DocumentId::next());
        let slot = a.alloc(NodeRecord::new(NodeData::DocumentFragment));
        assert_eq!(b.resolve(a.id(slot)), Err(DomError::WrongDocument));
    }
}
