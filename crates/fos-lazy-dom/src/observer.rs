//! Mutation notifications
//!
//! Each document counts its registered listeners per mutation type and
//! only builds records for types somebody listens to. Internal work that
//! must not look like user edits (materialization, default attributes)
//! runs under a [`Suppression`] guard.

use crate::{Document, NodeId};
use std::cell::Cell;
use std::rc::Rc;

/// Kind of change recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    Attributes,
    CharacterData,
    ChildList,
}

impl MutationType {
    fn slot(self) -> usize {
        match self {
            Self::Attributes => 0,
            Self::CharacterData => 1,
            Self::ChildList => 2,
        }
    }
}

/// Mutation record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub mutation_type: MutationType,
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

impl MutationRecord {
    pub(crate) fn child_list(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            mutation_type: MutationType::ChildList,
            target,
            added_nodes: added,
            removed_nodes: removed,
            attribute_name: None,
            old_value: None,
        }
    }

    pub(crate) fn attribute(target: NodeId, name: &str, old_value: Option<String>) -> Self {
        Self {
            mutation_type: MutationType::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            attribute_name: Some(name.to_string()),
            old_value,
        }
    }

    pub(crate) fn character_data(target: NodeId, old_value: Option<String>) -> Self {
        Self {
            mutation_type: MutationType::CharacterData,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            attribute_name: None,
            old_value,
        }
    }
}

/// Scoped suppression of mutation records; notifications resume when the
/// last outstanding guard is dropped
#[derive(Debug)]
#[must_use = "notifications resume as soon as the guard is dropped"]
pub struct Suppression {
    depth: Rc<Cell<u32>>,
}

impl Drop for Suppression {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Per-document listener counts and pending records
#[derive(Debug, Default)]
pub(crate) struct MutationNotifier {
    listeners: [usize; 3],
    suppressed: Rc<Cell<u32>>,
    records: Vec<MutationRecord>,
}

impl MutationNotifier {
    pub fn suppress(&self) -> Suppression {
        self.suppressed.set(self.suppressed.get() + 1);
        Suppression {
            depth: Rc::clone(&self.suppressed),
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.get() > 0
    }

    /// Whether a record of this type would be kept right now
    pub fn wants(&self, ty: MutationType) -> bool {
        self.listeners[ty.slot()] > 0 && !self.is_suppressed()
    }

    pub fn push(&mut self, record: MutationRecord) {
        if self.wants(record.mutation_type) {
            self.records.push(record);
        }
    }
}

impl Document {
    /// Register interest in a mutation type
    pub fn observe(&mut self, ty: MutationType) {
        self.mutations.listeners[ty.slot()] += 1;
    }

    /// Drop one registration for a mutation type
    pub fn unobserve(&mut self, ty: MutationType) {
        let count = &mut self.mutations.listeners[ty.slot()];
        *count = count.saturating_sub(1);
    }

    pub fn listener_count(&self, ty: MutationType) -> usize {
        self.mutations.listeners[ty.slot()]
    }

    /// Suppress mutation records until the returned guard is dropped
    pub fn suppress_mutations(&self) -> Suppression {
        self.mutations.suppress()
    }

    pub fn mutations_suppressed(&self) -> bool {
        self.mutations.is_suppressed()
    }

    /// Drain the pending records
    pub fn take_mutation_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_need_listener() {
        let mut doc = Document::new();
        let root = doc.document_node();
        let a = doc.create_element("a").unwrap();
        doc.append_child(root, a).unwrap();
        assert!(doc.take_mutation_records().is_empty());

        doc.observe(MutationType::ChildList);
        let b = doc.create_comment("b");
        doc.append_child(a, b).unwrap();
        let records = doc.take_mutation_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mutation_type, MutationType::ChildList);
        assert_eq!(records[0].target, a);
        assert_eq!(records[0].added_nodes, vec![b]);

        doc.unobserve(MutationType::ChildList);
        assert_eq!(doc.listener_count(MutationType::ChildList), 0);
    }

    #[test]
    fn test_suppression_nests_and_restores() {
        let mut doc = Document::new();
        doc.observe(MutationType::ChildList);
        let el = doc.create_element("x").unwrap();
        {
            let _outer = doc.suppress_mutations();
            {
                let _inner = doc.suppress_mutations();
                assert!(doc.mutations_suppressed());
            }
            assert!(doc.mutations_suppressed());
            let t = doc.create_text_node("t");
            doc.append_child(el, t).unwrap();
        }
        assert!(!doc.mutations_suppressed());
        assert!(doc.take_mutation_records().is_empty());

        let t = doc.create_text_node("u");
        doc.append_child(el, t).unwrap();
        assert_eq!(doc.take_mutation_records().len(), 1);
    }

    #[test]
    fn test_suppression_restored_on_error_path() {
        let mut doc = Document::new();
        let el = doc.create_element("x").unwrap();
        let result = {
            let _guard = doc.suppress_mutations();
            doc.append_child(el, el)
        };
        assert!(result.is_err());
        assert!(!doc.mutations_suppressed());
    }
}
