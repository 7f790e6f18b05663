//! DOM Node Operations
//!
//! Core child-list manipulation: insertBefore, appendChild, removeChild,
//! replaceChild, normalize.
//!
//! Every operation validates first and mutates second. Nothing is
//! touched until all checks pass, so an error leaves the tree unchanged.

use crate::node::NodeData;
use crate::observer::MutationRecord;
use crate::{Document, DomError, DomResult, NodeId, NodeKind};

const KIND_SLOTS: usize = 22;

/// Which node kinds may be children of which container kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildPolicy {
    /// Bitmask of permitted child kinds, indexed by parent kind code
    allowed: [u32; KIND_SLOTS],
    single_element_document: bool,
}

impl Default for ChildPolicy {
    fn default() -> Self {
        let content = NodeKind::Element.bit()
            | NodeKind::ProcessingInstruction.bit()
            | NodeKind::Comment.bit()
            | NodeKind::Text.bit()
            | NodeKind::CData.bit();
        let mut allowed = [0; KIND_SLOTS];
        allowed[NodeKind::Document as usize] =
            NodeKind::Element.bit() | NodeKind::ProcessingInstruction.bit() | NodeKind::Comment.bit();
        allowed[NodeKind::Element as usize] = content;
        allowed[NodeKind::DocumentFragment as usize] = content;
        Self {
            allowed,
            single_element_document: true,
        }
    }
}

impl ChildPolicy {
    /// Policy that accepts nothing; build up with [`ChildPolicy::permit`]
    pub fn empty() -> Self {
        Self {
            allowed: [0; KIND_SLOTS],
            single_element_document: false,
        }
    }

    pub fn permit(&mut self, parent: NodeKind, child: NodeKind) -> &mut Self {
        self.allowed[parent as usize] |= child.bit();
        self
    }

    pub fn forbid(&mut self, parent: NodeKind, child: NodeKind) -> &mut Self {
        self.allowed[parent as usize] &= !child.bit();
        self
    }

    /// Whether `child` may be placed under `parent`. Attributes and
    /// documents never sit in a child chain, whatever the table says.
    pub fn allows(&self, parent: NodeKind, child: NodeKind) -> bool {
        parent.is_container() && child.is_child_capable() && self.allowed[parent as usize] & child.bit() != 0
    }

    /// Limit documents to one element child
    pub fn set_single_element_document(&mut self, on: bool) -> &mut Self {
        self.single_element_document = on;
        self
    }

    pub fn single_element_document(&self) -> bool {
        self.single_element_document
    }
}

/// Validated insertion, ready to apply
struct Splice {
    parent: u32,
    /// Nodes to link, in order
    nodes: Vec<u32>,
    /// Fragment being unwrapped, if any
    fragment: Option<u32>,
    reference: Option<u32>,
}

impl Document {
    /// Error if `slot`, its ancestors, or an attribute's owner element is
    /// read-only
    pub(crate) fn check_writable(&self, slot: u32) -> DomResult<()> {
        let mut cursor = Some(slot);
        while let Some(current) = cursor {
            let record = &self.tree[current];
            if record.flags.has(crate::node::NodeFlags::READ_ONLY) {
                return Err(DomError::ReadOnly);
            }
            cursor = match &record.data {
                NodeData::Attribute(attr) => attr.owner,
                _ => record.link.parent,
            };
        }
        Ok(())
    }

    fn prepare_insert(
        &mut self,
        parent: NodeId,
        new_child: NodeId,
        reference: Option<NodeId>,
        replacing: Option<u32>,
    ) -> DomResult<Splice> {
        let p = self.tree.resolve(parent)?;
        let c = self.tree.resolve(new_child)?;
        let r = reference.map(|r| self.tree.resolve(r)).transpose()?;

        self.ensure_children(p)?;
        let parent_kind = self.tree[p].kind();
        let child_kind = self.tree[c].kind();
        if !parent_kind.is_container() {
            return Err(DomError::hierarchy("node cannot have children"));
        }
        self.check_writable(p)?;

        let fragment = (child_kind == NodeKind::DocumentFragment).then_some(c);
        let nodes = match fragment {
            Some(f) => {
                self.ensure_children(f)?;
                self.check_writable(f)?;
                self.tree.child_slots(f)
            }
            None => vec![c],
        };

        if self.tree.is_inclusive_ancestor(c, p) {
            return Err(DomError::hierarchy("node is an ancestor of the parent"));
        }
        for &node in &nodes {
            if !self.policy.allows(parent_kind, self.tree[node].kind()) {
                return Err(DomError::hierarchy("node kind not allowed under this parent"));
            }
        }
        if fragment.is_none() {
            if let Some(old_parent) = self.tree[c].link.parent {
                self.check_writable(old_parent)?;
            }
        }

        if parent_kind == NodeKind::Document && self.policy.single_element_document() {
            let incoming = nodes
                .iter()
                .filter(|&&n| self.tree[n].kind() == NodeKind::Element)
                .count();
            let existing = self
                .tree
                .child_slots(p)
                .into_iter()
                .filter(|&n| self.tree[n].kind() == NodeKind::Element && n != c && Some(n) != replacing)
                .count();
            if incoming + existing > 1 {
                return Err(DomError::hierarchy("document already has an element child"));
            }
        }

        let reference = match r {
            Some(r) if self.tree[r].link.parent != Some(p) => return Err(DomError::NotFound),
            // Inserting a node before itself means before its next sibling
            Some(r) if r == c => self.tree[c].link.next,
            other => other,
        };

        Ok(Splice {
            parent: p,
            nodes,
            fragment,
            reference,
        })
    }

    fn apply_splice(&mut self, splice: Splice) {
        let Splice {
            parent,
            nodes,
            fragment,
            reference,
        } = splice;

        for &node in &nodes {
            if let Some(old_parent) = self.tree[node].link.parent {
                self.tree.unlink(node);
                if fragment.is_none() {
                    let record = MutationRecord::child_list(self.tree.id(old_parent), Vec::new(), vec![self.tree.id(node)]);
                    self.mutations.push(record);
                }
            }
        }
        if let Some(f) = fragment {
            if !nodes.is_empty() {
                let removed = nodes.iter().map(|&n| self.tree.id(n)).collect();
                self.mutations.push(MutationRecord::child_list(self.tree.id(f), Vec::new(), removed));
            }
        }

        for &node in &nodes {
            self.tree.link_before(parent, node, reference);
        }
        if !nodes.is_empty() {
            let added = nodes.iter().map(|&n| self.tree.id(n)).collect();
            self.mutations.push(MutationRecord::child_list(self.tree.id(parent), added, Vec::new()));
        }
    }

    /// Insert `new_child` before `reference` (or at the end). A fragment is
    /// unwrapped: its children move in order and it is left empty.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        new_child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<NodeId> {
        let splice = self.prepare_insert(parent, new_child, reference, None)?;
        self.apply_splice(splice);
        Ok(new_child)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        self.insert_before(parent, child, None)
    }

    /// Detach `child` from `parent` and return it
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        let p = self.tree.resolve(parent)?;
        let c = self.tree.resolve(child)?;
        self.ensure_children(p)?;
        if self.tree[c].link.parent != Some(p) {
            return Err(DomError::NotFound);
        }
        self.check_writable(p)?;

        self.tree.unlink(c);
        self.mutations
            .push(MutationRecord::child_list(parent, Vec::new(), vec![child]));
        Ok(child)
    }

    /// Put `new_child` where `old_child` is and return `old_child`
    pub fn replace_child(&mut self, parent: NodeId, new_child: NodeId, old_child: NodeId) -> DomResult<NodeId> {
        let old = self.tree.resolve(old_child)?;
        let splice = self.prepare_insert(parent, new_child, Some(old_child), Some(old))?;
        if new_child == old_child {
            return Ok(old_child);
        }
        self.apply_splice(splice);
        self.tree.unlink(old);
        self.mutations
            .push(MutationRecord::child_list(parent, Vec::new(), vec![old_child]));
        Ok(old_child)
    }

    /// Merge adjacent text nodes and drop empty ones, throughout the subtree.
    /// Dropped nodes are freed; their ids in the removal records no longer
    /// resolve.
    pub fn normalize(&mut self, node: NodeId) -> DomResult<()> {
        let root = self.tree.resolve(node)?;

        // Plan every change before applying any
        let mut plans: Vec<(u32, Vec<u32>, String)> = Vec::new();
        let mut stack = vec![root];
        while let Some(parent) = stack.pop() {
            self.ensure_children(parent)?;
            let mut run: Vec<u32> = Vec::new();
            let children = self.tree.child_slots(parent);
            for child in children.into_iter().map(Some).chain(std::iter::once(None)) {
                let is_text = child.is_some_and(|c| {
                    self.tree[c].kind() == NodeKind::Text
                });
                if is_text {
                    if let Some(c) = child {
                        self.ensure_data(c)?;
                        run.push(c);
                    }
                    continue;
                }
                if !run.is_empty() {
                    let merged: String = run
                        .iter()
                        .filter_map(|&t| self.tree[t].data.value())
                        .collect();
                    if run.len() > 1 || merged.is_empty() {
                        plans.push((parent, std::mem::take(&mut run), merged));
                    }
                    run.clear();
                }
                if let Some(c) = child {
                    if self.tree[c].kind() == NodeKind::Element {
                        stack.push(c);
                    }
                }
            }
        }

        for (_, run, _) in &plans {
            for &text in run {
                self.check_writable(text)?;
            }
        }

        let mut dropped = Vec::new();

        for (parent, run, merged) in plans {
            let parent_id = self.tree.id(parent);
            let (first, rest) = match run.split_first() {
                Some((first, rest)) => (*first, rest),
                None => continue,
            };
            let mut removed = Vec::new();
            for &extra in rest {
                removed.push(self.tree.id(extra));
                self.tree.unlink(extra);
                dropped.push(extra);
            }
            if merged.is_empty() {
                removed.push(self.tree.id(first));
                self.tree.unlink(first);
                dropped.push(first);
            } else {
                let old = self.tree[first].data.value().map(str::to_string);
                self.tree[first].data.set_value(&merged);
                self.mutations
                    .push(MutationRecord::character_data(self.tree.id(first), old));
            }
            if !removed.is_empty() {
                self.mutations
                    .push(MutationRecord::child_list(parent_id, Vec::new(), removed));
            }
        }
        for slot in dropped {
            self.free_subtree(slot);
        }
        Ok(())
    }

    pub fn child_policy(&self) -> &ChildPolicy {
        &self.policy
    }

    /// Adjust the kind table, e.g. from a schema layer
    pub fn child_policy_mut(&mut self) -> &mut ChildPolicy {
        &mut self.policy
    }
}
