//! Sibling linkage and navigation
//!
//! Children of a container form a doubly-linked list. To save a field per
//! container, the first child's `prev` does not point at a sibling: it
//! points at the container's *last* child. `previous_sibling` and
//! `last_child` below are the only readers of that raw field.

use crate::node::QualName;
use crate::tree::DomTree;
use crate::{Document, DomResult, NodeId, NodeKind};

/// Links shared by every node that can sit in a child chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SiblingLink {
    /// Owning container; `None` while detached
    pub parent: Option<u32>,
    /// Previous sibling, or the parent's last child when this is the first child
    pub prev: Option<u32>,
    pub next: Option<u32>,
}

impl DomTree {
    pub(crate) fn is_first_child(&self, slot: u32) -> bool {
        match self[slot].link.parent {
            Some(parent) => self[parent].first_child == Some(slot),
            None => false,
        }
    }

    pub(crate) fn previous_sibling_of(&self, slot: u32) -> Option<u32> {
        if self[slot].link.parent.is_none() || self.is_first_child(slot) {
            return None;
        }
        self[slot].link.prev
    }

    pub(crate) fn last_child_of(&self, parent: u32) -> Option<u32> {
        self[parent].first_child.and_then(|first| self[first].link.prev)
    }

    /// Iterate the (already synchronized) children of `parent`
    pub(crate) fn child_slots(&self, parent: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = self[parent].first_child;
        while let Some(slot) = cursor {
            out.push(slot);
            cursor = self[slot].link.next;
        }
        out
    }

    /// True if `ancestor` is `slot` or contains it
    pub(crate) fn is_inclusive_ancestor(&self, ancestor: u32, slot: u32) -> bool {
        let mut cursor = Some(slot);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self[current].link.parent;
        }
        false
    }

    /// Splice a detached `child` into `parent` before `reference`
    /// (or at the end). No checks: callers validate first.
    pub(crate) fn link_before(&mut self, parent: u32, child: u32, reference: Option<u32>) {
        match self[parent].first_child {
            None => {
                self[parent].first_child = Some(child);
                self[child].link.prev = Some(child);
                self[child].link.next = None;
            }
            Some(first) => {
                let before = match reference {
                    Some(r) if r != first => self[r].link.prev.map(|p| (p, r)),
                    _ => None,
                };
                match (reference, before) {
                    (None, _) => {
                        let last = self[first].link.prev.unwrap_or(first);
                        self[last].link.next = Some(child);
                        self[child].link.prev = Some(last);
                        self[child].link.next = None;
                        self[first].link.prev = Some(child);
                    }
                    (Some(_), Some((prev, next))) => {
                        self[prev].link.next = Some(child);
                        self[child].link.prev = Some(prev);
                        self[child].link.next = Some(next);
                        self[next].link.prev = Some(child);
                    }
                    (Some(_), None) => {
                        // New first child inherits the hidden last-child pointer
                        self[child].link.prev = self[first].link.prev;
                        self[child].link.next = Some(first);
                        self[first].link.prev = Some(child);
                        self[parent].first_child = Some(child);
                    }
                }
            }
        }
        self[child].link.parent = Some(parent);
        if let Some(cache) = self[parent].list_cache.as_mut() {
            cache.child_inserted();
        }
    }

    /// Detach `child` from its parent, re-linking its former neighbours
    pub(crate) fn unlink(&mut self, child: u32) {
        let Some(parent) = self[child].link.parent else {
            return;
        };
        let SiblingLink { prev, next, .. } = self[child].link;
        let was_first = self[parent].first_child == Some(child);
        let previous = if was_first { None } else { prev };

        if was_first {
            self[parent].first_child = next;
            if let Some(next) = next {
                // prev of the old first child is the last child
                self[next].link.prev = prev;
            }
        } else {
            if let Some(prev) = prev {
                self[prev].link.next = next;
            }
            match next {
                Some(next) => self[next].link.prev = prev,
                None => {
                    if let Some(first) = self[parent].first_child {
                        self[first].link.prev = prev;
                    }
                }
            }
        }

        self[child].link = SiblingLink::default();
        if let Some(cache) = self[parent].list_cache.as_mut() {
            cache.child_removed(child, previous);
        }
    }
}

impl Document {
    /// Parent of an attached node; `None` for detached nodes, the document
    /// and attributes
    pub fn parent_node(&self, node: NodeId) -> DomResult<Option<NodeId>> {
        let slot = self.tree.resolve(node)?;
        Ok(self.tree[slot].link.parent.map(|p| self.tree.id(p)))
    }

    pub fn next_sibling(&self, node: NodeId) -> DomResult<Option<NodeId>> {
        let slot = self.tree.resolve(node)?;
        Ok(self.tree[slot].link.next.map(|s| self.tree.id(s)))
    }

    pub fn previous_sibling(&self, node: NodeId) -> DomResult<Option<NodeId>> {
        let slot = self.tree.resolve(node)?;
        Ok(self.tree.previous_sibling_of(slot).map(|s| self.tree.id(s)))
    }

    /// First child, materializing the child list if needed
    pub fn first_child(&mut self, node: NodeId) -> DomResult<Option<NodeId>> {
        let slot = self.tree.resolve(node)?;
        self.ensure_children(slot)?;
        Ok(self.tree[slot].first_child.map(|s| self.tree.id(s)))
    }

    /// Last child, materializing the child list if needed
    pub fn last_child(&mut self, node: NodeId) -> DomResult<Option<NodeId>> {
        let slot = self.tree.resolve(node)?;
        self.ensure_children(slot)?;
        Ok(self.tree.last_child_of(slot).map(|s| self.tree.id(s)))
    }

    pub fn has_child_nodes(&mut self, node: NodeId) -> DomResult<bool> {
        Ok(self.first_child(node)?.is_some())
    }

    /// Snapshot of the children in document order
    pub fn children(&mut self, node: NodeId) -> DomResult<Vec<NodeId>> {
        let slot = self.tree.resolve(node)?;
        self.ensure_children(slot)?;
        Ok(self
            .tree
            .child_slots(slot)
            .into_iter()
            .map(|s| self.tree.id(s))
            .collect())
    }

    /// Descendant elements of `root` with the given qualified name, in
    /// document order. `"*"` matches every element. The result is a
    /// snapshot, not a live list.
    pub fn get_elements_by_tag_name(&mut self, root: NodeId, name: &str) -> DomResult<Vec<NodeId>> {
        self.descendant_elements(root, |n| name == "*" || n.qualified() == name)
    }

    /// Namespace-aware form; `"*"` is a wildcard in either position
    pub fn get_elements_by_tag_name_ns(
        &mut self,
        root: NodeId,
        namespace: Option<&str>,
        local_name: &str,
    ) -> DomResult<Vec<NodeId>> {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        self.descendant_elements(root, |n| {
            (namespace == Some("*") || n.namespace() == namespace)
                && (local_name == "*" || n.local_name() == local_name)
        })
    }

    fn descendant_elements(&mut self, root: NodeId, matches: impl Fn(&QualName) -> bool) -> DomResult<Vec<NodeId>> {
        let root = self.tree.resolve(root)?;
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(slot) = stack.pop() {
            self.ensure_children(slot)?;
            if slot != root && self.tree[slot].data.qual_name().is_some_and(&matches) {
                found.push(self.tree.id(slot));
            }
            stack.extend(
                self.tree
                    .child_slots(slot)
                    .into_iter()
                    .rev()
                    .filter(|&c| self.tree[c].kind() == NodeKind::Element),
            );
        }
        Ok(found)
    }

    /// True if `ancestor` is `node` or one of its ancestors
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> DomResult<bool> {
        let ancestor = self.tree.resolve(ancestor)?;
        let node = self.tree.resolve(node)?;
        Ok(self.tree.is_inclusive_ancestor(ancestor, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentId;
    use crate::node::{NodeData, NodeRecord};

    fn tree_with_parent() -> (DomTree, u32) {
        let mut tree = DomTree::new(DocumentId::next());
        let parent = tree.alloc(NodeRecord::new(NodeData::DocumentFragment));
        (tree, parent)
    }

    fn text(tree: &mut DomTree, s: &str) -> u32 {
        tree.alloc(NodeRecord::new(NodeData::Text(s.into())))
    }

    fn check_chain(tree: &DomTree, parent: u32, expected: &[u32]) {
        assert_eq!(tree.child_slots(parent), expected);
        assert_eq!(tree.last_child_of(parent), expected.last().copied());
        for (i, &slot) in expected.iter().enumerate() {
            assert_eq!(tree[slot].link.parent, Some(parent));
            let prev = if i == 0 { None } else { Some(expected[i - 1]) };
            assert_eq!(tree.previous_sibling_of(slot), prev);
        }
    }

    #[test]
    fn test_append_and_prepend() {
        let (mut tree, parent) = tree_with_parent();
        let a = text(&mut tree, "a");
        let b = text(&mut tree, "b");
        let c = text(&mut tree, "c");

        tree.link_before(parent, b, None);
        tree.link_before(parent, c, None);
        tree.link_before(parent, a, Some(b));
        check_chain(&tree, parent, &[a, b, c]);

        // Raw prev of the first child is the last child
        assert_eq!(tree[a].link.prev, Some(c));
    }

    #[test]
    fn test_insert_middle_and_unlink() {
        let (mut tree, parent) = tree_with_parent();
        let a = text(&mut tree, "a");
        let b = text(&mut tree, "b");
        let c = text(&mut tree, "c");
        tree.link_before(parent, a, None);
        tree.link_before(parent, c, None);
        tree.link_before(parent, b, Some(c));
        check_chain(&tree, parent, &[a, b, c]);

        tree.unlink(a);
        check_chain(&tree, parent, &[b, c]);
        assert_eq!(tree[a].link, SiblingLink::default());

        tree.unlink(c);
        check_chain(&tree, parent, &[b]);
        assert_eq!(tree[b].link.prev, Some(b));

        tree.unlink(b);
        check_chain(&tree, parent, &[]);
        assert_eq!(tree[parent].first_child, None);
    }

    #[test]
    fn test_ancestry() {
        let (mut tree, parent) = tree_with_parent();
        let child = tree.alloc(NodeRecord::new(NodeData::DocumentFragment));
        let leaf = text(&mut tree, "x");
        tree.link_before(parent, child, None);
        tree.link_before(child, leaf, None);

        assert!(tree.is_inclusive_ancestor(parent, leaf));
        assert!(tree.is_inclusive_ancestor(leaf, leaf));
        assert!(!tree.is_inclusive_ancestor(leaf, parent));
    }

    #[test]
    fn test_elements_by_tag_name() {
        let mut doc = Document::new();
        let root = doc.document_node();
        let html = doc.create_element("html").unwrap();
        let p1 = doc.create_element("p").unwrap();
        let div = doc.create_element("div").unwrap();
        let p2 = doc.create_element("p").unwrap();
        let svg = doc.create_element_ns(Some("urn:svg"), "s:p").unwrap();
        let text = doc.create_text_node("t");
        doc.append_child(root, html).unwrap();
        doc.append_child(html, p1).unwrap();
        doc.append_child(html, div).unwrap();
        doc.append_child(div, p2).unwrap();
        doc.append_child(div, svg).unwrap();
        doc.append_child(p1, text).unwrap();

        assert_eq!(doc.get_elements_by_tag_name(root, "p").unwrap(), vec![p1, p2]);
        assert_eq!(
            doc.get_elements_by_tag_name(html, "*").unwrap(),
            vec![p1, div, p2, svg]
        );
        assert!(doc.get_elements_by_tag_name(p2, "p").unwrap().is_empty());

        assert_eq!(
            doc.get_elements_by_tag_name_ns(root, Some("urn:svg"), "p").unwrap(),
            vec![svg]
        );
        assert_eq!(doc.get_elements_by_tag_name_ns(root, None, "p").unwrap(), vec![p1, p2]);
        assert_eq!(
            doc.get_elements_by_tag_name_ns(root, Some("*"), "p").unwrap(),
            vec![p1, p2, svg]
        );
    }
}
