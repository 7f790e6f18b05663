//! Indexed child access
//!
//! Children are a linked list, so `item(i)` is a walk. Each container that
//! is indexed gets a small cache remembering the list length and the last
//! `(index, node)` pair handed out, which makes forward iteration and
//! repeated lookups O(1) per call. The cache is only a memo: mutations
//! adjust or forget it and the next read re-derives what it needs.
//!
//! Cache objects come from a per-document [`Pool`] and go back to it when
//! their owner is discarded.

use crate::{Document, DomResult, NodeId};

/// Per-container memo of `(length, last index, last node)`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct NodeListCache {
    length: Option<usize>,
    index: Option<usize>,
    node: Option<u32>,
}

impl NodeListCache {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A child was spliced in somewhere; the position of the cached node is
    /// no longer known
    pub fn child_inserted(&mut self) {
        self.length = self.length.map(|n| n + 1);
        self.index = None;
        self.node = None;
    }

    /// A child was unlinked. If it was the cached node, fall back to its
    /// previous sibling so forward iteration keeps its footing.
    pub fn child_removed(&mut self, removed: u32, previous: Option<u32>) {
        self.length = self.length.and_then(|n| n.checked_sub(1));
        if self.node == Some(removed) {
            match (self.index, previous) {
                (Some(i), Some(prev)) if i > 0 => {
                    self.index = Some(i - 1);
                    self.node = Some(prev);
                }
                _ => {
                    self.index = None;
                    self.node = None;
                }
            }
        } else {
            self.index = None;
            self.node = None;
        }
    }
}

/// Counters for the indexed-access paths
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeListStats {
    /// Sibling hops performed while resolving `item`/`length`
    pub walk_steps: usize,
    /// Calls answered straight from the cache
    pub cache_hits: usize,
    pub caches_created: usize,
    pub caches_reused: usize,
}

/// Live view of a container's children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeList {
    parent: NodeId,
}

impl NodeList {
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn item(&self, doc: &mut Document, index: usize) -> DomResult<Option<NodeId>> {
        doc.item(self.parent, index)
    }

    pub fn length(&self, doc: &mut Document) -> DomResult<usize> {
        doc.length(self.parent)
    }
}

impl Document {
    /// Live child list; materializes exactly the direct children
    pub fn child_nodes(&mut self, node: NodeId) -> DomResult<NodeList> {
        let slot = self.tree.resolve(node)?;
        self.ensure_children(slot)?;
        Ok(NodeList { parent: node })
    }

    /// Number of children
    pub fn length(&mut self, parent: NodeId) -> DomResult<usize> {
        let slot = self.tree.resolve(parent)?;
        self.ensure_children(slot)?;
        let mut cache = self.take_list_cache(slot);

        let length = match cache.length {
            Some(n) => {
                self.list_stats.cache_hits += 1;
                n
            }
            None => {
                let mut n = 0;
                let mut cursor = self.tree[slot].first_child;
                while let Some(child) = cursor {
                    n += 1;
                    self.list_stats.walk_steps += 1;
                    cursor = self.tree[child].link.next;
                }
                cache.length = Some(n);
                n
            }
        };

        self.tree[slot].list_cache = Some(cache);
        Ok(length)
    }

    /// Child at `index` in document order
    pub fn item(&mut self, parent: NodeId, index: usize) -> DomResult<Option<NodeId>> {
        let slot = self.tree.resolve(parent)?;
        self.ensure_children(slot)?;
        let mut cache = self.take_list_cache(slot);
        let found = self.lookup_item(slot, &mut cache, index);
        self.tree[slot].list_cache = Some(cache);
        Ok(found.map(|s| self.tree.id(s)))
    }

    fn lookup_item(&mut self, parent: u32, cache: &mut NodeListCache, index: usize) -> Option<u32> {
        if let Some(len) = cache.length {
            if index >= len {
                self.list_stats.cache_hits += 1;
                return None;
            }
        }
        if let (Some(i), Some(node)) = (cache.index, cache.node) {
            if i == index {
                self.list_stats.cache_hits += 1;
                return Some(node);
            }
            if i + 1 == index {
                self.list_stats.walk_steps += 1;
                let next = self.tree[node].link.next;
                match next {
                    Some(next) => {
                        cache.index = Some(index);
                        cache.node = Some(next);
                    }
                    None => cache.length = Some(index),
                }
                return next;
            }
            // Backward from the cached node when that is the shorter walk
            if index < i && i - index <= index {
                let mut cursor = node;
                for _ in index..i {
                    self.list_stats.walk_steps += 1;
                    match self.tree.previous_sibling_of(cursor) {
                        Some(prev) => cursor = prev,
                        None => return None,
                    }
                }
                cache.index = Some(index);
                cache.node = Some(cursor);
                return Some(cursor);
            }
        }

        // Backward from the last child when the length is known and the
        // target sits in the second half
        if let Some(len) = cache.length {
            if index > len / 2 {
                let mut cursor = self.tree.last_child_of(parent)?;
                for _ in index + 1..len {
                    self.list_stats.walk_steps += 1;
                    cursor = self.tree.previous_sibling_of(cursor)?;
                }
                cache.index = Some(index);
                cache.node = Some(cursor);
                return Some(cursor);
            }
        }

        let mut cursor = self.tree[parent].first_child;
        let mut position = 0;
        while let Some(node) = cursor {
            if position == index {
                cache.index = Some(index);
                cache.node = Some(node);
                return Some(node);
            }
            self.list_stats.walk_steps += 1;
            position += 1;
            cursor = self.tree[node].link.next;
        }
        cache.length = Some(position);
        None
    }

    fn take_list_cache(&mut self, slot: u32) -> Box<NodeListCache> {
        if let Some(cache) = self.tree[slot].list_cache.take() {
            return cache;
        }
        let mut created = false;
        let mut cache = self.cache_pool.get(|| {
            created = true;
            Box::default()
        });
        if created {
            self.list_stats.caches_created += 1;
        } else {
            self.list_stats.caches_reused += 1;
            cache.reset();
        }
        cache
    }

    /// Return a discarded container's cache to the pool
    pub(crate) fn recycle_list_cache(&mut self, cache: Box<NodeListCache>) {
        self.cache_pool.put(cache);
    }

    /// Indexed-access counters for this document
    pub fn node_list_stats(&self) -> NodeListStats {
        self.list_stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_insert_forgets_position() {
        let mut cache = NodeListCache {
            length: Some(3),
            index: Some(1),
            node: Some(10),
        };
        cache.child_inserted();
        assert_eq!(cache.length, Some(4));
        assert_eq!(cache.index, None);
    }

    #[test]
    fn test_cache_remove_cached_node_steps_back() {
        let mut cache = NodeListCache {
            length: Some(3),
            index: Some(2),
            node: Some(12),
        };
        cache.child_removed(12, Some(11));
        assert_eq!(cache.length, Some(2));
        assert_eq!(cache.index, Some(1));
        assert_eq!(cache.node, Some(11));

        cache.child_removed(40, None);
        assert_eq!(cache.length, Some(1));
        assert_eq!(cache.node, None);
    }

    fn list(n: usize) -> (Document, NodeId, Vec<NodeId>) {
        let mut doc = Document::new();
        let parent = doc.create_element("ul").unwrap();
        let items = (0..n)
            .map(|i| {
                let li = doc.create_text_node(&i.to_string());
                doc.append_child(parent, li).unwrap();
                li
            })
            .collect();
        (doc, parent, items)
    }

    #[test]
    fn test_item_all_orders() {
        let (mut doc, parent, items) = list(7);
        assert_eq!(doc.length(parent).unwrap(), 7);

        for (i, &id) in items.iter().enumerate() {
            assert_eq!(doc.item(parent, i).unwrap(), Some(id));
        }
        for (i, &id) in items.iter().enumerate().rev() {
            assert_eq!(doc.item(parent, i).unwrap(), Some(id));
        }
        for &i in &[3, 0, 6, 2, 5, 1, 4] {
            assert_eq!(doc.item(parent, i).unwrap(), Some(items[i]));
        }
        assert_eq!(doc.item(parent, 7).unwrap(), None);
        assert_eq!(doc.item(parent, 100).unwrap(), None);
    }

    #[test]
    fn test_sequential_access_is_amortized() {
        let (mut doc, parent, _) = list(50);
        let before = doc.node_list_stats().walk_steps;
        for i in 0..50 {
            assert!(doc.item(parent, i).unwrap().is_some());
            // Re-fetching the same index is a pure hit
            assert!(doc.item(parent, i).unwrap().is_some());
        }
        let steps = doc.node_list_stats().walk_steps - before;
        assert!(steps <= 50, "expected at most one hop per index, got {steps}");
    }

    #[test]
    fn test_length_tracks_mutation() {
        let (mut doc, parent, items) = list(3);
        assert_eq!(doc.length(parent).unwrap(), 3);
        doc.remove_child(parent, items[1]).unwrap();
        assert_eq!(doc.length(parent).unwrap(), 2);
        assert_eq!(doc.item(parent, 1).unwrap(), Some(items[2]));
        let extra = doc.create_comment("c");
        doc.insert_before(parent, extra, Some(items[0])).unwrap();
        assert_eq!(doc.length(parent).unwrap(), 3);
        assert_eq!(doc.item(parent, 0).unwrap(), Some(extra));
    }
}
