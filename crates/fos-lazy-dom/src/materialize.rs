//! Lazy materialization
//!
//! A node built from a [`DeferredStore`] starts as a placeholder that only
//! knows its kind and store index. It moves through
//!
//! ```text
//! Unmaterialized -> DataSynced -> ChildrenSynced
//! ```
//!
//! `ensure_data` fills in name, value and attributes (store attributes
//! first, then any definition defaults the store lacks); `ensure_children`
//! creates one placeholder per child entry and links them in store order.
//! Each transition is idempotent and the state is advanced before any
//! population happens, so a nested access during population never
//! re-enters it. All store reads happen before the tree is touched: a
//! malformed store fails the transition without leaving half a node.

use crate::node::{AttrData, ElementData, NodeData, NodeFlags, NodeRecord, NotationData, QualName};
use crate::store::{DeferredStore, StoreIndex};
use crate::{Document, DomError, DomResult, NodeId, NodeKind};

const UNBOUND: u32 = u32::MAX;

/// Per-node synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Materialization {
    /// Only the store index is known
    Unmaterialized,
    /// Name, value and attributes are populated
    DataSynced,
    /// Direct children exist as (possibly unmaterialized) nodes
    ChildrenSynced,
}

/// Store plus the mapping from store entries to live slots
#[derive(Debug)]
pub(crate) struct DeferredState {
    pub store: DeferredStore,
    live: Vec<u32>,
}

impl DeferredState {
    pub fn new(store: DeferredStore) -> Self {
        let live = vec![UNBOUND; store.len()];
        Self { store, live }
    }

    pub fn live(&self, index: StoreIndex) -> Option<u32> {
        match self.live.get(index.value() as usize) {
            Some(&UNBOUND) | None => None,
            Some(&slot) => Some(slot),
        }
    }

    pub fn bind(&mut self, index: StoreIndex, slot: u32) {
        if let Some(entry) = self.live.get_mut(index.value() as usize) {
            *entry = slot;
        }
    }

    pub fn unbind(&mut self, index: StoreIndex) {
        self.bind(index, UNBOUND);
    }
}

/// Everything read from the store for one node's data facet
struct SyncedData {
    data: NodeData,
    ignorable_whitespace: bool,
    attributes: Vec<SyncedAttr>,
}

struct SyncedAttr {
    name: QualName,
    value: String,
    flags: crate::store::AttrFlags,
}

fn read_data(store: &DeferredStore, index: StoreIndex, kind: NodeKind) -> DomResult<SyncedData> {
    let name = || -> DomResult<String> { Ok(store.name(index)?.unwrap_or_default().to_string()) };
    let value = || -> DomResult<String> { Ok(store.value(index)?.unwrap_or_default().to_string()) };
    let mut attributes = Vec::new();

    let data = match kind {
        NodeKind::Document => NodeData::Document,
        NodeKind::DocumentFragment => NodeData::DocumentFragment,
        NodeKind::Element | NodeKind::ElementDefinition => {
            let qname = QualName::new(&name()?, store.namespace(index)?);
            let mut cursor = store.first_attribute(index)?;
            while let Some(attr) = cursor {
                if store.kind(attr)? != NodeKind::Attribute {
                    return Err(DomError::inconsistent(attr.value(), "attribute chain holds a non-attribute"));
                }
                attributes.push(SyncedAttr {
                    name: QualName::new(store.name(attr)?.unwrap_or_default(), store.namespace(attr)?),
                    value: store.value(attr)?.unwrap_or_default().to_string(),
                    flags: store.attr_flags(attr)?,
                });
                cursor = store.next_sibling(attr)?;
            }
            let element = ElementData {
                name: qname,
                attributes: Vec::new(),
            };
            if kind == NodeKind::Element {
                NodeData::Element(element)
            } else {
                NodeData::ElementDefinition(element)
            }
        }
        NodeKind::Attribute => NodeData::Attribute(AttrData {
            name: QualName::new(&name()?, store.namespace(index)?),
            value: value()?,
            owner: None,
        }),
        NodeKind::Text => NodeData::Text(value()?),
        NodeKind::CData => NodeData::CData(value()?),
        NodeKind::Comment => NodeData::Comment(value()?),
        NodeKind::ProcessingInstruction => NodeData::ProcessingInstruction {
            target: name()?,
            data: value()?,
        },
        NodeKind::Notation => {
            let (system_id, base_uri) = store.notation_details(index)?;
            NodeData::Notation(NotationData {
                name: name()?,
                public_id: store.value(index)?.map(str::to_string),
                system_id: system_id.map(str::to_string),
                base_uri: base_uri.map(str::to_string),
            })
        }
    };

    Ok(SyncedData {
        data,
        ignorable_whitespace: store.is_ignorable_whitespace(index)?,
        attributes,
    })
}

impl Document {
    fn deferred_store(&self, index: StoreIndex) -> DomResult<&DeferredStore> {
        self.deferred
            .as_ref()
            .map(|d| &d.store)
            .ok_or_else(|| DomError::inconsistent(index.value(), "node refers to a store the document does not have"))
    }

    /// Unmaterialized -> DataSynced
    pub(crate) fn ensure_data(&mut self, slot: u32) -> DomResult<()> {
        if self.tree[slot].state != Materialization::Unmaterialized {
            return Ok(());
        }
        let Some(origin) = self.tree[slot].origin else {
            self.tree[slot].state = Materialization::DataSynced;
            return Ok(());
        };
        let kind = self.tree[slot].kind();
        let synced = read_data(self.deferred_store(origin)?, origin, kind)?;

        self.tree[slot].state = Materialization::DataSynced;
        let _quiet = self.mutations.suppress();
        self.apply_data(slot, synced);
        tracing::trace!(slot, index = origin.value(), ?kind, "materialized node data");
        Ok(())
    }

    fn apply_data(&mut self, slot: u32, synced: SyncedData) {
        let SyncedData {
            data,
            ignorable_whitespace,
            attributes,
        } = synced;

        if let Some(name) = data.qual_name() {
            self.namespaces.record(name);
        }
        self.tree[slot].data = data;
        self.tree[slot]
            .flags
            .set(NodeFlags::IGNORABLE_WHITESPACE, ignorable_whitespace);

        for attr in attributes {
            self.namespaces.record(&attr.name);
            let flags = NodeFlags::default()
                .with(NodeFlags::SPECIFIED, attr.flags.is_specified())
                .with(NodeFlags::ID, attr.flags.is_id());
            let is_id = attr.flags.is_id();
            let id_value = is_id.then(|| attr.value.clone());
            let mut record = NodeRecord::new(NodeData::Attribute(AttrData {
                name: attr.name,
                value: attr.value,
                owner: Some(slot),
            }));
            record.flags = flags;
            let attr_slot = self.tree.alloc(record);
            if let Some(list) = self.tree[slot].data.attributes_mut() {
                list.push(attr_slot);
            }
            if let Some(value) = id_value {
                self.identifiers.insert(value, slot);
            }
        }
        // Defaults the parser did not write out come from the definition
        self.apply_default_attributes(slot);
    }

    /// DataSynced -> ChildrenSynced (implies the data facet)
    pub(crate) fn ensure_children(&mut self, slot: u32) -> DomResult<()> {
        self.ensure_data(slot)?;
        if self.tree[slot].state == Materialization::ChildrenSynced {
            return Ok(());
        }
        let Some(origin) = self.tree[slot].origin else {
            self.tree[slot].state = Materialization::ChildrenSynced;
            return Ok(());
        };

        let mut entries = Vec::new();
        {
            let store = self.deferred_store(origin)?;
            let mut cursor = store.first_child(origin)?;
            while let Some(child) = cursor {
                let kind = store.kind(child)?;
                if !kind.is_child_capable() {
                    return Err(DomError::inconsistent(child.value(), "child chain holds a non-child kind"));
                }
                entries.push((child, kind));
                cursor = store.next_sibling(child)?;
            }
        }

        self.tree[slot].state = Materialization::ChildrenSynced;
        let _quiet = self.mutations.suppress();
        for &(index, kind) in &entries {
            let child = self.tree.alloc(NodeRecord::deferred(kind, index));
            if let Some(state) = self.deferred.as_mut() {
                state.bind(index, child);
            }
            self.tree.link_before(slot, child, None);
        }
        tracing::trace!(slot, index = origin.value(), children = entries.len(), "materialized child list");
        Ok(())
    }

    /// Fully expand a subtree
    pub(crate) fn ensure_subtree(&mut self, slot: u32) -> DomResult<()> {
        let mut stack = vec![slot];
        while let Some(current) = stack.pop() {
            self.ensure_children(current)?;
            stack.extend(self.tree.child_slots(current));
        }
        Ok(())
    }

    /// Make the store entry `index` live by expanding the child lists on
    /// the path from the document down to it; nothing else is expanded
    pub(crate) fn materialize_path(&mut self, index: StoreIndex) -> DomResult<Option<u32>> {
        // Walk up the store to the nearest entry that is already live
        let (mut current, path) = {
            let Some(state) = self.deferred.as_ref() else {
                return Ok(None);
            };
            if let Some(slot) = state.live(index) {
                return Ok(Some(slot));
            }
            let mut path = vec![index];
            let mut cursor = state.store.parent(index)?;
            loop {
                let Some(parent) = cursor else {
                    return Ok(None);
                };
                if let Some(slot) = state.live(parent) {
                    break (slot, path);
                }
                path.push(parent);
                cursor = state.store.parent(parent)?;
            }
        };

        for step in path.into_iter().rev() {
            self.ensure_children(current)?;
            match self.deferred.as_ref().and_then(|s| s.live(step)) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Synchronization state of a node
    pub fn materialization(&self, node: NodeId) -> DomResult<Materialization> {
        let slot = self.tree.resolve(node)?;
        Ok(self.tree[slot].state)
    }

    /// Expand `node` and everything below it
    pub fn materialize_subtree(&mut self, node: NodeId) -> DomResult<()> {
        let slot = self.tree.resolve(node)?;
        self.ensure_subtree(slot)
    }

    /// True if this document was built from a deferred store
    pub fn is_deferred(&self) -> bool {
        self.deferred.is_some()
    }
}
