//! Document - owner of the node arena
//!
//! The document holds every node it owns in one arena, together with the
//! identifier and namespace registries, the free list of node-list caches
//! and, for parsed documents, the deferred store nodes expand from.
//! Node handles are only meaningful against the document that issued them.

use crate::materialize::DeferredState;
use crate::node::{AttrData, ElementData, NodeData, NodeFlags, NodeRecord, NotationData, QualName};
use crate::user_data::{UserDataEntry, UserDataOperation};
use crate::node_list::{NodeListCache, NodeListStats};
use crate::observer::{MutationNotifier, MutationRecord};
use crate::operations::ChildPolicy;
use crate::pool::{Pool, PoolStats};
use crate::store::{AttrFlags, DeferredStore, StoreIndex};
use crate::tree::DomTree;
use crate::{DocumentId, DomError, DomResult, NodeId, NodeKind, TypeInfo, XMLNS_NAMESPACE, XML_NAMESPACE};
use std::collections::{HashMap, HashSet};

/// Free-list capacity for node-list caches
const DEFAULT_CACHE_POOL: usize = 256;

/// Prefix to namespace bindings seen in the document. The first binding
/// recorded for a prefix wins; the empty prefix is the default namespace.
#[derive(Debug, Clone)]
pub(crate) struct NamespaceRegistry {
    bindings: HashMap<String, String>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert("xml".to_string(), XML_NAMESPACE.to_string());
        bindings.insert("xmlns".to_string(), XMLNS_NAMESPACE.to_string());
        Self { bindings }
    }
}

impl NamespaceRegistry {
    pub fn record(&mut self, name: &QualName) {
        if let Some(uri) = name.namespace() {
            let prefix = name.prefix().unwrap_or("");
            self.bindings
                .entry(prefix.to_string())
                .or_insert_with(|| uri.to_string());
        }
    }

    fn uri(&self, prefix: Option<&str>) -> Option<&str> {
        self.bindings.get(prefix.unwrap_or("")).map(String::as_str)
    }

    fn prefix(&self, uri: &str) -> Option<&str> {
        self.bindings
            .iter()
            .filter(|(p, u)| !p.is_empty() && u.as_str() == uri)
            .map(|(p, _)| p.as_str())
            .min()
    }
}

/// How copied nodes treat flags and attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyMode {
    Clone,
    Import,
    Adopt,
    WholeDocument,
}

impl CopyMode {
    fn keeps_unspecified(self) -> bool {
        matches!(self, Self::Clone | Self::WholeDocument)
    }

    fn keeps_ids(self) -> bool {
        matches!(self, Self::Adopt | Self::WholeDocument)
    }

    fn keeps_read_only(self) -> bool {
        self == Self::WholeDocument
    }

    fn applies_defaults(self) -> bool {
        matches!(self, Self::Import | Self::Adopt)
    }
}

/// Owned copy of a node, taken before anything is written
struct NodeSnapshot {
    source: NodeId,
    data: NodeData,
    flags: NodeFlags,
    type_info: Option<TypeInfo>,
    user_data: HashMap<String, UserDataEntry>,
    attributes: Vec<NodeSnapshot>,
    children: Vec<NodeSnapshot>,
}

/// DOM Document
///
/// Not `Send` or `Sync`: one document is mutated from one thread.
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    pub(crate) tree: DomTree,
    root: u32,
    /// ID value -> element
    pub(crate) identifiers: HashMap<String, u32>,
    pub(crate) namespaces: NamespaceRegistry,
    /// Element name -> definition node
    pub(crate) definitions: HashMap<String, u32>,
    pub(crate) cache_pool: Pool<Box<NodeListCache>>,
    pub(crate) list_stats: NodeListStats,
    pub(crate) deferred: Option<DeferredState>,
    pub(crate) mutations: MutationNotifier,
    pub(crate) policy: ChildPolicy,
    /// Validate names on creation and rename
    pub(crate) strict_error_checking: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a new empty document
    pub fn new() -> Self {
        Self::with_cache_pool(DEFAULT_CACHE_POOL)
    }

    /// Empty document whose node-list cache free list holds at most
    /// `capacity` entries
    pub fn with_cache_pool(capacity: usize) -> Self {
        let id = DocumentId::next();
        let mut tree = DomTree::new(id);
        let root = tree.alloc(NodeRecord::new(NodeData::Document));
        Self {
            id,
            tree,
            root,
            identifiers: HashMap::new(),
            namespaces: NamespaceRegistry::default(),
            definitions: HashMap::new(),
            cache_pool: Pool::new(capacity),
            list_stats: NodeListStats::default(),
            deferred: None,
            mutations: MutationNotifier::default(),
            policy: ChildPolicy::default(),
            strict_error_checking: true,
        }
    }

    /// Document backed by a parsed store. Only the document node and the
    /// element definitions are created up front.
    pub fn from_store(store: DeferredStore) -> DomResult<Self> {
        store.validate()?;
        let root_index = store
            .root()
            .ok_or_else(|| DomError::inconsistent(0, "store has no document entry"))?;
        if store.kind(root_index)? != NodeKind::Document {
            return Err(DomError::inconsistent(root_index.value(), "root entry is not a document"));
        }
        let definitions: Vec<StoreIndex> = store.definitions().to_vec();
        let entries = store.len();

        let id = DocumentId::next();
        let mut tree = DomTree::new(id);
        let root = tree.alloc(NodeRecord::deferred(NodeKind::Document, root_index));
        let mut state = DeferredState::new(store);
        state.bind(root_index, root);

        let mut doc = Self {
            id,
            tree,
            root,
            identifiers: HashMap::new(),
            namespaces: NamespaceRegistry::default(),
            definitions: HashMap::new(),
            cache_pool: Pool::new(DEFAULT_CACHE_POOL),
            list_stats: NodeListStats::default(),
            deferred: Some(state),
            mutations: MutationNotifier::default(),
            policy: ChildPolicy::default(),
            strict_error_checking: true,
        };

        for index in definitions {
            let slot = doc
                .tree
                .alloc(NodeRecord::deferred(NodeKind::ElementDefinition, index));
            if let Some(state) = doc.deferred.as_mut() {
                state.bind(index, slot);
            }
            doc.ensure_data(slot)?;
            let name = doc.tree[slot].data.name().to_string();
            doc.definitions.insert(name, slot);
        }

        tracing::debug!(
            document = id.0,
            entries,
            definitions = doc.definitions.len(),
            "document built from deferred store"
        );
        Ok(doc)
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// The document node itself
    pub fn document_node(&self) -> NodeId {
        self.tree.id(self.root)
    }

    /// First element child of the document
    pub fn document_element(&mut self) -> DomResult<Option<NodeId>> {
        self.ensure_children(self.root)?;
        Ok(self
            .tree
            .child_slots(self.root)
            .into_iter()
            .find(|&s| self.tree[s].kind() == NodeKind::Element)
            .map(|s| self.tree.id(s)))
    }

    /// Number of nodes currently alive in the arena
    pub fn live_node_count(&self) -> usize {
        self.tree.len()
    }

    pub fn cache_pool_stats(&self) -> PoolStats {
        self.cache_pool.stats()
    }

    // -- creation ----------------------------------------------------------

    fn create(&mut self, data: NodeData) -> NodeId {
        if let Some(name) = data.qual_name() {
            self.namespaces.record(name);
        }
        let slot = self.tree.alloc(NodeRecord::new(data));
        self.tree.id(slot)
    }

    pub fn create_element(&mut self, name: &str) -> DomResult<NodeId> {
        self.check_name(name)?;
        Ok(self.create_element_unchecked(QualName::new(name, None)))
    }

    /// Element with a namespace; defaults declared for its name are applied
    pub fn create_element_ns(&mut self, namespace: Option<&str>, qualified_name: &str) -> DomResult<NodeId> {
        self.check_qualified_name(qualified_name, namespace)?;
        Ok(self.create_element_unchecked(QualName::new(qualified_name, namespace)))
    }

    fn create_element_unchecked(&mut self, name: QualName) -> NodeId {
        let id = self.create(NodeData::Element(ElementData {
            name,
            attributes: Vec::new(),
        }));
        self.apply_default_attributes(id.slot);
        id
    }

    pub fn create_attribute(&mut self, name: &str) -> DomResult<NodeId> {
        self.check_name(name)?;
        Ok(self.create_attribute_unchecked(QualName::new(name, None)))
    }

    pub fn create_attribute_ns(&mut self, namespace: Option<&str>, qualified_name: &str) -> DomResult<NodeId> {
        self.check_qualified_name(qualified_name, namespace)?;
        Ok(self.create_attribute_unchecked(QualName::new(qualified_name, namespace)))
    }

    fn create_attribute_unchecked(&mut self, name: QualName) -> NodeId {
        self.create(NodeData::Attribute(AttrData {
            name,
            value: String::new(),
            owner: None,
        }))
    }

    pub fn create_text_node(&mut self, data: &str) -> NodeId {
        self.create(NodeData::Text(data.to_string()))
    }

    pub fn create_cdata_section(&mut self, data: &str) -> NodeId {
        self.create(NodeData::CData(data.to_string()))
    }

    pub fn create_comment(&mut self, data: &str) -> NodeId {
        self.create(NodeData::Comment(data.to_string()))
    }

    pub fn create_processing_instruction(&mut self, target: &str, data: &str) -> DomResult<NodeId> {
        self.check_name(target)?;
        Ok(self.create(NodeData::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        }))
    }

    pub fn create_document_fragment(&mut self) -> NodeId {
        self.create(NodeData::DocumentFragment)
    }

    pub fn create_notation(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> DomResult<NodeId> {
        self.check_name(name)?;
        Ok(self.create(NodeData::Notation(NotationData {
            name: name.to_string(),
            public_id: public_id.map(str::to_string),
            system_id: system_id.map(str::to_string),
            base_uri: None,
        })))
    }

    // -- node data ---------------------------------------------------------

    /// Resolve and sync the data facet
    fn synced(&mut self, node: NodeId) -> DomResult<u32> {
        let slot = self.tree.resolve(node)?;
        self.ensure_data(slot)?;
        Ok(slot)
    }

    /// Kind of a node; never forces materialization
    pub fn node_kind(&self, node: NodeId) -> DomResult<NodeKind> {
        let slot = self.tree.resolve(node)?;
        Ok(self.tree[slot].kind())
    }

    pub fn node_name(&mut self, node: NodeId) -> DomResult<String> {
        let slot = self.synced(node)?;
        Ok(self.tree[slot].data.name().to_string())
    }

    pub fn node_value(&mut self, node: NodeId) -> DomResult<Option<String>> {
        let slot = self.synced(node)?;
        Ok(self.tree[slot].data.value().map(str::to_string))
    }

    /// Set the value of a node that has one; other kinds ignore the call
    pub fn set_node_value(&mut self, node: NodeId, value: &str) -> DomResult<()> {
        let slot = self.synced(node)?;
        self.check_writable(slot)?;
        let Some(old) = self.tree[slot].data.value().map(str::to_string) else {
            return Ok(());
        };
        self.tree[slot].data.set_value(value);

        let attr = match &self.tree[slot].data {
            NodeData::Attribute(a) => Some((a.owner, a.name.qualified().to_string())),
            _ => None,
        };
        match attr {
            Some((owner, name)) => {
                self.tree[slot].flags.set(NodeFlags::SPECIFIED, true);
                if let Some(owner) = owner {
                    if self.tree[slot].flags.has(NodeFlags::ID) {
                        self.reindex_identifier(owner, Some(&old), Some(value));
                    }
                    let target = self.tree.id(owner);
                    self.mutations
                        .push(MutationRecord::attribute(target, &name, Some(old)));
                }
            }
            None => self
                .mutations
                .push(MutationRecord::character_data(node, Some(old))),
        }
        Ok(())
    }

    fn qual_name_part(&mut self, node: NodeId, part: fn(&QualName) -> Option<&str>) -> DomResult<Option<String>> {
        let slot = self.synced(node)?;
        Ok(self.tree[slot]
            .data
            .qual_name()
            .and_then(part)
            .map(str::to_string))
    }

    /// Local part of an element or attribute name
    pub fn local_name(&mut self, node: NodeId) -> DomResult<Option<String>> {
        self.qual_name_part(node, |n| Some(n.local_name()))
    }

    pub fn prefix(&mut self, node: NodeId) -> DomResult<Option<String>> {
        self.qual_name_part(node, QualName::prefix)
    }

    pub fn namespace_uri(&mut self, node: NodeId) -> DomResult<Option<String>> {
        self.qual_name_part(node, QualName::namespace)
    }

    /// Concatenated text and CDATA below a container, or the node's own
    /// value for leaf kinds; `None` for documents and notations
    pub fn text_content(&mut self, node: NodeId) -> DomResult<Option<String>> {
        let slot = self.synced(node)?;
        match self.tree[slot].kind() {
            NodeKind::Document | NodeKind::Notation => return Ok(None),
            kind if !kind.is_container() => {
                return Ok(self.tree[slot].data.value().map(str::to_string));
            }
            _ => {}
        }

        let mut out = String::new();
        let mut stack = vec![slot];
        while let Some(current) = stack.pop() {
            self.ensure_children(current)?;
            let children = self.tree.child_slots(current);
            for &child in children.iter().rev() {
                stack.push(child);
            }
            if current != slot {
                self.ensure_data(current)?;
                if let NodeData::Text(s) | NodeData::CData(s) = &self.tree[current].data {
                    out.push_str(s);
                }
            }
        }
        Ok(Some(out))
    }

    pub fn is_ignorable_whitespace(&mut self, node: NodeId) -> DomResult<bool> {
        let slot = self.synced(node)?;
        Ok(self.tree[slot].flags.has(NodeFlags::IGNORABLE_WHITESPACE))
    }

    fn notation(&mut self, node: NodeId) -> DomResult<&NotationData> {
        let slot = self.synced(node)?;
        match &self.tree[slot].data {
            NodeData::Notation(n) => Ok(n),
            other => Err(DomError::InvalidNodeKind {
                expected: "notation",
                actual: other.kind(),
            }),
        }
    }

    pub fn notation_public_id(&mut self, node: NodeId) -> DomResult<Option<String>> {
        Ok(self.notation(node)?.public_id.clone())
    }

    pub fn notation_system_id(&mut self, node: NodeId) -> DomResult<Option<String>> {
        Ok(self.notation(node)?.system_id.clone())
    }

    pub fn notation_base_uri(&mut self, node: NodeId) -> DomResult<Option<String>> {
        Ok(self.notation(node)?.base_uri.clone())
    }

    /// Mark a node (and with `deep`, its subtree and attributes) read-only
    pub fn set_read_only(&mut self, node: NodeId, deep: bool) -> DomResult<()> {
        let slot = self.tree.resolve(node)?;
        if !deep {
            self.tree[slot].flags.set(NodeFlags::READ_ONLY, true);
            return Ok(());
        }
        self.ensure_subtree(slot)?;
        for s in self.subtree_slots(slot) {
            self.ensure_data(s)?;
            self.tree[s].flags.set(NodeFlags::READ_ONLY, true);
        }
        for s in self.subtree_slots(slot) {
            for attr in self.tree[s].data.attributes().unwrap_or_default().to_vec() {
                self.tree[attr].flags.set(NodeFlags::READ_ONLY, true);
            }
        }
        Ok(())
    }

    pub fn is_read_only(&self, node: NodeId) -> DomResult<bool> {
        let slot = self.tree.resolve(node)?;
        Ok(self.tree[slot].flags.has(NodeFlags::READ_ONLY))
    }

    /// Attach (or clear) a schema type annotation on an element or attribute
    pub fn set_type_info(&mut self, node: NodeId, info: Option<TypeInfo>) -> DomResult<()> {
        let slot = self.tree.resolve(node)?;
        match self.tree[slot].kind() {
            NodeKind::Element | NodeKind::Attribute => {
                self.tree[slot].type_info = info;
                Ok(())
            }
            actual => Err(DomError::InvalidNodeKind {
                expected: "element or attribute",
                actual,
            }),
        }
    }

    pub fn type_info(&self, node: NodeId) -> DomResult<Option<TypeInfo>> {
        let slot = self.tree.resolve(node)?;
        Ok(self.tree[slot].type_info.clone())
    }

    // -- registries --------------------------------------------------------

    fn is_attached(&self, slot: u32) -> bool {
        self.tree.is_inclusive_ancestor(self.root, slot)
    }

    /// Element whose ID-type attribute has this value, if it is attached
    /// under the document. For a parsed document only the path down to
    /// the element is materialized.
    pub fn get_element_by_id(&mut self, id: &str) -> DomResult<Option<NodeId>> {
        if let Some(&slot) = self.identifiers.get(id) {
            if self.tree.get(slot).is_some() && self.is_attached(slot) {
                return Ok(Some(self.tree.id(slot)));
            }
        }

        let index = match self.deferred.as_ref().and_then(|d| d.store.identifier(id)) {
            Some(index) => index,
            None => return Ok(None),
        };
        let Some(slot) = self.materialize_path(index)? else {
            return Ok(None);
        };
        self.ensure_data(slot)?;
        if self.identifiers.get(id) == Some(&slot) && self.is_attached(slot) {
            Ok(Some(self.tree.id(slot)))
        } else {
            Ok(None)
        }
    }

    /// Namespace bound to `prefix` (`None` for the default namespace)
    pub fn lookup_namespace_uri(&self, prefix: Option<&str>) -> Option<&str> {
        self.namespaces.uri(prefix)
    }

    /// A prefix bound to `uri`
    pub fn lookup_prefix(&self, uri: &str) -> Option<&str> {
        self.namespaces.prefix(uri)
    }

    // -- copying -----------------------------------------------------------

    /// Preorder list of the live nodes in a subtree (attributes excluded)
    fn subtree_slots(&self, slot: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut stack = vec![slot];
        while let Some(current) = stack.pop() {
            out.push(current);
            let children = self.tree.child_slots(current);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    fn snapshot(&mut self, slot: u32, deep: bool, mode: CopyMode) -> DomResult<NodeSnapshot> {
        self.ensure_data(slot)?;
        if deep {
            self.ensure_children(slot)?;
        }
        let record = &self.tree[slot];
        let mut data = record.data.clone();
        if let Some(list) = data.attributes_mut() {
            list.clear();
        }
        if let NodeData::Attribute(attr) = &mut data {
            attr.owner = None;
        }

        let mut attributes = Vec::new();
        for &a in record.data.attributes().unwrap_or_default() {
            let attr = &self.tree[a];
            if !mode.keeps_unspecified() && !attr.flags.has(NodeFlags::SPECIFIED) {
                continue;
            }
            let mut data = attr.data.clone();
            if let NodeData::Attribute(a) = &mut data {
                a.owner = None;
            }
            attributes.push(NodeSnapshot {
                source: self.tree.id(a),
                data,
                flags: attr.flags,
                type_info: attr.type_info.clone(),
                user_data: attr.user_data.clone(),
                attributes: Vec::new(),
                children: Vec::new(),
            });
        }

        let flags = record.flags;
        let type_info = record.type_info.clone();
        let user_data = record.user_data.clone();
        let mut children = Vec::new();
        if deep {
            for child in self.tree.child_slots(slot) {
                children.push(self.snapshot(child, true, mode)?);
            }
        }
        Ok(NodeSnapshot {
            source: self.tree.id(slot),
            data,
            flags,
            type_info,
            user_data,
            attributes,
            children,
        })
    }

    /// Build a snapshot into this document. Nodes carrying user data are
    /// recorded in `copies` as (source, new slot).
    fn instantiate(&mut self, snapshot: NodeSnapshot, mode: CopyMode, copies: &mut Vec<(NodeId, u32)>) -> u32 {
        let NodeSnapshot {
            source,
            data,
            mut flags,
            type_info,
            user_data,
            attributes,
            children,
        } = snapshot;
        if !mode.keeps_read_only() {
            flags.set(NodeFlags::READ_ONLY, false);
        }
        if !mode.keeps_ids() {
            flags.set(NodeFlags::ID, false);
        }
        if let Some(name) = data.qual_name() {
            self.namespaces.record(name);
        }
        let kind = data.kind();
        let mut record = NodeRecord::new(data);
        record.flags = flags;
        record.type_info = type_info;
        let has_user_data = !user_data.is_empty();
        record.user_data = user_data;
        let slot = self.tree.alloc(record);
        if has_user_data {
            copies.push((source, slot));
        }

        for attr in attributes {
            let a = self.instantiate(attr, mode, copies);
            if let NodeData::Attribute(data) = &mut self.tree[a].data {
                data.owner = Some(slot);
            }
            if let Some(list) = self.tree[slot].data.attributes_mut() {
                list.push(a);
            }
            if self.tree[a].flags.has(NodeFlags::ID) {
                if let Some(value) = self.tree[a].data.value().map(str::to_string) {
                    self.identifiers.insert(value, slot);
                }
            }
        }
        if mode.applies_defaults() && kind == NodeKind::Element {
            self.apply_default_attributes(slot);
        }
        for child in children {
            let c = self.instantiate(child, mode, copies);
            self.tree.link_before(slot, c, None);
        }
        slot
    }

    /// Detached copy of a node; `deep` copies the subtree in order.
    /// Clones are writable and carry no ID registrations.
    pub fn clone_node(&mut self, node: NodeId, deep: bool) -> DomResult<NodeId> {
        let slot = self.tree.resolve(node)?;
        if self.tree[slot].kind() == NodeKind::Document {
            return Err(DomError::NotSupported {
                operation: "clone a document node; use clone_document",
            });
        }
        let snapshot = self.snapshot(slot, deep, CopyMode::Clone)?;
        let mut copies = Vec::new();
        let copy = self.instantiate(snapshot, CopyMode::Clone, &mut copies);
        self.notify_user_data(UserDataOperation::Cloned, &copies);
        Ok(self.tree.id(copy))
    }

    /// Copy a node from another document into this one. Only specified
    /// attributes come along; defaults are taken from this document.
    pub fn import_node(&mut self, source: &mut Document, node: NodeId, deep: bool) -> DomResult<NodeId> {
        let slot = source.tree.resolve(node)?;
        match source.tree[slot].kind() {
            NodeKind::Document => {
                return Err(DomError::NotSupported {
                    operation: "import a document node",
                });
            }
            NodeKind::ElementDefinition => {
                return Err(DomError::NotSupported {
                    operation: "import an element definition",
                });
            }
            _ => {}
        }
        let snapshot = source.snapshot(slot, deep, CopyMode::Import)?;
        let mut copies = Vec::new();
        let copy = self.instantiate(snapshot, CopyMode::Import, &mut copies);
        if self.tree[copy].kind() == NodeKind::Attribute {
            self.tree[copy].flags.set(NodeFlags::SPECIFIED, true);
        }
        self.notify_user_data(UserDataOperation::Imported, &copies);
        tracing::debug!(from = source.id.0, to = self.id.0, deep, "imported node");
        Ok(self.tree.id(copy))
    }

    /// Move a subtree out of `source` into this document. The source
    /// handles stop resolving; the returned id is the node's new identity.
    pub fn adopt_node(&mut self, source: &mut Document, node: NodeId) -> DomResult<NodeId> {
        let slot = source.tree.resolve(node)?;
        match source.tree[slot].kind() {
            NodeKind::Document => {
                return Err(DomError::NotSupported {
                    operation: "adopt a document node",
                });
            }
            NodeKind::Notation => return Err(DomError::ReadOnly),
            _ => {}
        }
        source.check_writable(slot)?;

        let snapshot = source.snapshot(slot, true, CopyMode::Adopt)?;
        let owner = match &source.tree[slot].data {
            NodeData::Attribute(a) => a.owner,
            _ => None,
        };
        if let Some(owner) = owner {
            let owner = source.tree.id(owner);
            source.remove_attribute_node(owner, node)?;
        } else if let Some(parent) = source.tree[slot].link.parent {
            let parent = source.tree.id(parent);
            source.remove_child(parent, node)?;
        }
        source.discard(node)?;

        let mut copies = Vec::new();
        let adopted = self.instantiate(snapshot, CopyMode::Adopt, &mut copies);
        if self.tree[adopted].kind() == NodeKind::Attribute {
            self.tree[adopted].flags.set(NodeFlags::SPECIFIED, true);
        }
        self.notify_user_data(UserDataOperation::Adopted, &copies);
        tracing::debug!(from = source.id.0, to = self.id.0, "adopted node");
        Ok(self.tree.id(adopted))
    }

    /// Fully materialized, independent copy of the whole document,
    /// definitions and identifiers included
    pub fn clone_document(&mut self) -> DomResult<Document> {
        let mut definitions: Vec<(String, u32)> =
            self.definitions.iter().map(|(k, &v)| (k.clone(), v)).collect();
        definitions.sort_by_key(|&(_, slot)| slot);

        let mut def_snapshots = Vec::with_capacity(definitions.len());
        for (name, slot) in definitions {
            def_snapshots.push((name, self.snapshot(slot, false, CopyMode::WholeDocument)?));
        }
        let root = self.snapshot(self.root, true, CopyMode::WholeDocument)?;

        let mut copy = Document::with_cache_pool(self.cache_pool.capacity());
        copy.policy = self.policy.clone();
        copy.namespaces = self.namespaces.clone();
        copy.strict_error_checking = self.strict_error_checking;
        let mut copies = Vec::new();
        for (name, snapshot) in def_snapshots {
            let slot = copy.instantiate(snapshot, CopyMode::WholeDocument, &mut copies);
            copy.definitions.insert(name, slot);
        }
        for child in root.children {
            let slot = copy.instantiate(child, CopyMode::WholeDocument, &mut copies);
            copy.tree.link_before(copy.root, slot, None);
        }
        copy.notify_user_data(UserDataOperation::Cloned, &copies);
        tracing::debug!(from = self.id.0, to = copy.id.0, nodes = copy.live_node_count(), "cloned document");
        Ok(copy)
    }

    /// Free a detached subtree. Its ids stop resolving, its caches return
    /// to the pool and its identifiers are unregistered.
    pub fn discard(&mut self, node: NodeId) -> DomResult<()> {
        let slot = self.tree.resolve(node)?;
        if slot == self.root {
            return Err(DomError::NotSupported {
                operation: "discard the document node",
            });
        }
        let owner = match &self.tree[slot].data {
            NodeData::Attribute(a) => a.owner,
            _ => None,
        };
        if self.tree[slot].link.parent.is_some() || owner.is_some() {
            return Err(DomError::hierarchy("node is still attached"));
        }
        self.free_subtree(slot);
        Ok(())
    }

    /// Release a detached subtree and everything hanging off it
    pub(crate) fn free_subtree(&mut self, slot: u32) {
        let mut freed = HashSet::new();
        for s in self.subtree_slots(slot) {
            freed.insert(s);
            freed.extend(self.tree[s].data.attributes().unwrap_or_default().iter().copied());
        }
        for &s in &freed {
            let Some(record) = self.tree.free(s) else {
                continue;
            };
            if let Some(cache) = record.list_cache {
                self.recycle_list_cache(cache);
            }
            if let (Some(origin), Some(state)) = (record.origin, self.deferred.as_mut()) {
                state.unbind(origin);
            }
        }
        self.identifiers.retain(|_, s| !freed.contains(s));
        self.definitions.retain(|_, s| !freed.contains(s));
    }

    // -- persistence -------------------------------------------------------

    /// Encode the whole document into a fresh store
    pub fn to_store(&mut self) -> DomResult<DeferredStore> {
        self.ensure_subtree(self.root)?;
        let mut definitions: Vec<(String, u32)> =
            self.definitions.iter().map(|(k, &v)| (k.clone(), v)).collect();
        definitions.sort_by_key(|&(_, slot)| slot);

        let mut all = self.subtree_slots(self.root);
        all.extend(definitions.iter().map(|&(_, slot)| slot));
        for &slot in &all {
            let attrs = self.tree[slot].data.attributes().unwrap_or_default();
            if self.tree[slot].type_info.is_some() || attrs.iter().any(|&a| self.tree[a].type_info.is_some()) {
                return Err(DomError::NotSerializable);
            }
        }

        let mut store = DeferredStore::new();
        let doc = store.create_document();
        for (name, slot) in definitions {
            let index = store.create_element_definition(&name);
            self.write_attributes(&mut store, slot, index)?;
        }

        let mut stack = vec![(self.root, doc)];
        while let Some((slot, index)) = stack.pop() {
            let children = self.tree.child_slots(slot);
            let mut written = Vec::with_capacity(children.len());
            for child in children {
                let child_index = self.write_node(&mut store, child)?;
                store.append_child(index, child_index)?;
                written.push((child, child_index));
            }
            stack.extend(written.into_iter().rev());
        }
        tracing::debug!(document = self.id.0, entries = store.len(), "persisted document");
        Ok(store)
    }

    fn write_node(&self, store: &mut DeferredStore, slot: u32) -> DomResult<StoreIndex> {
        let record = &self.tree[slot];
        let index = match &record.data {
            NodeData::Element(e) => {
                let index = store.create_element(e.name.qualified(), e.name.namespace());
                self.write_attributes(store, slot, index)?;
                index
            }
            NodeData::ElementDefinition(e) => {
                let index = store.create_element_definition(e.name.qualified());
                self.write_attributes(store, slot, index)?;
                index
            }
            NodeData::Text(s) => store.create_text(s, record.flags.has(NodeFlags::IGNORABLE_WHITESPACE)),
            NodeData::CData(s) => store.create_cdata(s),
            NodeData::Comment(s) => store.create_comment(s),
            NodeData::ProcessingInstruction { target, data } => store.create_processing_instruction(target, data),
            NodeData::Notation(n) => store.create_notation(
                &n.name,
                n.public_id.as_deref(),
                n.system_id.as_deref(),
                n.base_uri.as_deref(),
            ),
            NodeData::Document | NodeData::DocumentFragment | NodeData::Attribute(_) => {
                return Err(DomError::inconsistent(slot, "kind cannot appear in a child chain"));
            }
        };
        Ok(index)
    }

    fn write_attributes(&self, store: &mut DeferredStore, slot: u32, index: StoreIndex) -> DomResult<()> {
        for &attr in self.tree[slot].data.attributes().unwrap_or_default() {
            let record = &self.tree[attr];
            if let NodeData::Attribute(a) = &record.data {
                let mut flags = AttrFlags::DEFAULT;
                if record.flags.has(NodeFlags::SPECIFIED) {
                    flags = flags | AttrFlags::SPECIFIED;
                }
                if record.flags.has(NodeFlags::ID) {
                    flags = flags | AttrFlags::ID;
                }
                store.add_attribute(index, a.name.qualified(), &a.value, a.name.namespace(), flags)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_new_document() {
        let mut doc = Document::new();
        let root = doc.document_node();
        assert_eq!(doc.node_kind(root).unwrap(), NodeKind::Document);
        assert_eq!(doc.node_name(root).unwrap(), "#document");
        assert_eq!(doc.document_element().unwrap(), None);
        assert_eq!(doc.parent_node(root).unwrap(), None);
        assert_eq!(doc.live_node_count(), 1);
    }

    #[test]
    fn test_names_and_namespaces() {
        let mut doc = Document::new();
        let el = doc.create_element_ns(Some("http://www.w3.org/2000/svg"), "svg:rect").unwrap();
        assert_eq!(doc.node_name(el).unwrap(), "svg:rect");
        assert_eq!(doc.local_name(el).unwrap().as_deref(), Some("rect"));
        assert_eq!(doc.prefix(el).unwrap().as_deref(), Some("svg"));
        assert_eq!(doc.lookup_namespace_uri(Some("svg")), Some("http://www.w3.org/2000/svg"));
        assert_eq!(doc.lookup_prefix("http://www.w3.org/2000/svg"), Some("svg"));
        assert_eq!(doc.lookup_namespace_uri(Some("xml")), Some(XML_NAMESPACE));
        assert_eq!(doc.lookup_namespace_uri(None), None);

        let text = doc.create_text_node("t");
        assert_eq!(doc.local_name(text).unwrap(), None);
    }

    #[test]
    fn test_set_node_value() {
        let mut doc = Document::new();
        let c = doc.create_comment("old");
        doc.set_node_value(c, "new").unwrap();
        assert_eq!(doc.node_value(c).unwrap().as_deref(), Some("new"));

        let el = doc.create_element("e").unwrap();
        doc.set_node_value(el, "ignored").unwrap();
        assert_eq!(doc.node_value(el).unwrap(), None);

        doc.set_read_only(c, false).unwrap();
        assert_eq!(doc.set_node_value(c, "x"), Err(DomError::ReadOnly));
    }

    #[test]
    fn test_text_content() {
        let mut doc = Document::new();
        let p = doc.create_element("p").unwrap();
        let a = doc.create_text_node("a");
        let em = doc.create_element("em").unwrap();
        let b = doc.create_cdata_section("b");
        let skip = doc.create_comment("skip");
        doc.append_child(p, a).unwrap();
        doc.append_child(p, em).unwrap();
        doc.append_child(em, b).unwrap();
        doc.append_child(p, skip).unwrap();
        assert_eq!(doc.text_content(p).unwrap().as_deref(), Some("ab"));
        assert_eq!(doc.text_content(skip).unwrap().as_deref(), Some("skip"));
        let root = doc.document_node();
        assert_eq!(doc.text_content(root).unwrap(), None);
    }

    #[test]
    fn test_clone_shallow_and_deep() {
        let mut doc = Document::new();
        let p = doc.create_element("p").unwrap();
        doc.set_attribute(p, "k", "v").unwrap();
        let t = doc.create_text_node("t");
        doc.append_child(p, t).unwrap();
        doc.set_read_only(p, true).unwrap();

        let shallow = doc.clone_node(p, false).unwrap();
        assert_ne!(shallow, p);
        assert!(!doc.has_child_nodes(shallow).unwrap());
        assert_eq!(doc.parent_node(shallow).unwrap(), None);
        assert_eq!(doc.get_attribute(shallow, "k").unwrap().as_deref(), Some("v"));
        assert!(!doc.is_read_only(shallow).unwrap());

        let deep = doc.clone_node(p, true).unwrap();
        let kids = doc.children(deep).unwrap();
        assert_eq!(kids.len(), 1);
        assert_ne!(kids[0], t);
        assert_eq!(doc.node_value(kids[0]).unwrap().as_deref(), Some("t"));
        assert!(!doc.is_read_only(kids[0]).unwrap());

        let root = doc.document_node();
        assert!(matches!(doc.clone_node(root, true), Err(DomError::NotSupported { .. })));
    }

    #[test]
    fn test_clone_drops_id_registration() {
        let mut doc = Document::new();
        let root = doc.document_node();
        let el = doc.create_element("e").unwrap();
        doc.append_child(root, el).unwrap();
        doc.set_attribute(el, "id", "x").unwrap();
        doc.set_id_attribute(el, "id", true).unwrap();

        let copy = doc.clone_node(el, false).unwrap();
        let attr = doc.get_attribute_node(copy, "id").unwrap().unwrap();
        assert!(!doc.is_id(attr).unwrap());
        assert_eq!(doc.get_element_by_id("x").unwrap(), Some(el));
    }

    #[test]
    fn test_import_copies_specified_only() {
        let mut src = Document::new();
        let def = src.create_element_definition("item").unwrap();
        src.set_default_attribute(def, "mode", "src-default").unwrap();
        let el = src.create_element("item").unwrap();
        src.set_attribute(el, "name", "n").unwrap();

        let mut dst = Document::new();
        let dst_def = dst.create_element_definition("item").unwrap();
        dst.set_default_attribute(dst_def, "lang", "en").unwrap();

        let imported = dst.import_node(&mut src, el, false).unwrap();
        assert_eq!(imported.owner_document(), dst.id());
        assert_eq!(dst.get_attribute(imported, "name").unwrap().as_deref(), Some("n"));
        assert_eq!(dst.get_attribute(imported, "mode").unwrap(), None);
        assert_eq!(dst.get_attribute(imported, "lang").unwrap().as_deref(), Some("en"));

        // Source is untouched
        assert_eq!(src.get_attribute(el, "mode").unwrap().as_deref(), Some("src-default"));

        let src_root = src.document_node();
        assert!(matches!(
            dst.import_node(&mut src, src_root, true),
            Err(DomError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_adopt_moves_subtree() {
        let mut src = Document::new();
        let src_root = src.document_node();
        let el = src.create_element("moved").unwrap();
        let child = src.create_text_node("c");
        src.append_child(src_root, el).unwrap();
        src.append_child(el, child).unwrap();

        let mut dst = Document::new();
        let adopted = dst.adopt_node(&mut src, el).unwrap();

        assert_eq!(src.children(src_root).unwrap(), Vec::<NodeId>::new());
        assert_eq!(src.node_kind(el), Err(DomError::NotFound));
        assert_eq!(src.node_kind(child), Err(DomError::NotFound));

        let kids = dst.children(adopted).unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(dst.node_value(kids[0]).unwrap().as_deref(), Some("c"));
        assert_eq!(dst.parent_node(adopted).unwrap(), None);
    }

    #[test]
    fn test_adopt_attribute_and_rejections() {
        let mut src = Document::new();
        let el = src.create_element("e").unwrap();
        src.set_attribute(el, "a", "1").unwrap();
        let attr = src.get_attribute_node(el, "a").unwrap().unwrap();

        let mut dst = Document::new();
        let adopted = dst.adopt_node(&mut src, attr).unwrap();
        assert_eq!(dst.owner_element(adopted).unwrap(), None);
        assert!(dst.is_specified(adopted).unwrap());
        assert!(!src.has_attribute(el, "a").unwrap());

        let note = src.create_notation("n", None, None).unwrap();
        assert_eq!(dst.adopt_node(&mut src, note), Err(DomError::ReadOnly));
        let src_root = src.document_node();
        assert!(matches!(dst.adopt_node(&mut src, src_root), Err(DomError::NotSupported { .. })));

        let locked = src.create_element("locked").unwrap();
        src.set_read_only(locked, false).unwrap();
        assert_eq!(dst.adopt_node(&mut src, locked), Err(DomError::ReadOnly));
        assert!(src.node_kind(locked).is_ok());
    }

    #[test]
    fn test_clone_document_is_independent() {
        let mut doc = Document::new();
        let root = doc.document_node();
        let el = doc.create_element("root").unwrap();
        doc.append_child(root, el).unwrap();
        doc.set_attribute(el, "id", "r").unwrap();
        doc.set_id_attribute(el, "id", true).unwrap();
        let def = doc.create_element_definition("root").unwrap();
        doc.set_default_attribute(def, "d", "1").unwrap();

        let mut copy = doc.clone_document().unwrap();
        let copied = copy.get_element_by_id("r").unwrap().unwrap();
        assert_eq!(copy.node_name(copied).unwrap(), "root");
        assert!(copy.element_definition("root").is_some());

        copy.remove_child(copy.document_node(), copied).unwrap();
        assert_eq!(doc.document_element().unwrap(), Some(el));
    }

    #[test]
    fn test_discard_recycles() {
        let mut doc = Document::new();
        let p = doc.create_element("p").unwrap();
        let t = doc.create_text_node("t");
        doc.append_child(p, t).unwrap();
        doc.length(p).unwrap();
        assert_eq!(doc.node_list_stats().caches_created, 1);

        assert!(matches!(doc.discard(t), Err(DomError::HierarchyViolation { .. })));
        doc.discard(p).unwrap();
        assert_eq!(doc.node_kind(t), Err(DomError::NotFound));
        assert_eq!(doc.live_node_count(), 1);

        let q = doc.create_element("q").unwrap();
        doc.length(q).unwrap();
        assert_eq!(doc.node_list_stats().caches_reused, 1);
    }

    #[test]
    fn test_type_info_blocks_persistence() {
        let mut doc = Document::new();
        let root = doc.document_node();
        let el = doc.create_element("e").unwrap();
        doc.append_child(root, el).unwrap();
        assert!(doc.to_store().is_ok());

        doc.set_type_info(el, Some(Rc::new("xs:string"))).unwrap();
        assert!(doc.type_info(el).unwrap().is_some());
        assert!(matches!(doc.to_store(), Err(DomError::NotSerializable)));

        let t = doc.create_text_node("t");
        assert!(matches!(doc.set_type_info(t, None), Err(DomError::InvalidNodeKind { .. })));
    }
}
