//! Deferred Store
//!
//! Compact, column-oriented encoding of a parsed document. The parser
//! appends one entry per node; the DOM reads entries back when it
//! materializes nodes on first access.
//!
//! Per entry the store keeps a kind tag, name, value and namespace URI
//! (interned), a kind-dependent `extra` word, and parent / first-child /
//! last-child / next-sibling links. `extra` means:
//!
//! | kind               | extra                                               |
//! |--------------------|-----------------------------------------------------|
//! | element/definition | first attribute entry (attributes chain by sibling) |
//! | attribute          | [`AttrFlags`] bits                                  |
//! | text               | 1 if ignorable whitespace                           |
//! | notation           | auxiliary entry: value = system id, name = base URI |
//!
//! An element's attribute chain holds what the parser saw, defaulted
//! attributes included when it chose to write them. Defaults declared on a
//! definition but missing from an element's chain are added when the
//! element materializes.

use crate::interner::{InternedString, StringInterner};
use crate::{DomError, DomResult, NodeKind};
use serde::{Deserialize, Serialize};

const NIL: u32 = u32::MAX;
/// Kind tag of auxiliary entries that hold overflow data for another entry
const AUX: u8 = 0;

/// Opaque index of a store entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreIndex(pub(crate) u32);

impl StoreIndex {
    pub fn value(self) -> u32 {
        self.0
    }
}

/// Attribute flag bits stored in `extra`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrFlags(pub u32);

impl AttrFlags {
    /// Given explicitly in the markup
    pub const SPECIFIED: AttrFlags = AttrFlags(0x1);
    /// Of ID type
    pub const ID: AttrFlags = AttrFlags(0x2);
    /// Supplied by a schema default
    pub const DEFAULT: AttrFlags = AttrFlags(0x0);

    pub fn contains(self, other: AttrFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_specified(self) -> bool {
        self.contains(Self::SPECIFIED)
    }

    pub fn is_id(self) -> bool {
        self.contains(Self::ID)
    }
}

impl std::ops::BitOr for AttrFlags {
    type Output = AttrFlags;

    fn bitor(self, rhs: AttrFlags) -> AttrFlags {
        AttrFlags(self.0 | rhs.0)
    }
}

/// Flat, array-based document encoding
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeferredStore {
    kinds: Vec<u8>,
    names: Vec<u32>,
    values: Vec<u32>,
    uris: Vec<u32>,
    extras: Vec<u32>,
    parents: Vec<u32>,
    first_children: Vec<u32>,
    last_children: Vec<u32>,
    next_siblings: Vec<u32>,
    strings: StringInterner,
    root: Option<StoreIndex>,
    /// Element definitions, in declaration order
    definitions: Vec<StoreIndex>,
    /// (id value, element) pairs for ID-typed attributes
    identifiers: Vec<(InternedString, StoreIndex)>,
}

impl DeferredStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, auxiliary ones included
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Document entry, if one was created
    pub fn root(&self) -> Option<StoreIndex> {
        self.root
    }

    pub fn definitions(&self) -> &[StoreIndex] {
        &self.definitions
    }

    // -- building ----------------------------------------------------------

    fn push(&mut self, kind: u8, name: Option<&str>, value: Option<&str>, uri: Option<&str>, extra: u32) -> StoreIndex {
        let index = StoreIndex(self.kinds.len() as u32);
        let name = self.intern(name);
        let value = self.intern(value);
        let uri = self.intern(uri.filter(|u| !u.is_empty()));
        self.kinds.push(kind);
        self.names.push(name);
        self.values.push(value);
        self.uris.push(uri);
        self.extras.push(extra);
        self.parents.push(NIL);
        self.first_children.push(NIL);
        self.last_children.push(NIL);
        self.next_siblings.push(NIL);
        index
    }

    fn intern(&mut self, s: Option<&str>) -> u32 {
        match s {
            Some(s) => self.strings.intern(s).0,
            None => NIL,
        }
    }

    /// Create the document entry; a store has exactly one
    pub fn create_document(&mut self) -> StoreIndex {
        if let Some(root) = self.root {
            return root;
        }
        let index = self.push(NodeKind::Document as u8, None, None, None, NIL);
        self.root = Some(index);
        index
    }

    pub fn create_element(&mut self, name: &str, namespace: Option<&str>) -> StoreIndex {
        self.push(NodeKind::Element as u8, Some(name), None, namespace, NIL)
    }

    pub fn create_text(&mut self, data: &str, ignorable_whitespace: bool) -> StoreIndex {
        self.push(NodeKind::Text as u8, None, Some(data), None, ignorable_whitespace as u32)
    }

    pub fn create_cdata(&mut self, data: &str) -> StoreIndex {
        self.push(NodeKind::CData as u8, None, Some(data), None, NIL)
    }

    pub fn create_comment(&mut self, data: &str) -> StoreIndex {
        self.push(NodeKind::Comment as u8, None, Some(data), None, NIL)
    }

    pub fn create_processing_instruction(&mut self, target: &str, data: &str) -> StoreIndex {
        self.push(NodeKind::ProcessingInstruction as u8, Some(target), Some(data), None, NIL)
    }

    pub fn create_document_fragment(&mut self) -> StoreIndex {
        self.push(NodeKind::DocumentFragment as u8, None, None, None, NIL)
    }

    pub fn create_notation(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        base_uri: Option<&str>,
    ) -> StoreIndex {
        let aux = self.push(AUX, base_uri, system_id, None, NIL);
        self.push(NodeKind::Notation as u8, Some(name), public_id, None, aux.0)
    }

    /// Declare an element definition; its attributes are the defaults
    pub fn create_element_definition(&mut self, name: &str) -> StoreIndex {
        let index = self.push(NodeKind::ElementDefinition as u8, Some(name), None, None, NIL);
        self.definitions.push(index);
        index
    }

    /// Kind of an entry the builder is about to link; out-of-range
    /// indices are caller errors rather than store corruption
    fn builder_kind(&self, index: StoreIndex) -> DomResult<NodeKind> {
        if index.0 as usize >= self.kinds.len() {
            return Err(DomError::NotFound);
        }
        self.kind(index)
    }

    /// Append an attribute to an element's (or definition's) attribute chain
    pub fn add_attribute(
        &mut self,
        owner: StoreIndex,
        name: &str,
        value: &str,
        namespace: Option<&str>,
        flags: AttrFlags,
    ) -> DomResult<StoreIndex> {
        match self.builder_kind(owner)? {
            NodeKind::Element | NodeKind::ElementDefinition => {}
            actual => {
                return Err(DomError::InvalidNodeKind {
                    expected: "element",
                    actual,
                });
            }
        }
        // Find the chain tail before pushing so a bad chain adds nothing
        let mut tail = None;
        let mut cursor = self.first_attribute(owner)?;
        while let Some(attr) = cursor {
            tail = Some(attr);
            cursor = self.next_sibling(attr)?;
        }

        let attr = self.push(NodeKind::Attribute as u8, Some(name), Some(value), namespace, flags.0);
        self.parents[attr.0 as usize] = owner.0;
        match tail {
            None => self.extras[owner.0 as usize] = attr.0,
            Some(last) => self.next_siblings[last.0 as usize] = attr.0,
        }
        if flags.is_id() {
            let id = self.strings.intern(value);
            self.identifiers.push((id, owner));
        }
        Ok(attr)
    }

    /// Append `child` as the last child of `parent`
    pub fn append_child(&mut self, parent: StoreIndex, child: StoreIndex) -> DomResult<()> {
        if !self.builder_kind(parent)?.is_container() {
            return Err(DomError::hierarchy("entry cannot have children"));
        }
        if !self.builder_kind(child)?.is_child_capable() {
            return Err(DomError::hierarchy("entry cannot be a child"));
        }
        let (p, c) = (parent.0 as usize, child.0 as usize);
        if self.parents[c] != NIL {
            return Err(DomError::hierarchy("entry already has a parent"));
        }
        self.parents[c] = parent.0;
        match self.last_children[p] {
            NIL => self.first_children[p] = child.0,
            last => self.next_siblings[last as usize] = child.0,
        }
        self.last_children[p] = child.0;
        Ok(())
    }

    /// Check the shape of a store that did not come from this builder,
    /// e.g. one loaded through serde. Individual links are still checked
    /// when they are read.
    pub fn validate(&self) -> DomResult<()> {
        let len = self.kinds.len();
        let columns = [
            self.names.len(),
            self.values.len(),
            self.uris.len(),
            self.extras.len(),
            self.parents.len(),
            self.first_children.len(),
            self.last_children.len(),
            self.next_siblings.len(),
        ];
        if let Some(&short) = columns.iter().find(|&&n| n != len) {
            return Err(DomError::inconsistent(short.min(len) as u32, "store columns differ in length"));
        }
        let referenced = self
            .root
            .iter()
            .chain(&self.definitions)
            .chain(self.identifiers.iter().map(|(_, element)| element));
        for &index in referenced {
            self.check(index)?;
        }
        Ok(())
    }

    // -- reading -----------------------------------------------------------

    fn check(&self, index: StoreIndex) -> DomResult<usize> {
        let i = index.0 as usize;
        if i < self.kinds.len() {
            Ok(i)
        } else {
            Err(DomError::inconsistent(index.0, "index out of range"))
        }
    }

    /// Cell of a column; a column shorter than `kinds` is corruption
    fn cell(&self, column: &[u32], index: StoreIndex) -> DomResult<u32> {
        let i = self.check(index)?;
        column
            .get(i)
            .copied()
            .ok_or_else(|| DomError::inconsistent(index.0, "column shorter than the entry table"))
    }

    fn link(&self, column: &[u32], index: StoreIndex) -> DomResult<Option<StoreIndex>> {
        Ok(match self.cell(column, index)? {
            NIL => None,
            next => Some(StoreIndex(next)),
        })
    }

    fn string(&self, id: u32, index: StoreIndex) -> DomResult<Option<&str>> {
        if id == NIL {
            return Ok(None);
        }
        self.strings
            .get(InternedString(id))
            .map(Some)
            .ok_or_else(|| DomError::inconsistent(index.0, "string id out of range"))
    }

    pub fn kind(&self, index: StoreIndex) -> DomResult<NodeKind> {
        let i = self.check(index)?;
        NodeKind::try_from(self.kinds[i]).map_err(|_| DomError::inconsistent(index.0, "not a node entry"))
    }

    pub fn name(&self, index: StoreIndex) -> DomResult<Option<&str>> {
        self.string(self.cell(&self.names, index)?, index)
    }

    pub fn value(&self, index: StoreIndex) -> DomResult<Option<&str>> {
        self.string(self.cell(&self.values, index)?, index)
    }

    pub fn namespace(&self, index: StoreIndex) -> DomResult<Option<&str>> {
        self.string(self.cell(&self.uris, index)?, index)
    }

    /// Raw kind-dependent extra word
    pub fn extra(&self, index: StoreIndex) -> DomResult<u32> {
        self.cell(&self.extras, index)
    }

    pub fn parent(&self, index: StoreIndex) -> DomResult<Option<StoreIndex>> {
        self.link(&self.parents, index)
    }

    pub fn first_child(&self, index: StoreIndex) -> DomResult<Option<StoreIndex>> {
        self.link(&self.first_children, index)
    }

    pub fn next_sibling(&self, index: StoreIndex) -> DomResult<Option<StoreIndex>> {
        self.link(&self.next_siblings, index)
    }

    /// First entry of an element's attribute chain
    pub fn first_attribute(&self, index: StoreIndex) -> DomResult<Option<StoreIndex>> {
        match self.kind(index)? {
            NodeKind::Element | NodeKind::ElementDefinition => self.link(&self.extras, index),
            _ => Ok(None),
        }
    }

    pub fn attr_flags(&self, index: StoreIndex) -> DomResult<AttrFlags> {
        Ok(AttrFlags(self.extra(index)?))
    }

    pub fn is_ignorable_whitespace(&self, index: StoreIndex) -> DomResult<bool> {
        Ok(self.kind(index)? == NodeKind::Text && self.extra(index)? == 1)
    }

    /// (system id, base URI) of a notation, read through its auxiliary entry
    pub fn notation_details(&self, index: StoreIndex) -> DomResult<(Option<&str>, Option<&str>)> {
        let aux = StoreIndex(self.extra(index)?);
        let i = self.check(aux)?;
        if self.kinds[i] != AUX {
            return Err(DomError::inconsistent(aux.0, "notation extra is not an auxiliary entry"));
        }
        Ok((self.value(aux)?, self.name(aux)?))
    }

    /// Element carrying the given ID value
    pub fn identifier(&self, id: &str) -> Option<StoreIndex> {
        let id = self.strings.lookup(id)?;
        self.identifiers
            .iter()
            .rev()
            .find(|(value, _)| *value == id)
            .map(|&(_, element)| element)
    }

    pub fn strings(&self) -> &StringInterner {
        &self.strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_chain_order() {
        let mut store = DeferredStore::new();
        let doc = store.create_document();
        let root = store.create_element("root", None);
        store.append_child(doc, root).unwrap();
        let a = store.create_text("a", false);
        let b = store.create_comment("b");
        store.append_child(root, a).unwrap();
        store.append_child(root, b).unwrap();

        assert_eq!(store.root(), Some(doc));
        assert_eq!(store.first_child(root).unwrap(), Some(a));
        assert_eq!(store.next_sibling(a).unwrap(), Some(b));
        assert_eq!(store.next_sibling(b).unwrap(), None);
        assert_eq!(store.parent(b).unwrap(), Some(root));
        assert_eq!(store.kind(b).unwrap(), NodeKind::Comment);
    }

    #[test]
    fn test_attribute_chain_and_flags() {
        let mut store = DeferredStore::new();
        let el = store.create_element("p:item", Some("urn:p"));
        let z = store.add_attribute(el, "z", "1", None, AttrFlags::SPECIFIED).unwrap();
        let a = store.add_attribute(el, "a", "k1", None, AttrFlags::SPECIFIED | AttrFlags::ID).unwrap();
        let d = store.add_attribute(el, "d", "dflt", None, AttrFlags::DEFAULT).unwrap();

        assert_eq!(store.first_attribute(el).unwrap(), Some(z));
        assert_eq!(store.next_sibling(z).unwrap(), Some(a));
        assert_eq!(store.next_sibling(a).unwrap(), Some(d));
        assert!(store.attr_flags(a).unwrap().is_id());
        assert!(!store.attr_flags(d).unwrap().is_specified());
        assert_eq!(store.identifier("k1"), Some(el));
        assert_eq!(store.identifier("nope"), None);
        assert_eq!(store.namespace(el).unwrap(), Some("urn:p"));
    }

    #[test]
    fn test_notation_aux_entry() {
        let mut store = DeferredStore::new();
        let n = store.create_notation("gif", Some("-//GIF"), Some("gif.exe"), Some("http://base/"));
        assert_eq!(store.kind(n).unwrap(), NodeKind::Notation);
        assert_eq!(store.value(n).unwrap(), Some("-//GIF"));
        assert_eq!(store.notation_details(n).unwrap(), (Some("gif.exe"), Some("http://base/")));
    }

    #[test]
    fn test_out_of_range_is_internal_error() {
        let store = DeferredStore::new();
        let err = store.kind(StoreIndex(3)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_whitespace_flag() {
        let mut store = DeferredStore::new();
        let ws = store.create_text("  ", true);
        let text = store.create_text("x", false);
        assert!(store.is_ignorable_whitespace(ws).unwrap());
        assert!(!store.is_ignorable_whitespace(text).unwrap());
    }

    #[test]
    fn test_builder_rejects_bad_links() {
        let mut store = DeferredStore::new();
        let doc = store.create_document();
        let el = store.create_element("e", None);
        let text = store.create_text("t", true);

        assert!(matches!(
            store.add_attribute(text, "a", "v", None, AttrFlags::SPECIFIED),
            Err(DomError::InvalidNodeKind { .. })
        ));
        assert_eq!(
            store.add_attribute(StoreIndex(40), "a", "v", None, AttrFlags::SPECIFIED),
            Err(DomError::NotFound)
        );
        // The whitespace flag of the text entry is untouched
        assert!(store.is_ignorable_whitespace(text).unwrap());

        assert!(store.append_child(text, el).is_err());
        assert!(store.append_child(el, doc).is_err());
        store.append_child(doc, el).unwrap();
        assert!(matches!(
            store.append_child(doc, el),
            Err(DomError::HierarchyViolation { .. })
        ));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_validate_column_lengths() {
        let mut store = DeferredStore::new();
        let doc = store.create_document();
        let el = store.create_element("e", None);
        store.append_child(doc, el).unwrap();
        assert!(store.validate().is_ok());

        store.names.truncate(1);
        assert!(store.validate().unwrap_err().is_fatal());
        assert!(store.name(el).unwrap_err().is_fatal());
        assert_eq!(store.name(doc).unwrap(), None);
    }
}
