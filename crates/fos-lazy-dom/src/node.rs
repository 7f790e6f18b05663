//! DOM Node - arena record
//!
//! Every node kind shares one record layout: sibling linkage, an optional
//! first child, flags, the lazy-sync state and a kind-specific payload.
//! The kind is fixed by the payload variant chosen at creation and never
//! changes afterwards.

use crate::materialize::Materialization;
use crate::node_list::NodeListCache;
use crate::sibling::SiblingLink;
use crate::store::StoreIndex;
use crate::user_data::UserDataEntry;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Opaque type annotation attached by a schema layer.
///
/// The core only stores and copies it; a tree carrying annotations refuses
/// to be persisted.
pub type TypeInfo = Rc<dyn Any>;

/// Node kind, using the DOM numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    Element = 1,
    Attribute = 2,
    Text = 3,
    CData = 4,
    ProcessingInstruction = 7,
    Comment = 8,
    Document = 9,
    DocumentFragment = 11,
    Notation = 12,
    ElementDefinition = 21,
}

impl NodeKind {
    /// Kinds that own a child chain
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::Element | Self::Document | Self::DocumentFragment | Self::ElementDefinition
        )
    }

    /// Kinds that may sit in a sibling chain
    pub fn is_child_capable(self) -> bool {
        !matches!(self, Self::Attribute | Self::Document)
    }

    /// Kinds that carry character data
    pub fn is_character_data(self) -> bool {
        matches!(self, Self::Text | Self::CData | Self::Comment)
    }

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u8 as u32)
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Element),
            2 => Ok(Self::Attribute),
            3 => Ok(Self::Text),
            4 => Ok(Self::CData),
            7 => Ok(Self::ProcessingInstruction),
            8 => Ok(Self::Comment),
            9 => Ok(Self::Document),
            11 => Ok(Self::DocumentFragment),
            12 => Ok(Self::Notation),
            21 => Ok(Self::ElementDefinition),
            other => Err(other),
        }
    }
}

/// Qualified name with an optional namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QualName {
    qualified: String,
    /// Byte offset of the ':' separating prefix and local name
    colon: Option<usize>,
    namespace: Option<String>,
}

impl QualName {
    /// Split `qualified` into prefix and local parts
    pub fn new(qualified: &str, namespace: Option<&str>) -> Self {
        Self {
            qualified: qualified.to_string(),
            colon: qualified.find(':'),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
        }
    }

    /// Full `prefix:local` name
    pub fn qualified(&self) -> &str {
        &self.qualified
    }

    pub fn prefix(&self) -> Option<&str> {
        self.colon.map(|c| &self.qualified[..c])
    }

    pub fn local_name(&self) -> &str {
        match self.colon {
            Some(c) => &self.qualified[c + 1..],
            None => &self.qualified,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for QualName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified)
    }
}

/// Node flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct NodeFlags(u8);

impl NodeFlags {
    pub const READ_ONLY: u8 = 0x01;
    /// Attribute was given explicitly rather than defaulted
    pub const SPECIFIED: u8 = 0x02;
    /// Attribute is of ID type
    pub const ID: u8 = 0x04;
    /// Text is whitespace the schema marked as ignorable
    pub const IGNORABLE_WHITESPACE: u8 = 0x08;

    #[inline]
    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    #[inline]
    pub fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    #[inline]
    pub fn with(mut self, flag: u8, on: bool) -> Self {
        self.set(flag, on);
        self
    }
}

/// Element (and element definition) payload
#[derive(Debug, Clone, Default)]
pub(crate) struct ElementData {
    pub name: QualName,
    /// Attribute slots in document order
    pub attributes: Vec<u32>,
}

/// Attribute payload
#[derive(Debug, Clone, Default)]
pub(crate) struct AttrData {
    pub name: QualName,
    pub value: String,
    pub owner: Option<u32>,
}

/// Notation payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NotationData {
    pub name: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub base_uri: Option<String>,
}

/// Node-specific data
#[derive(Debug, Clone)]
pub(crate) enum NodeData {
    Document,
    DocumentFragment,
    Element(ElementData),
    Attribute(AttrData),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    Notation(NotationData),
    ElementDefinition(ElementData),
}

impl NodeData {
    /// Empty payload of the given kind, filled in later by synchronization
    pub fn placeholder(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Document => Self::Document,
            NodeKind::DocumentFragment => Self::DocumentFragment,
            NodeKind::Element => Self::Element(ElementData::default()),
            NodeKind::Attribute => Self::Attribute(AttrData::default()),
            NodeKind::Text => Self::Text(String::new()),
            NodeKind::CData => Self::CData(String::new()),
            NodeKind::Comment => Self::Comment(String::new()),
            NodeKind::ProcessingInstruction => Self::ProcessingInstruction {
                target: String::new(),
                data: String::new(),
            },
            NodeKind::Notation => Self::Notation(NotationData::default()),
            NodeKind::ElementDefinition => Self::ElementDefinition(ElementData::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Document => NodeKind::Document,
            Self::DocumentFragment => NodeKind::DocumentFragment,
            Self::Element(_) => NodeKind::Element,
            Self::Attribute(_) => NodeKind::Attribute,
            Self::Text(_) => NodeKind::Text,
            Self::CData(_) => NodeKind::CData,
            Self::Comment(_) => NodeKind::Comment,
            Self::ProcessingInstruction { .. } => NodeKind::ProcessingInstruction,
            Self::Notation(_) => NodeKind::Notation,
            Self::ElementDefinition(_) => NodeKind::ElementDefinition,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Document => "#document",
            Self::DocumentFragment => "#document-fragment",
            Self::Element(e) | Self::ElementDefinition(e) => e.name.qualified(),
            Self::Attribute(a) => a.name.qualified(),
            Self::Text(_) => "#text",
            Self::CData(_) => "#cdata-section",
            Self::Comment(_) => "#comment",
            Self::ProcessingInstruction { target, .. } => target,
            Self::Notation(n) => &n.name,
        }
    }

    pub fn qual_name(&self) -> Option<&QualName> {
        match self {
            Self::Element(e) | Self::ElementDefinition(e) => Some(&e.name),
            Self::Attribute(a) => Some(&a.name),
            _ => None,
        }
    }

    /// Rename an element or attribute; returns false for other kinds
    pub fn set_qual_name(&mut self, name: QualName) -> bool {
        match self {
            Self::Element(e) | Self::ElementDefinition(e) => e.name = name,
            Self::Attribute(a) => a.name = name,
            _ => return false,
        }
        true
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Attribute(a) => Some(&a.value),
            Self::Text(s) | Self::CData(s) | Self::Comment(s) => Some(s),
            Self::ProcessingInstruction { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Replace the value; returns false for kinds without one
    pub fn set_value(&mut self, value: &str) -> bool {
        let slot = match self {
            Self::Attribute(a) => &mut a.value,
            Self::Text(s) | Self::CData(s) | Self::Comment(s) => s,
            Self::ProcessingInstruction { data, .. } => data,
            _ => return false,
        };
        slot.clear();
        slot.push_str(value);
        true
    }

    pub fn attributes(&self) -> Option<&[u32]> {
        match self {
            Self::Element(e) | Self::ElementDefinition(e) => Some(&e.attributes),
            _ => None,
        }
    }

    pub fn attributes_mut(&mut self) -> Option<&mut Vec<u32>> {
        match self {
            Self::Element(e) | Self::ElementDefinition(e) => Some(&mut e.attributes),
            _ => None,
        }
    }
}

/// DOM Node - arena record
#[derive(Debug)]
pub(crate) struct NodeRecord {
    pub data: NodeData,
    pub link: SiblingLink,
    /// First child; the first child's `prev` holds the last child
    pub first_child: Option<u32>,
    pub flags: NodeFlags,
    pub state: Materialization,
    /// Store entry this node expands from
    pub origin: Option<StoreIndex>,
    pub list_cache: Option<Box<NodeListCache>>,
    pub type_info: Option<TypeInfo>,
    pub user_data: HashMap<String, UserDataEntry>,
}

impl NodeRecord {
    /// Fully populated node built through the mutation API
    pub fn new(data: NodeData) -> Self {
        let flags = NodeFlags::default().with(
            NodeFlags::SPECIFIED,
            matches!(data, NodeData::Attribute(_)),
        );
        Self {
            data,
            link: SiblingLink::default(),
            first_child: None,
            flags,
            state: Materialization::ChildrenSynced,
            origin: None,
            list_cache: None,
            type_info: None,
            user_data: HashMap::new(),
        }
    }

    /// Placeholder for a store entry that has not been touched yet
    pub fn deferred(kind: NodeKind, origin: StoreIndex) -> Self {
        Self {
            data: NodeData::placeholder(kind),
            link: SiblingLink::default(),
            first_child: None,
            flags: NodeFlags::default(),
            state: Materialization::Unmaterialized,
            origin: Some(origin),
            list_cache: None,
            type_info: None,
            user_data: HashMap::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qual_name_split() {
        let name = QualName::new("svg:rect", Some("http://www.w3.org/2000/svg"));
        assert_eq!(name.prefix(), Some("svg"));
        assert_eq!(name.local_name(), "rect");
        assert_eq!(name.namespace(), Some("http://www.w3.org/2000/svg"));

        let plain = QualName::new("div", Some(""));
        assert_eq!(plain.prefix(), None);
        assert_eq!(plain.local_name(), "div");
        assert_eq!(plain.namespace(), None);
    }

    #[test]
    fn test_kind_codes() {
        for kind in [
            NodeKind::Element,
            NodeKind::Attribute,
            NodeKind::Text,
            NodeKind::CData,
            NodeKind::ProcessingInstruction,
            NodeKind::Comment,
            NodeKind::Document,
            NodeKind::DocumentFragment,
            NodeKind::Notation,
            NodeKind::ElementDefinition,
        ] {
            assert_eq!(NodeKind::try_from(kind as u8), Ok(kind));
            assert_eq!(NodeData::placeholder(kind).kind(), kind);
        }
        assert_eq!(NodeKind::try_from(5), Err(5));
        assert!(NodeKind::CData.is_character_data());
        assert!(!NodeKind::ProcessingInstruction.is_character_data());
    }

    #[test]
    fn test_names_and_values() {
        assert_eq!(NodeData::Text("hi".into()).name(), "#text");
        assert_eq!(NodeData::Comment("c".into()).value(), Some("c"));
        assert_eq!(NodeData::Document.value(), None);

        let mut pi = NodeData::ProcessingInstruction {
            target: "xml-stylesheet".into(),
            data: "a".into(),
        };
        assert!(pi.set_value("b"));
        assert_eq!(pi.value(), Some("b"));
        assert!(!NodeData::DocumentFragment.set_value("x"));
    }

    #[test]
    fn test_flags() {
        let mut flags = NodeFlags::default();
        flags.set(NodeFlags::ID, true);
        assert!(flags.has(NodeFlags::ID));
        assert!(!flags.has(NodeFlags::READ_ONLY));
        flags.set(NodeFlags::ID, false);
        assert_eq!(flags, NodeFlags::default());
    }
}
