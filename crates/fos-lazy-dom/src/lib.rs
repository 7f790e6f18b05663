//! fOS Lazy DOM - Document Object Model with deferred construction
//!
//! Nodes live in a per-document arena and are linked into parent/sibling
//! chains. A document can be built eagerly through the mutation API or
//! from a [`DeferredStore`] produced by the parser, in which case nodes are
//! expanded the first time they are touched.
//!
//! A [`Document`] is single-threaded: it is neither `Send` nor `Sync`, and
//! callers sharing one across threads must provide their own
//! synchronization around a wrapper type.

mod attributes;
mod document;
mod error;
mod generation;
mod interner;
mod materialize;
mod names;
mod node;
mod node_list;
mod observer;
mod operations;
mod pool;
mod sibling;
mod store;
mod tree;
mod user_data;

pub use document::Document;
pub use error::{DomError, DomResult};
pub use generation::Generation;
pub use interner::{InternedString, StringInterner};
pub use materialize::Materialization;
pub use names::{is_nc_name, is_xml_name};
pub use node::{NodeKind, QualName, TypeInfo};
pub use node_list::{NodeList, NodeListStats};
pub use observer::{MutationRecord, MutationType, Suppression};
pub use operations::ChildPolicy;
pub use pool::{Pool, PoolStats};
pub use store::{AttrFlags, DeferredStore, StoreIndex};
pub use user_data::{UserData, UserDataHandler, UserDataOperation};

use std::sync::atomic::{AtomicU32, Ordering};

/// Namespace bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
/// Namespace bound to the `xmlns` prefix.
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Identity of a document; every node belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(u32);

impl DocumentId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        DocumentId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Node identifier (slot in the owning document's arena)
///
/// Ids are cheap handles. An id whose slot has since been discarded and
/// reused no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) doc: DocumentId,
    pub(crate) slot: u32,
    pub(crate) generation: Generation,
}

impl NodeId {
    /// Document this node belongs to
    pub fn owner_document(&self) -> DocumentId {
        self.doc
    }
}
