//! DOM errors
//!
//! Mutation errors are raised before any change is applied, so a failed
//! call leaves the tree exactly as it was.

use crate::NodeKind;
use thiserror::Error;

/// Result type for DOM operations
pub type DomResult<T> = Result<T, DomError>;

/// DOM operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    /// Insertion would create a cycle or place a node where its kind is not allowed
    #[error("hierarchy violation: {reason}")]
    HierarchyViolation { reason: &'static str },

    /// Node belongs to another document and has not been imported
    #[error("node belongs to a different document")]
    WrongDocument,

    /// Reference node is not where the caller said it is, or the id is stale
    #[error("node not found")]
    NotFound,

    /// Target (or one of its ancestors) is read-only
    #[error("node is read-only")]
    ReadOnly,

    /// Operation is not defined for this node
    #[error("operation not supported: {operation}")]
    NotSupported { operation: &'static str },

    /// Element-only or attribute-only operation called on another kind
    #[error("invalid node kind: expected {expected}, got {actual:?}")]
    InvalidNodeKind { expected: &'static str, actual: NodeKind },

    /// Name does not match the XML `Name` production
    #[error("invalid character in name {name:?}")]
    InvalidCharacter { name: String },

    /// Qualified name and namespace do not agree
    #[error("namespace error: {reason}")]
    Namespace { reason: &'static str },

    /// Tree carries data that may not be persisted
    #[error("tree carries type annotations and cannot be serialized")]
    NotSerializable,

    /// Deferred store is malformed (upstream parser bug)
    #[error("deferred store is inconsistent at index {index}: {reason}")]
    InternalConsistency { index: u32, reason: &'static str },
}

impl DomError {
    pub(crate) fn hierarchy(reason: &'static str) -> Self {
        Self::HierarchyViolation { reason }
    }

    pub(crate) fn namespace(reason: &'static str) -> Self {
        Self::Namespace { reason }
    }

    pub(crate) fn inconsistent(index: u32, reason: &'static str) -> Self {
        tracing::warn!(index, reason, "deferred store inconsistency");
        Self::InternalConsistency { index, reason }
    }

    /// True for errors that indicate a broken store rather than misuse
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InternalConsistency { .. })
    }
}
