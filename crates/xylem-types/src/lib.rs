pub mod compression;
pub mod config;
pub mod node;
pub mod qname;

pub use config::{Consistency, HashKind, ResourceConfig};
pub use node::{
    NameDelegate, Node, NodeBody, NodeDelegate, NodeKind, StructDelegate, ValueDelegate,
};
pub use qname::QName;

use std::fmt;

/// A node key in the tree.
///
/// Keys are allocated monotonically from the revision root page and are
/// stable for the lifetime of the node. Key 0 is the document root. Absent
/// links are represented as `Option<NodeKey>` rather than a sentinel value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct NodeKey(u64);

impl NodeKey {
    /// The document root lives at key 0 in every revision.
    pub const DOCUMENT_ROOT: Self = Self(0);

    /// Create a node key from a raw u64.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The key following this one in allocation order.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether this is the document root key.
    #[inline]
    pub const fn is_document_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 32-bit name-dictionary key: the hash of a qualified-name string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct NameKey(u32);

impl NameKey {
    /// Create a name key from a raw u32 hash.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A committed revision number.
///
/// Revision 0 is the bootstrap snapshot holding only the document root.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The bootstrap revision.
    pub const BOOTSTRAP: Self = Self(0);

    /// Create a revision from a raw u64.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The revision following this one.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A transaction identifier, unique per session.
pub type TrxId = u64;

/// The root page of one revision, published atomically on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UberPage {
    /// Revision this uber page roots.
    pub revision: Revision,
    /// Whether this is still the bootstrap uber page (no user commit yet).
    pub is_bootstrap: bool,
    /// Highest node key allocated in this revision.
    pub max_node_key: NodeKey,
}
