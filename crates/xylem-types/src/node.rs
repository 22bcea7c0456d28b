//! Typed node records for the five node kinds.
//!
//! Every node shares a [`NodeDelegate`] (key, parent link, subtree hash).
//! Structural kinds add a [`StructDelegate`], named kinds a [`NameDelegate`],
//! valued kinds a [`ValueDelegate`]. Kind dispatch is by the [`NodeBody`]
//! tag; capability queries (`is_structural`, ...) are tag-membership
//! predicates. The model is purely in-memory — persistence and copy-on-write
//! belong to the page layer.

use std::collections::HashMap;

use crate::{NameKey, NodeKey};

/// The five node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    /// The document root; key 0, at most one element child.
    DocumentRoot,
    /// An element with attributes, namespaces and structural children.
    Element,
    /// A text node carrying an opaque byte value.
    Text,
    /// An attribute on an element.
    Attribute,
    /// A namespace declaration on an element.
    Namespace,
}

impl NodeKind {
    /// Whether nodes of this kind participate in the sibling/child structure.
    #[inline]
    pub const fn is_structural(self) -> bool {
        matches!(self, Self::DocumentRoot | Self::Element | Self::Text)
    }

    /// Whether nodes of this kind carry dictionary name references.
    #[inline]
    pub const fn is_named(self) -> bool {
        matches!(self, Self::Element | Self::Attribute | Self::Namespace)
    }

    /// Whether nodes of this kind carry a byte value.
    #[inline]
    pub const fn is_valued(self) -> bool {
        matches!(self, Self::Text | Self::Attribute)
    }

    /// Lower-case label for diagnostics and error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DocumentRoot => "document-root",
            Self::Element => "element",
            Self::Text => "text",
            Self::Attribute => "attribute",
            Self::Namespace => "namespace",
        }
    }
}

/// Fields every node owns: its key, its parent link, its subtree hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDelegate {
    /// This node's key; stable for the lifetime of the node.
    pub key: NodeKey,
    /// Parent key; `None` only for the document root.
    pub parent: Option<NodeKey>,
    /// Subtree hash under the resource's hash kind; 0 when hashing is off.
    pub hash: u64,
}

/// Link and count fields of structural nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructDelegate {
    /// First child in document order.
    pub first_child: Option<NodeKey>,
    /// Left sibling.
    pub left_sibling: Option<NodeKey>,
    /// Right sibling.
    pub right_sibling: Option<NodeKey>,
    /// Number of direct structural children.
    pub child_count: u64,
    /// Number of structural descendants, excluding the node itself.
    pub descendant_count: u64,
}

/// Name-dictionary references of named nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameDelegate {
    /// Dictionary key of the qualified name (prefix:local).
    pub name_key: NameKey,
    /// Dictionary key of the namespace URI.
    pub uri_key: NameKey,
}

/// Byte value of valued nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueDelegate {
    /// Opaque value bytes (UTF-8 text, possibly deflated).
    pub value: Vec<u8>,
    /// Whether `value` holds deflated bytes.
    pub compressed: bool,
}

/// Per-kind extension fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    DocumentRoot {
        structure: StructDelegate,
    },
    Element {
        structure: StructDelegate,
        name: NameDelegate,
        /// Attribute node keys in insertion order.
        attributes: Vec<NodeKey>,
        /// Attribute lookup by name hash; unique per element.
        attribute_names: HashMap<NameKey, NodeKey>,
        /// Namespace node keys in insertion order.
        namespaces: Vec<NodeKey>,
    },
    Text {
        structure: StructDelegate,
        value: ValueDelegate,
    },
    Attribute {
        name: NameDelegate,
        value: ValueDelegate,
    },
    Namespace {
        name: NameDelegate,
    },
}

/// A node record: shared delegate plus kind-specific extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    delegate: NodeDelegate,
    body: NodeBody,
}

impl Node {
    /// The document root node of a fresh resource.
    pub fn document_root() -> Self {
        Self {
            delegate: NodeDelegate {
                key: NodeKey::DOCUMENT_ROOT,
                parent: None,
                hash: 0,
            },
            body: NodeBody::DocumentRoot {
                structure: StructDelegate::default(),
            },
        }
    }

    /// A fresh element node with empty attribute/namespace lists.
    pub fn element(
        key: NodeKey,
        parent: NodeKey,
        left_sibling: Option<NodeKey>,
        right_sibling: Option<NodeKey>,
        name: NameDelegate,
    ) -> Self {
        Self {
            delegate: NodeDelegate {
                key,
                parent: Some(parent),
                hash: 0,
            },
            body: NodeBody::Element {
                structure: StructDelegate {
                    first_child: None,
                    left_sibling,
                    right_sibling,
                    child_count: 0,
                    descendant_count: 0,
                },
                name,
                attributes: Vec::new(),
                attribute_names: HashMap::new(),
                namespaces: Vec::new(),
            },
        }
    }

    /// A fresh text node.
    pub fn text(
        key: NodeKey,
        parent: NodeKey,
        left_sibling: Option<NodeKey>,
        right_sibling: Option<NodeKey>,
        value: ValueDelegate,
    ) -> Self {
        Self {
            delegate: NodeDelegate {
                key,
                parent: Some(parent),
                hash: 0,
            },
            body: NodeBody::Text {
                structure: StructDelegate {
                    first_child: None,
                    left_sibling,
                    right_sibling,
                    child_count: 0,
                    descendant_count: 0,
                },
                value,
            },
        }
    }

    /// A fresh attribute node.
    pub fn attribute(key: NodeKey, parent: NodeKey, name: NameDelegate, value: ValueDelegate) -> Self {
        Self {
            delegate: NodeDelegate {
                key,
                parent: Some(parent),
                hash: 0,
            },
            body: NodeBody::Attribute { name, value },
        }
    }

    /// A fresh namespace node.
    pub fn namespace(key: NodeKey, parent: NodeKey, name: NameDelegate) -> Self {
        Self {
            delegate: NodeDelegate {
                key,
                parent: Some(parent),
                hash: 0,
            },
            body: NodeBody::Namespace { name },
        }
    }

    /// This node's kind tag.
    pub const fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::DocumentRoot { .. } => NodeKind::DocumentRoot,
            NodeBody::Element { .. } => NodeKind::Element,
            NodeBody::Text { .. } => NodeKind::Text,
            NodeBody::Attribute { .. } => NodeKind::Attribute,
            NodeBody::Namespace { .. } => NodeKind::Namespace,
        }
    }

    #[inline]
    pub const fn key(&self) -> NodeKey {
        self.delegate.key
    }

    #[inline]
    pub const fn parent(&self) -> Option<NodeKey> {
        self.delegate.parent
    }

    #[inline]
    pub fn set_parent(&mut self, parent: Option<NodeKey>) {
        self.delegate.parent = parent;
    }

    #[inline]
    pub const fn hash(&self) -> u64 {
        self.delegate.hash
    }

    #[inline]
    pub fn set_hash(&mut self, hash: u64) {
        self.delegate.hash = hash;
    }

    /// Structural fields, if this kind has them.
    pub const fn structure(&self) -> Option<&StructDelegate> {
        match &self.body {
            NodeBody::DocumentRoot { structure }
            | NodeBody::Element { structure, .. }
            | NodeBody::Text { structure, .. } => Some(structure),
            _ => None,
        }
    }

    /// Mutable structural fields, if this kind has them.
    pub fn structure_mut(&mut self) -> Option<&mut StructDelegate> {
        match &mut self.body {
            NodeBody::DocumentRoot { structure }
            | NodeBody::Element { structure, .. }
            | NodeBody::Text { structure, .. } => Some(structure),
            _ => None,
        }
    }

    /// Name-dictionary references, if this kind has them.
    pub const fn name(&self) -> Option<&NameDelegate> {
        match &self.body {
            NodeBody::Element { name, .. }
            | NodeBody::Attribute { name, .. }
            | NodeBody::Namespace { name } => Some(name),
            _ => None,
        }
    }

    /// Mutable name-dictionary references, if this kind has them.
    pub fn name_mut(&mut self) -> Option<&mut NameDelegate> {
        match &mut self.body {
            NodeBody::Element { name, .. }
            | NodeBody::Attribute { name, .. }
            | NodeBody::Namespace { name } => Some(name),
            _ => None,
        }
    }

    /// Value bytes, if this kind has them.
    pub const fn value(&self) -> Option<&ValueDelegate> {
        match &self.body {
            NodeBody::Text { value, .. } | NodeBody::Attribute { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Mutable value bytes, if this kind has them.
    pub fn value_mut(&mut self) -> Option<&mut ValueDelegate> {
        match &mut self.body {
            NodeBody::Text { value, .. } | NodeBody::Attribute { value, .. } => Some(value),
            _ => None,
        }
    }

    // --- element-only accessors -------------------------------------------

    /// Attribute keys in insertion order (empty slice for non-elements).
    pub fn attribute_keys(&self) -> &[NodeKey] {
        match &self.body {
            NodeBody::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Namespace keys in insertion order (empty slice for non-elements).
    pub fn namespace_keys(&self) -> &[NodeKey] {
        match &self.body {
            NodeBody::Element { namespaces, .. } => namespaces,
            _ => &[],
        }
    }

    /// Look up an attribute node key by its name hash.
    pub fn attribute_by_name(&self, name_key: NameKey) -> Option<NodeKey> {
        match &self.body {
            NodeBody::Element {
                attribute_names, ..
            } => attribute_names.get(&name_key).copied(),
            _ => None,
        }
    }

    /// Register an attribute on this element. Overwrites any same-name entry.
    pub fn insert_attribute(&mut self, key: NodeKey, name_key: NameKey) {
        if let NodeBody::Element {
            attributes,
            attribute_names,
            ..
        } = &mut self.body
        {
            attributes.push(key);
            attribute_names.insert(name_key, key);
        }
    }

    /// Deregister an attribute from this element.
    pub fn remove_attribute(&mut self, key: NodeKey) {
        if let NodeBody::Element {
            attributes,
            attribute_names,
            ..
        } = &mut self.body
        {
            attributes.retain(|&k| k != key);
            attribute_names.retain(|_, &mut v| v != key);
        }
    }

    /// Register a namespace on this element.
    pub fn insert_namespace(&mut self, key: NodeKey) {
        if let NodeBody::Element { namespaces, .. } = &mut self.body {
            namespaces.push(key);
        }
    }

    /// Deregister a namespace from this element.
    pub fn remove_namespace(&mut self, key: NodeKey) {
        if let NodeBody::Element { namespaces, .. } = &mut self.body {
            namespaces.retain(|&k| k != key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: u32, u: u32) -> NameDelegate {
        NameDelegate {
            name_key: NameKey::new(n),
            uri_key: NameKey::new(u),
        }
    }

    #[test]
    fn kind_predicates() {
        assert!(NodeKind::DocumentRoot.is_structural());
        assert!(NodeKind::Text.is_structural());
        assert!(!NodeKind::Attribute.is_structural());
        assert!(NodeKind::Namespace.is_named());
        assert!(!NodeKind::Text.is_named());
        assert!(NodeKind::Attribute.is_valued());
        assert!(!NodeKind::Element.is_valued());
    }

    #[test]
    fn delegates_match_kind() {
        let root = Node::document_root();
        assert_eq!(root.kind(), NodeKind::DocumentRoot);
        assert!(root.structure().is_some());
        assert!(root.name().is_none());
        assert!(root.value().is_none());
        assert_eq!(root.parent(), None);

        let el = Node::element(NodeKey::new(1), NodeKey::DOCUMENT_ROOT, None, None, name(1, 2));
        assert!(el.structure().is_some());
        assert!(el.name().is_some());
        assert!(el.value().is_none());

        let attr = Node::attribute(
            NodeKey::new(2),
            NodeKey::new(1),
            name(3, 4),
            ValueDelegate {
                value: b"v".to_vec(),
                compressed: false,
            },
        );
        assert!(attr.structure().is_none());
        assert!(attr.value().is_some());
    }

    #[test]
    fn element_attribute_registry() {
        let mut el = Node::element(NodeKey::new(1), NodeKey::DOCUMENT_ROOT, None, None, name(1, 2));
        el.insert_attribute(NodeKey::new(5), NameKey::new(42));
        el.insert_attribute(NodeKey::new(6), NameKey::new(43));
        assert_eq!(el.attribute_keys(), &[NodeKey::new(5), NodeKey::new(6)]);
        assert_eq!(el.attribute_by_name(NameKey::new(42)), Some(NodeKey::new(5)));

        el.remove_attribute(NodeKey::new(5));
        assert_eq!(el.attribute_keys(), &[NodeKey::new(6)]);
        assert_eq!(el.attribute_by_name(NameKey::new(42)), None);
    }

    #[test]
    fn sibling_link_mutators_are_total() {
        let mut t = Node::text(
            NodeKey::new(3),
            NodeKey::new(1),
            None,
            None,
            ValueDelegate::default(),
        );
        let s = t.structure_mut().unwrap();
        s.left_sibling = Some(NodeKey::new(2));
        s.right_sibling = Some(NodeKey::new(4));
        s.child_count += 1;
        assert_eq!(t.structure().unwrap().left_sibling, Some(NodeKey::new(2)));
        assert_eq!(t.structure().unwrap().child_count, 1);
    }
}
