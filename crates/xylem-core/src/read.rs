//! Cursor-oriented read surface shared by read-only transactions and the
//! write transaction.
//!
//! The cursor is a single mutable position: moves succeed iff the target
//! exists, and a failed move leaves the position untouched and returns
//! `false`. All accessors read through the page transaction.

use std::fmt;

use tracing::warn;

use xylem_error::{Result, XylemError};
use xylem_store::{PageReadTrx, Session};
use xylem_types::compression::decode_value;
use xylem_types::{Node, NodeKey, NodeKind, QName, Revision, TrxId};

/// Open a read-only node transaction on a committed revision of `session`.
pub fn begin_read_trx<S: Session>(
    session: &S,
    trx_id: TrxId,
    revision: Revision,
) -> Result<NodeReadTrx<S::ReadTrx>> {
    session.assert_access(revision)?;
    NodeReadTrx::new(trx_id, session.begin_page_read_trx(revision)?)
}

/// A node-level read transaction: a page transaction plus a cursor.
pub struct NodeReadTrx<P: PageReadTrx> {
    page: P,
    current: Node,
    trx_id: TrxId,
    closed: bool,
}

impl<P: PageReadTrx> NodeReadTrx<P> {
    /// Open a cursor on the document root of `page`.
    pub fn new(trx_id: TrxId, page: P) -> Result<Self> {
        let current = page
            .get(NodeKey::DOCUMENT_ROOT)?
            .ok_or(XylemError::InvalidNodeKey { key: 0 })?;
        Ok(Self {
            page,
            current,
            trx_id,
            closed: false,
        })
    }

    pub(crate) fn page(&self) -> &P {
        &self.page
    }

    pub(crate) fn page_mut(&mut self) -> &mut P {
        &mut self.page
    }

    /// Swap in a fresh page transaction, re-anchoring the cursor on the same
    /// key when it survived, else on the document root.
    pub(crate) fn replace_page(&mut self, page: P) -> Result<P> {
        let old = std::mem::replace(&mut self.page, page);
        let key = self.current.key();
        self.current = match self.page.get(key)? {
            Some(node) => node,
            None => self
                .page
                .get(NodeKey::DOCUMENT_ROOT)?
                .ok_or(XylemError::InvalidNodeKey { key: 0 })?,
        };
        Ok(old)
    }

    /// The node under the cursor.
    pub(crate) fn current(&self) -> &Node {
        &self.current
    }

    pub(crate) fn set_current(&mut self, node: Node) {
        self.current = node;
    }

    /// Re-fetch the cursor node from the page layer.
    pub(crate) fn refresh(&mut self) -> Result<()> {
        let key = self.current.key();
        self.current = self
            .page
            .get(key)?
            .ok_or(XylemError::InvalidNodeKey { key: key.get() })?;
        Ok(())
    }

    // --- moves ------------------------------------------------------------

    /// Move to an absolute key.
    pub fn move_to(&mut self, key: NodeKey) -> bool {
        match self.page.get(key) {
            Ok(Some(node)) => {
                self.current = node;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(key = %key, error = %e, "move failed on page read");
                false
            }
        }
    }

    pub fn move_to_document_root(&mut self) -> bool {
        self.move_to(NodeKey::DOCUMENT_ROOT)
    }

    pub fn move_to_parent(&mut self) -> bool {
        match self.current.parent() {
            Some(key) => self.move_to(key),
            None => false,
        }
    }

    pub fn move_to_first_child(&mut self) -> bool {
        match self.current.structure().and_then(|s| s.first_child) {
            Some(key) => self.move_to(key),
            None => false,
        }
    }

    pub fn move_to_left_sibling(&mut self) -> bool {
        match self.current.structure().and_then(|s| s.left_sibling) {
            Some(key) => self.move_to(key),
            None => false,
        }
    }

    pub fn move_to_right_sibling(&mut self) -> bool {
        match self.current.structure().and_then(|s| s.right_sibling) {
            Some(key) => self.move_to(key),
            None => false,
        }
    }

    /// Move to the `index`-th attribute of the current element.
    pub fn move_to_attribute(&mut self, index: usize) -> bool {
        match self.current.attribute_keys().get(index).copied() {
            Some(key) => self.move_to(key),
            None => false,
        }
    }

    /// Move to the `index`-th namespace of the current element.
    pub fn move_to_namespace(&mut self, index: usize) -> bool {
        match self.current.namespace_keys().get(index).copied() {
            Some(key) => self.move_to(key),
            None => false,
        }
    }

    // --- accessors --------------------------------------------------------

    pub fn kind(&self) -> NodeKind {
        self.current.kind()
    }

    pub fn node_key(&self) -> NodeKey {
        self.current.key()
    }

    pub fn parent_key(&self) -> Option<NodeKey> {
        self.current.parent()
    }

    pub fn hash(&self) -> u64 {
        self.current.hash()
    }

    pub fn child_count(&self) -> u64 {
        self.current.structure().map_or(0, |s| s.child_count)
    }

    pub fn descendant_count(&self) -> u64 {
        self.current.structure().map_or(0, |s| s.descendant_count)
    }

    pub fn attribute_count(&self) -> usize {
        self.current.attribute_keys().len()
    }

    pub fn namespace_count(&self) -> usize {
        self.current.namespace_keys().len()
    }

    /// Qualified name of the current node, if it is a named kind.
    ///
    /// For a namespace declaration the local part carries the declared
    /// prefix.
    pub fn qname(&self) -> Result<Option<QName>> {
        let Some(name) = self.current.name() else {
            return Ok(None);
        };
        let kind = self.current.kind();
        let built = self
            .page
            .name(name.name_key, kind)?
            .unwrap_or_default();
        let uri = self
            .page
            .name(name.uri_key, NodeKind::Namespace)?
            .unwrap_or_default();
        Ok(Some(QName::from_built_name(&built, uri)))
    }

    /// UTF-8 value of the current node, if it is a valued kind.
    pub fn value(&self) -> Result<Option<String>> {
        match self.current.value() {
            Some(v) => Ok(Some(decode_value(v)?)),
            None => Ok(None),
        }
    }

    pub fn revision_number(&self) -> Revision {
        self.page.revision()
    }

    pub fn max_node_key(&self) -> NodeKey {
        self.page.max_node_key()
    }

    pub fn trx_id(&self) -> TrxId {
        self.trx_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn assert_open(&self) -> Result<()> {
        if self.closed {
            Err(XylemError::TrxClosed {
                trx_id: self.trx_id,
            })
        } else {
            Ok(())
        }
    }

    /// Release the cursor. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl<P: PageReadTrx> fmt::Display for NodeReadTrx<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeReadTrx {{ trx_id: {}, revision: {}, node: {} ({}) }}",
            self.trx_id,
            self.page.revision(),
            self.current.key(),
            self.current.kind().as_str(),
        )
    }
}
