//! The write-side node transaction.
//!
//! A single-writer transaction over one resource: a cursor plus structural
//! edit operations (insert, remove, move, replace, copy, set), subtree hash
//! maintenance along the ancestor axis, modification counting with
//! intermediate commits, and lifecycle control (commit, abort, revert,
//! close, scheduled auto-commit).
//!
//! Every public operation serializes behind one mutex shared with the
//! auto-commit worker, so an edit, its hash maintenance and the counter
//! bump are one atomic step relative to the timer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use xylem_error::{Result, XylemError};
use xylem_store::{PageReadTrx, PageWriteTrx, Session};
use xylem_types::compression::{decode_value, encode_value};
use xylem_types::node::NameDelegate;
use xylem_types::qname::name_hash;
use xylem_types::{
    Consistency, HashKind, Node, NodeKey, NodeKind, QName, Revision, TrxId,
};

use crate::axis;
use crate::read::NodeReadTrx;
use crate::sched::AutoCommitWorker;

/// Where an insertion lands relative to the cursor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    FirstChild,
    LeftSibling,
    RightSibling,
}

/// Cursor movement after an attribute or namespace insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    /// Restore the cursor to the owning element.
    ToParent,
    /// Leave the cursor on the inserted node.
    None,
}

/// Grace period for the auto-commit worker to acknowledge shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The write transaction handle.
///
/// At most one exists per resource. All methods serialize behind an
/// internal mutex; the auto-commit worker takes the same mutex, so edits
/// and scheduled commits never interleave.
pub struct NodeWriteTrx<S: Session> {
    inner: Arc<Mutex<WriteTrxInner<S>>>,
    scheduler: Option<AutoCommitWorker>,
}

impl<S: Session> fmt::Debug for NodeWriteTrx<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeWriteTrx").finish()
    }
}

impl<S: Session> NodeWriteTrx<S> {
    /// Open the write transaction of `session`.
    ///
    /// `max_node_count` > 0 triggers an intermediate commit once that many
    /// modifications accumulate; `auto_commit_interval` additionally commits
    /// pending modifications from a background worker.
    pub fn begin(
        session: Arc<S>,
        trx_id: TrxId,
        max_node_count: u64,
        auto_commit_interval: Option<Duration>,
    ) -> Result<Self> {
        if let Some(interval) = auto_commit_interval {
            if interval.is_zero() {
                return Err(XylemError::config("auto-commit interval must be nonzero"));
            }
        }
        let read_revision = session.last_committed_revision();
        let page = session.begin_page_write_trx(trx_id, read_revision, read_revision.next())?;
        let read = match NodeReadTrx::new(trx_id, page) {
            Ok(read) => read,
            Err(e) => {
                session.close_write_trx(trx_id);
                return Err(e);
            }
        };
        let config = session.config();
        let inner = Arc::new(Mutex::new(WriteTrxInner {
            read,
            session,
            trx_id,
            max_node_count,
            modifications: 0,
            bulk_insert: false,
            hash_kind: config.hash_kind,
            consistency: config.consistency,
            compression: config.compression,
            auto_commit_failure: None,
        }));
        let scheduler = match auto_commit_interval {
            Some(interval) => Some(AutoCommitWorker::spawn(Arc::downgrade(&inner), interval)?),
            None => None,
        };
        Ok(Self { inner, scheduler })
    }

    // --- cursor moves -----------------------------------------------------

    pub fn move_to(&self, key: NodeKey) -> bool {
        self.inner.lock().read.move_to(key)
    }

    pub fn move_to_document_root(&self) -> bool {
        self.inner.lock().read.move_to_document_root()
    }

    pub fn move_to_parent(&self) -> bool {
        self.inner.lock().read.move_to_parent()
    }

    pub fn move_to_first_child(&self) -> bool {
        self.inner.lock().read.move_to_first_child()
    }

    pub fn move_to_left_sibling(&self) -> bool {
        self.inner.lock().read.move_to_left_sibling()
    }

    pub fn move_to_right_sibling(&self) -> bool {
        self.inner.lock().read.move_to_right_sibling()
    }

    pub fn move_to_attribute(&self, index: usize) -> bool {
        self.inner.lock().read.move_to_attribute(index)
    }

    pub fn move_to_namespace(&self, index: usize) -> bool {
        self.inner.lock().read.move_to_namespace(index)
    }

    // --- read accessors ---------------------------------------------------

    pub fn kind(&self) -> NodeKind {
        self.inner.lock().read.kind()
    }

    pub fn node_key(&self) -> NodeKey {
        self.inner.lock().read.node_key()
    }

    pub fn qname(&self) -> Result<Option<QName>> {
        self.inner.lock().read.qname()
    }

    pub fn value(&self) -> Result<Option<String>> {
        self.inner.lock().read.value()
    }

    pub fn hash(&self) -> u64 {
        self.inner.lock().read.hash()
    }

    pub fn child_count(&self) -> u64 {
        self.inner.lock().read.child_count()
    }

    pub fn descendant_count(&self) -> u64 {
        self.inner.lock().read.descendant_count()
    }

    pub fn attribute_count(&self) -> usize {
        self.inner.lock().read.attribute_count()
    }

    pub fn namespace_count(&self) -> usize {
        self.inner.lock().read.namespace_count()
    }

    pub fn revision_number(&self) -> Revision {
        self.inner.lock().read.revision_number()
    }

    pub fn max_node_key(&self) -> NodeKey {
        self.inner.lock().read.max_node_key()
    }

    pub fn trx_id(&self) -> TrxId {
        self.inner.lock().trx_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed()
    }

    /// Pending modifications since the last commit.
    pub fn modification_count(&self) -> u64 {
        self.inner.lock().modifications
    }

    /// Run the structural consistency oracle over the uncommitted tree.
    ///
    /// Returns one message per violated invariant; an empty list means the
    /// tree, its counts and (when maintained) its hashes are consistent.
    pub fn verify_consistency(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        crate::verify::check_tree(inner.read.page(), inner.hash_kind)
    }

    // --- structural edits -------------------------------------------------

    pub fn insert_element_as_first_child(&self, name: &QName) -> Result<()> {
        self.inner
            .lock()
            .insert_element(InsertPosition::FirstChild, name)
    }

    pub fn insert_element_as_left_sibling(&self, name: &QName) -> Result<()> {
        self.inner
            .lock()
            .insert_element(InsertPosition::LeftSibling, name)
    }

    pub fn insert_element_as_right_sibling(&self, name: &QName) -> Result<()> {
        self.inner
            .lock()
            .insert_element(InsertPosition::RightSibling, name)
    }

    pub fn insert_text_as_first_child(&self, value: &str) -> Result<()> {
        self.inner
            .lock()
            .insert_text(InsertPosition::FirstChild, value)
    }

    pub fn insert_text_as_left_sibling(&self, value: &str) -> Result<()> {
        self.inner
            .lock()
            .insert_text(InsertPosition::LeftSibling, value)
    }

    pub fn insert_text_as_right_sibling(&self, value: &str) -> Result<()> {
        self.inner
            .lock()
            .insert_text(InsertPosition::RightSibling, value)
    }

    pub fn insert_attribute(&self, name: &QName, value: &str, movement: Movement) -> Result<()> {
        self.inner.lock().insert_attribute(name, value, movement)
    }

    pub fn insert_namespace(&self, name: &QName, movement: Movement) -> Result<()> {
        self.inner.lock().insert_namespace(name, movement)
    }

    /// Remove the cursor node (and its subtree, for structural nodes).
    pub fn remove(&self) -> Result<()> {
        self.inner.lock().remove_current()
    }

    pub fn move_subtree_as_first_child(&self, from: NodeKey) -> Result<()> {
        self.inner.lock().move_subtree_to_first_child(from)
    }

    pub fn move_subtree_as_left_sibling(&self, from: NodeKey) -> Result<()> {
        self.inner.lock().move_subtree_to_left_sibling(from)
    }

    pub fn move_subtree_as_right_sibling(&self, from: NodeKey) -> Result<()> {
        self.inner.lock().move_subtree_to_right_sibling(from)
    }

    pub fn set_qname(&self, name: &QName) -> Result<()> {
        self.inner.lock().set_qname(name)
    }

    pub fn set_uri(&self, uri: &str) -> Result<()> {
        self.inner.lock().set_uri(uri)
    }

    pub fn set_value(&self, value: &str) -> Result<()> {
        self.inner.lock().set_value(value)
    }

    /// Replace the cursor node with a single text value.
    pub fn replace_with_text(&self, value: &str) -> Result<()> {
        self.inner.lock().replace_with_text(value)
    }

    /// Replace the cursor node with the subtree under `src`'s cursor.
    pub fn replace_with_subtree<R: PageReadTrx>(&self, src: &mut NodeReadTrx<R>) -> Result<()> {
        self.inner.lock().replace_with_subtree(src)
    }

    /// Replace the cursor node with the tree described by an event stream.
    pub fn replace_with_events<I>(&self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = crate::shred::SubtreeEvent>,
    {
        self.inner.lock().replace_with_events(events)
    }

    pub fn copy_subtree_as_first_child<R: PageReadTrx>(
        &self,
        src: &mut NodeReadTrx<R>,
    ) -> Result<()> {
        self.inner.lock().copy_subtree(src, InsertPosition::FirstChild)
    }

    pub fn copy_subtree_as_left_sibling<R: PageReadTrx>(
        &self,
        src: &mut NodeReadTrx<R>,
    ) -> Result<()> {
        self.inner
            .lock()
            .copy_subtree(src, InsertPosition::LeftSibling)
    }

    pub fn copy_subtree_as_right_sibling<R: PageReadTrx>(
        &self,
        src: &mut NodeReadTrx<R>,
    ) -> Result<()> {
        self.inner
            .lock()
            .copy_subtree(src, InsertPosition::RightSibling)
    }

    /// Bulk-insert a subtree from an event stream, deferring hash and count
    /// maintenance to a single post-order pass at the end.
    pub fn insert_subtree<I>(&self, events: I, position: InsertPosition) -> Result<()>
    where
        I: IntoIterator<Item = crate::shred::SubtreeEvent>,
    {
        self.inner
            .lock()
            .insert_subtree_inner(events, position)
            .map(|_| ())
    }

    // --- lifecycle --------------------------------------------------------

    /// Publish the pending modifications as a new revision.
    pub fn commit(&self) -> Result<()> {
        self.inner.lock().commit_internal()
    }

    /// Discard pending modifications and rewind to the last committed
    /// revision.
    pub fn abort(&self) -> Result<()> {
        self.inner.lock().abort_internal()
    }

    /// Rewind the transaction so its read base is `revision`; the next
    /// commit publishes the reverted tree as a new revision.
    pub fn revert_to(&self, revision: Revision) -> Result<()> {
        self.inner.lock().revert_to_internal(revision)
    }

    /// Close the transaction, failing with `DirtyClose` when modifications
    /// are pending, and stop the auto-commit worker within a bounded grace
    /// period.
    pub fn close(&mut self) -> Result<()> {
        self.inner.lock().close_internal()?;
        if let Some(worker) = self.scheduler.take() {
            worker.shutdown(SHUTDOWN_GRACE)?;
        }
        Ok(())
    }
}

impl<S: Session> fmt::Display for NodeWriteTrx<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        write!(
            f,
            "NodeWriteTrx {{ {}, hash_kind: {:?}, modifications: {} }}",
            inner.read, inner.hash_kind, inner.modifications
        )
    }
}

impl<S: Session> Drop for NodeWriteTrx<S> {
    fn drop(&mut self) {
        if let Some(worker) = self.scheduler.take() {
            worker.request_stop();
        }
        let mut inner = self.inner.lock();
        if !inner.is_closed() {
            if inner.modifications > 0 {
                warn!(
                    trx_id = inner.trx_id,
                    modifications = inner.modifications,
                    "write transaction dropped with uncommitted modifications"
                );
            }
            inner.force_close();
        }
    }
}

/// Transaction state behind the writer mutex.
pub(crate) struct WriteTrxInner<S: Session> {
    pub(crate) read: NodeReadTrx<S::WriteTrx>,
    pub(crate) session: Arc<S>,
    pub(crate) trx_id: TrxId,
    pub(crate) max_node_count: u64,
    pub(crate) modifications: u64,
    pub(crate) bulk_insert: bool,
    pub(crate) hash_kind: HashKind,
    pub(crate) consistency: Consistency,
    pub(crate) compression: bool,
    pub(crate) auto_commit_failure: Option<String>,
}

pub(crate) fn value_text(node: &Node) -> Result<String> {
    match node.value() {
        Some(v) => Ok(decode_value(v)?),
        None => Err(XylemError::wrong_kind("value", node.kind().as_str())),
    }
}

impl<S: Session> WriteTrxInner<S> {
    pub(crate) fn page(&self) -> &S::WriteTrx {
        self.read.page()
    }

    pub(crate) fn page_mut(&mut self) -> &mut S::WriteTrx {
        self.read.page_mut()
    }

    pub(crate) fn fetch(&self, key: NodeKey) -> Result<Node> {
        self.page()
            .get(key)?
            .ok_or(XylemError::InvalidNodeKey { key: key.get() })
    }

    fn cursor(&self) -> &Node {
        self.read.current()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.read.is_closed()
    }

    /// Open assertion, modification counting, and the synchronous
    /// intermediate-commit trigger shared by every edit operation.
    fn check_access_and_commit(&mut self) -> Result<()> {
        self.read.assert_open()?;
        if let Some(detail) = self.auto_commit_failure.take() {
            return Err(XylemError::invariant(format!("auto-commit failed: {detail}")));
        }
        self.modifications += 1;
        if self.max_node_count > 0 && self.modifications > self.max_node_count {
            self.commit_internal()?;
        }
        Ok(())
    }

    // --- insert operations ------------------------------------------------

    /// Parent / left / right slots of a node inserted at `position`
    /// relative to `anchor`.
    fn insert_slots(
        anchor: &Node,
        position: InsertPosition,
    ) -> Result<(NodeKey, Option<NodeKey>, Option<NodeKey>)> {
        let structure = anchor
            .structure()
            .ok_or_else(|| XylemError::wrong_kind("insert", anchor.kind().as_str()))?;
        Ok(match position {
            InsertPosition::FirstChild => (anchor.key(), None, structure.first_child),
            InsertPosition::LeftSibling => {
                let parent = anchor.parent().ok_or_else(|| {
                    XylemError::wrong_kind("insert_as_sibling", anchor.kind().as_str())
                })?;
                (parent, structure.left_sibling, Some(anchor.key()))
            }
            InsertPosition::RightSibling => {
                let parent = anchor.parent().ok_or_else(|| {
                    XylemError::wrong_kind("insert_as_sibling", anchor.kind().as_str())
                })?;
                (parent, Some(anchor.key()), structure.right_sibling)
            }
        })
    }

    pub(crate) fn insert_element(&mut self, position: InsertPosition, name: &QName) -> Result<()> {
        if !name.is_valid() {
            return Err(XylemError::InvalidQName {
                name: name.build_name(),
            });
        }
        let kind = self.cursor().kind();
        match position {
            InsertPosition::FirstChild => {
                if !matches!(kind, NodeKind::Element | NodeKind::DocumentRoot) {
                    return Err(XylemError::wrong_kind(
                        "insert_element_as_first_child",
                        kind.as_str(),
                    ));
                }
            }
            _ => {
                if !matches!(kind, NodeKind::Element | NodeKind::Text) {
                    return Err(XylemError::wrong_kind(
                        "insert_element_as_sibling",
                        kind.as_str(),
                    ));
                }
            }
        }
        self.check_access_and_commit()?;

        let anchor = self.cursor().clone();
        let (parent, left, right) = Self::insert_slots(&anchor, position)?;
        let name_key = self
            .page_mut()
            .create_name_key(&name.build_name(), NodeKind::Element)?;
        let uri_key = self
            .page_mut()
            .create_name_key(&name.uri, NodeKind::Namespace)?;
        let key = self.page().max_node_key().next();
        let node = self.page_mut().create(Node::element(
            key,
            parent,
            left,
            right,
            NameDelegate { name_key, uri_key },
        ))?;

        self.adapt_for_insert(&node, position)?;
        self.read.set_current(node);
        self.hash_add_for(key)?;
        self.read.refresh()?;
        Ok(())
    }

    pub(crate) fn insert_text(&mut self, position: InsertPosition, value: &str) -> Result<()> {
        let kind = self.cursor().kind();
        match position {
            InsertPosition::FirstChild => {
                if kind != NodeKind::Element {
                    return Err(XylemError::wrong_kind(
                        "insert_text_as_first_child",
                        kind.as_str(),
                    ));
                }
            }
            _ => {
                if !matches!(kind, NodeKind::Element | NodeKind::Text) {
                    return Err(XylemError::wrong_kind(
                        "insert_text_as_sibling",
                        kind.as_str(),
                    ));
                }
            }
        }
        self.check_access_and_commit()?;

        // Merge with an adjacent text node instead of creating a neighbor.
        let anchor = self.cursor().clone();
        match position {
            InsertPosition::FirstChild => {
                if let Some(first) = anchor.structure().and_then(|s| s.first_child) {
                    let node = self.fetch(first)?;
                    if node.kind() == NodeKind::Text {
                        let merged = format!("{value} {}", value_text(&node)?);
                        self.read.move_to(first);
                        return self.set_value_internal(&merged);
                    }
                }
            }
            InsertPosition::RightSibling => {
                if anchor.kind() == NodeKind::Text {
                    let merged = format!("{} {value}", value_text(&anchor)?);
                    return self.set_value_internal(&merged);
                }
                if let Some(right) = anchor.structure().and_then(|s| s.right_sibling) {
                    let node = self.fetch(right)?;
                    if node.kind() == NodeKind::Text {
                        let merged = format!("{value} {}", value_text(&node)?);
                        self.read.move_to(right);
                        return self.set_value_internal(&merged);
                    }
                }
            }
            InsertPosition::LeftSibling => {
                if anchor.kind() == NodeKind::Text {
                    let merged = format!("{value} {}", value_text(&anchor)?);
                    return self.set_value_internal(&merged);
                }
                if let Some(left) = anchor.structure().and_then(|s| s.left_sibling) {
                    let node = self.fetch(left)?;
                    if node.kind() == NodeKind::Text {
                        let merged = format!("{} {value}", value_text(&node)?);
                        self.read.move_to(left);
                        return self.set_value_internal(&merged);
                    }
                }
            }
        }

        let (parent, left, right) = Self::insert_slots(&anchor, position)?;
        let key = self.page().max_node_key().next();
        let delegate = encode_value(value, self.compression)?;
        let node = self
            .page_mut()
            .create(Node::text(key, parent, left, right, delegate))?;

        self.adapt_for_insert(&node, position)?;
        self.read.set_current(node);
        self.hash_add_for(key)?;
        self.read.refresh()?;
        Ok(())
    }

    pub(crate) fn insert_attribute(
        &mut self,
        name: &QName,
        value: &str,
        movement: Movement,
    ) -> Result<()> {
        if !name.is_valid() {
            return Err(XylemError::InvalidQName {
                name: name.build_name(),
            });
        }
        if self.cursor().kind() != NodeKind::Element {
            return Err(XylemError::wrong_kind(
                "insert_attribute",
                self.cursor().kind().as_str(),
            ));
        }
        self.check_access_and_commit()?;

        let element_key = self.read.node_key();
        let dictionary_key = name_hash(&name.build_name());

        // Same name hash: overwrite a differing value in place, reject a
        // true duplicate.
        if let Some(existing) = self.cursor().attribute_by_name(dictionary_key) {
            self.read.move_to(existing);
            let same_name = self.read.qname()?.as_ref() == Some(name);
            if same_name {
                let existing_value = self.read.value()?.unwrap_or_default();
                if existing_value == value {
                    self.read.move_to(element_key);
                    return Err(XylemError::DuplicateAttribute {
                        name: name.build_name(),
                    });
                }
                self.set_value_internal(value)?;
                if movement == Movement::ToParent {
                    self.read.move_to(element_key);
                }
                return Ok(());
            }
            self.read.move_to(element_key);
        }

        let name_key = self
            .page_mut()
            .create_name_key(&name.build_name(), NodeKind::Attribute)?;
        let uri_key = self
            .page_mut()
            .create_name_key(&name.uri, NodeKind::Namespace)?;
        let key = self.page().max_node_key().next();
        let node = self.page_mut().create(Node::attribute(
            key,
            element_key,
            NameDelegate { name_key, uri_key },
            encode_value(value, false)?,
        ))?;

        let mut element = self.page_mut().prepare(element_key)?;
        element.insert_attribute(key, dictionary_key);
        self.page_mut().finish(element)?;

        self.read.set_current(node);
        self.hash_add_for(key)?;
        self.read.refresh()?;
        if movement == Movement::ToParent {
            self.read.move_to(element_key);
        }
        Ok(())
    }

    pub(crate) fn insert_namespace(&mut self, name: &QName, movement: Movement) -> Result<()> {
        if !name.is_valid() {
            return Err(XylemError::InvalidQName {
                name: name.build_name(),
            });
        }
        if self.cursor().kind() != NodeKind::Element {
            return Err(XylemError::wrong_kind(
                "insert_namespace",
                self.cursor().kind().as_str(),
            ));
        }
        self.check_access_and_commit()?;

        let declared = name
            .prefix
            .clone()
            .unwrap_or_else(|| name.local.clone());
        let element_key = self.read.node_key();
        for &existing in self.cursor().namespace_keys() {
            let node = self.fetch(existing)?;
            let delegate = node
                .name()
                .ok_or_else(|| XylemError::invariant("namespace node without name delegate"))?;
            let prefix = self
                .page()
                .name(delegate.name_key, NodeKind::Namespace)?
                .unwrap_or_default();
            if prefix == declared {
                return Err(XylemError::DuplicateNamespace { prefix: declared });
            }
        }

        let uri_key = self
            .page_mut()
            .create_name_key(&name.uri, NodeKind::Namespace)?;
        let name_key = self
            .page_mut()
            .create_name_key(&declared, NodeKind::Namespace)?;
        let key = self.page().max_node_key().next();
        let node = self.page_mut().create(Node::namespace(
            key,
            element_key,
            NameDelegate { name_key, uri_key },
        ))?;

        let mut element = self.page_mut().prepare(element_key)?;
        element.insert_namespace(key);
        self.page_mut().finish(element)?;

        self.read.set_current(node);
        self.hash_add_for(key)?;
        self.read.refresh()?;
        if movement == Movement::ToParent {
            self.read.move_to(element_key);
        }
        Ok(())
    }

    /// Wire the links around a freshly created structural node.
    fn adapt_for_insert(&mut self, node: &Node, position: InsertPosition) -> Result<()> {
        let Some(structure) = node.structure().cloned() else {
            return Ok(());
        };
        let parent_key = node
            .parent()
            .ok_or_else(|| XylemError::invariant("inserted node without parent"))?;

        let becomes_first_child = match position {
            InsertPosition::FirstChild => true,
            InsertPosition::LeftSibling => structure.left_sibling.is_none(),
            InsertPosition::RightSibling => false,
        };

        let mut parent = self.page_mut().prepare(parent_key)?;
        {
            let ps = parent
                .structure_mut()
                .ok_or_else(|| XylemError::invariant("parent of inserted node is not structural"))?;
            ps.child_count += 1;
            if becomes_first_child {
                ps.first_child = Some(node.key());
            }
        }
        self.page_mut().finish(parent)?;

        if let Some(right) = structure.right_sibling {
            let mut sibling = self.page_mut().prepare(right)?;
            if let Some(st) = sibling.structure_mut() {
                st.left_sibling = Some(node.key());
            }
            self.page_mut().finish(sibling)?;
        }
        if let Some(left) = structure.left_sibling {
            let mut sibling = self.page_mut().prepare(left)?;
            if let Some(st) = sibling.structure_mut() {
                st.right_sibling = Some(node.key());
            }
            self.page_mut().finish(sibling)?;
        }
        Ok(())
    }

    // --- remove operation -------------------------------------------------

    pub(crate) fn remove_current(&mut self) -> Result<()> {
        self.check_access_and_commit()?;
        match self.cursor().kind() {
            NodeKind::DocumentRoot => Err(XylemError::CannotRemoveRoot),
            NodeKind::Element | NodeKind::Text => self.remove_structural(),
            NodeKind::Attribute => self.remove_attribute_node(),
            NodeKind::Namespace => self.remove_namespace_node(),
        }
    }

    fn remove_structural(&mut self) -> Result<()> {
        let node = self.cursor().clone();
        let key = node.key();
        let parent_key = node
            .parent()
            .ok_or_else(|| XylemError::invariant("structural node without parent"))?;

        // Subtract the whole subtree's hash and descendant contribution
        // while the links are still intact.
        self.hash_remove_for(key)?;

        // Release names and nodes of the doomed subtree, document order.
        let doomed = axis::descendant_keys(self.page(), key, true)?;
        for doomed_key in doomed {
            let doomed_node = self.fetch(doomed_key)?;
            self.release_names_and_satellites(&doomed_node)?;
            self.page_mut().remove(doomed_key)?;
        }

        self.adapt_for_remove(&node)?;

        if self.hash_kind == HashKind::Postorder && !self.skip_maintenance() {
            self.postorder_chain(parent_key)?;
        }

        // Cursor lands on the right sibling, else the left sibling, else
        // the parent. A merged-away right sibling fails the first move.
        let structure = node.structure().cloned().unwrap_or_default();
        let moved = structure
            .right_sibling
            .is_some_and(|k| self.read.move_to(k))
            || structure
                .left_sibling
                .is_some_and(|k| self.read.move_to(k));
        if !moved {
            self.read.move_to(parent_key);
        }
        Ok(())
    }

    /// Release the dictionary entries of `node` and delete its attribute
    /// and namespace satellites.
    fn release_names_and_satellites(&mut self, node: &Node) -> Result<()> {
        if node.kind() != NodeKind::Element {
            return Ok(());
        }
        let delegate = node
            .name()
            .ok_or_else(|| XylemError::invariant("element without name delegate"))?;
        self.page_mut()
            .remove_name(delegate.name_key, NodeKind::Element)?;
        self.page_mut()
            .remove_name(delegate.uri_key, NodeKind::Namespace)?;
        for &attribute_key in node.attribute_keys() {
            let attribute = self.fetch(attribute_key)?;
            if let Some(d) = attribute.name() {
                self.page_mut().remove_name(d.name_key, NodeKind::Attribute)?;
                self.page_mut().remove_name(d.uri_key, NodeKind::Namespace)?;
            }
            self.page_mut().remove(attribute_key)?;
        }
        for &namespace_key in node.namespace_keys() {
            let namespace = self.fetch(namespace_key)?;
            if let Some(d) = namespace.name() {
                self.page_mut().remove_name(d.name_key, NodeKind::Namespace)?;
                self.page_mut().remove_name(d.uri_key, NodeKind::Namespace)?;
            }
            self.page_mut().remove(namespace_key)?;
        }
        Ok(())
    }

    /// Rewire the neighbors and parent of a removed structural node,
    /// merging freshly adjacent text siblings.
    fn adapt_for_remove(&mut self, old: &Node) -> Result<()> {
        let structure = old
            .structure()
            .ok_or_else(|| XylemError::invariant("adapt_for_remove on non-structural node"))?
            .clone();
        let parent_key = old
            .parent()
            .ok_or_else(|| XylemError::invariant("structural node without parent"))?;

        let mut concatenated = false;
        if let (Some(left_key), Some(right_key)) = (structure.left_sibling, structure.right_sibling)
        {
            let left = self.fetch(left_key)?;
            let right = self.fetch(right_key)?;
            if left.kind() == NodeKind::Text && right.kind() == NodeKind::Text {
                let merged = format!("{} {}", value_text(&left)?, value_text(&right)?);
                self.hash_remove_for(right_key)?;
                self.set_value_for_merge(left_key, &merged)?;
                concatenated = true;
            }
        }

        if let Some(left_key) = structure.left_sibling {
            let new_right = match (concatenated, structure.right_sibling) {
                (true, Some(right_key)) => self
                    .fetch(right_key)?
                    .structure()
                    .and_then(|s| s.right_sibling),
                _ => structure.right_sibling,
            };
            let mut left = self.page_mut().prepare(left_key)?;
            if let Some(st) = left.structure_mut() {
                st.right_sibling = new_right;
            }
            self.page_mut().finish(left)?;
        }

        if let Some(right_key) = structure.right_sibling {
            if concatenated {
                let beyond = self
                    .fetch(right_key)?
                    .structure()
                    .and_then(|s| s.right_sibling);
                if let Some(beyond_key) = beyond {
                    let mut node = self.page_mut().prepare(beyond_key)?;
                    if let Some(st) = node.structure_mut() {
                        st.left_sibling = structure.left_sibling;
                    }
                    self.page_mut().finish(node)?;
                }
            } else {
                let mut right = self.page_mut().prepare(right_key)?;
                if let Some(st) = right.structure_mut() {
                    st.left_sibling = structure.left_sibling;
                }
                self.page_mut().finish(right)?;
            }
        }

        let mut parent = self.page_mut().prepare(parent_key)?;
        {
            let ps = parent
                .structure_mut()
                .ok_or_else(|| XylemError::invariant("parent is not structural"))?;
            if structure.left_sibling.is_none() {
                ps.first_child = structure.right_sibling;
            }
            ps.child_count -= 1;
            if concatenated {
                ps.child_count -= 1;
            }
        }
        self.page_mut().finish(parent)?;

        if concatenated {
            if let Some(right_key) = structure.right_sibling {
                self.page_mut().remove(right_key)?;
            }
        }
        Ok(())
    }

    fn remove_attribute_node(&mut self) -> Result<()> {
        let node = self.cursor().clone();
        let parent_key = node
            .parent()
            .ok_or_else(|| XylemError::invariant("attribute without parent"))?;

        self.hash_remove_for(node.key())?;
        let mut element = self.page_mut().prepare(parent_key)?;
        element.remove_attribute(node.key());
        self.page_mut().finish(element)?;
        self.page_mut().remove(node.key())?;
        if let Some(d) = node.name() {
            self.page_mut().remove_name(d.name_key, NodeKind::Attribute)?;
            self.page_mut().remove_name(d.uri_key, NodeKind::Namespace)?;
        }
        if self.hash_kind == HashKind::Postorder && !self.skip_maintenance() {
            self.postorder_chain(parent_key)?;
        }
        self.read.move_to(parent_key);
        Ok(())
    }

    fn remove_namespace_node(&mut self) -> Result<()> {
        let node = self.cursor().clone();
        let parent_key = node
            .parent()
            .ok_or_else(|| XylemError::invariant("namespace without parent"))?;

        self.hash_remove_for(node.key())?;
        let mut element = self.page_mut().prepare(parent_key)?;
        element.remove_namespace(node.key());
        self.page_mut().finish(element)?;
        self.page_mut().remove(node.key())?;
        if let Some(d) = node.name() {
            self.page_mut().remove_name(d.name_key, NodeKind::Namespace)?;
            self.page_mut().remove_name(d.uri_key, NodeKind::Namespace)?;
        }
        if self.hash_kind == HashKind::Postorder && !self.skip_maintenance() {
            self.postorder_chain(parent_key)?;
        }
        self.read.move_to(parent_key);
        Ok(())
    }

    // --- move operations --------------------------------------------------

    fn validate_move(&self, from: NodeKey) -> Result<Node> {
        if from > self.page().max_node_key() {
            return Err(XylemError::InvalidNodeKey { key: from.get() });
        }
        if from == self.read.node_key() {
            return Err(XylemError::MoveToSelf);
        }
        let source = self.fetch(from)?;
        if !matches!(source.kind(), NodeKind::Element | NodeKind::Text) {
            return Err(XylemError::wrong_kind(
                "move_subtree",
                source.kind().as_str(),
            ));
        }
        // The anchor must not live inside the moved subtree.
        for ancestor in axis::ancestor_keys(self.page(), self.read.node_key())? {
            if ancestor == from {
                return Err(XylemError::MoveToAncestor { key: from.get() });
            }
        }
        Ok(source)
    }

    pub(crate) fn move_subtree_to_first_child(&mut self, from: NodeKey) -> Result<()> {
        let source = self.validate_move(from)?;
        let anchor_kind = self.cursor().kind();
        if !matches!(anchor_kind, NodeKind::Element | NodeKind::DocumentRoot) {
            return Err(XylemError::wrong_kind(
                "move_subtree_as_first_child",
                anchor_kind.as_str(),
            ));
        }
        self.check_access_and_commit()?;
        if self.cursor().structure().and_then(|s| s.first_child) == Some(from) {
            return Ok(());
        }
        self.execute_move(source, InsertPosition::FirstChild)
    }

    pub(crate) fn move_subtree_to_right_sibling(&mut self, from: NodeKey) -> Result<()> {
        let source = self.validate_move(from)?;
        let anchor_kind = self.cursor().kind();
        if !matches!(anchor_kind, NodeKind::Element | NodeKind::Text) {
            return Err(XylemError::wrong_kind(
                "move_subtree_as_right_sibling",
                anchor_kind.as_str(),
            ));
        }
        self.check_access_and_commit()?;
        if self.cursor().structure().and_then(|s| s.right_sibling) == Some(from) {
            return Ok(());
        }
        self.execute_move(source, InsertPosition::RightSibling)
    }

    pub(crate) fn move_subtree_to_left_sibling(&mut self, from: NodeKey) -> Result<()> {
        self.validate_move(from)?;
        let anchor_kind = self.cursor().kind();
        if !matches!(anchor_kind, NodeKind::Element | NodeKind::Text) {
            return Err(XylemError::wrong_kind(
                "move_subtree_as_left_sibling",
                anchor_kind.as_str(),
            ));
        }
        if self.cursor().structure().and_then(|s| s.left_sibling) == Some(from) {
            self.check_access_and_commit()?;
            return Ok(());
        }
        // Lower onto the two primitive positions.
        if self.read.move_to_left_sibling() {
            self.move_subtree_to_right_sibling(from)
        } else {
            self.read.move_to_parent();
            self.move_subtree_to_first_child(from)
        }
    }

    fn execute_move(&mut self, source: Node, position: InsertPosition) -> Result<()> {
        let from = source.key();
        let anchor_key = self.read.node_key();
        let old_parent = source
            .parent()
            .ok_or_else(|| XylemError::invariant("moved node without parent"))?;

        // Phase 1: subtract the subtree's contribution from the old
        // ancestor chain while links are intact. The subtree keeps its own
        // hash so the attach phase can re-add it unchanged.
        self.hash_remove_for(from)?;

        // Phase 2: unlink at the source, merging newly adjacent texts.
        self.detach_links(&source, anchor_key)?;
        if self.hash_kind == HashKind::Postorder && !self.skip_maintenance() {
            self.postorder_chain(old_parent)?;
        }

        // Phase 3: wire in at the destination, merging at the new site.
        self.attach_links(from, anchor_key, position)?;

        // Phase 4: add the subtree's contribution to the new chain.
        self.read.move_to(from);
        self.hash_attach_for(from)?;
        self.read.refresh()?;
        Ok(())
    }

    fn detach_links(&mut self, source: &Node, anchor_key: NodeKey) -> Result<()> {
        let structure = source
            .structure()
            .ok_or_else(|| XylemError::invariant("moved node is not structural"))?
            .clone();
        let parent_key = source
            .parent()
            .ok_or_else(|| XylemError::invariant("moved node without parent"))?;

        let mut parent = self.page_mut().prepare(parent_key)?;
        if let Some(ps) = parent.structure_mut() {
            ps.child_count -= 1;
            if ps.first_child == Some(source.key()) {
                ps.first_child = structure.right_sibling;
            }
        }
        self.page_mut().finish(parent)?;

        if let Some(right) = structure.right_sibling {
            let mut node = self.page_mut().prepare(right)?;
            if let Some(st) = node.structure_mut() {
                st.left_sibling = structure.left_sibling;
            }
            self.page_mut().finish(node)?;
        }
        if let Some(left) = structure.left_sibling {
            let mut node = self.page_mut().prepare(left)?;
            if let Some(st) = node.structure_mut() {
                st.right_sibling = structure.right_sibling;
            }
            self.page_mut().finish(node)?;
        }

        // Source-site text merge. When the detach made two text siblings
        // adjacent, collapse them; keep whichever one is the move anchor.
        if let (Some(left_key), Some(right_key)) = (structure.left_sibling, structure.right_sibling)
        {
            let left = self.fetch(left_key)?;
            let right = self.fetch(right_key)?;
            if left.kind() == NodeKind::Text && right.kind() == NodeKind::Text {
                let merged = format!("{} {}", value_text(&left)?, value_text(&right)?);
                if right_key == anchor_key {
                    // Keep the right node; drop the left.
                    self.hash_remove_for(left_key)?;
                    self.set_value_for_merge(right_key, &merged)?;
                    let before_left = left.structure().and_then(|s| s.left_sibling);
                    let mut node = self.page_mut().prepare(right_key)?;
                    if let Some(st) = node.structure_mut() {
                        st.left_sibling = before_left;
                    }
                    self.page_mut().finish(node)?;
                    match before_left {
                        Some(k) => {
                            let mut node = self.page_mut().prepare(k)?;
                            if let Some(st) = node.structure_mut() {
                                st.right_sibling = Some(right_key);
                            }
                            self.page_mut().finish(node)?;
                        }
                        None => {
                            let mut parent = self.page_mut().prepare(parent_key)?;
                            if let Some(ps) = parent.structure_mut() {
                                ps.first_child = Some(right_key);
                            }
                            self.page_mut().finish(parent)?;
                        }
                    }
                    let mut parent = self.page_mut().prepare(parent_key)?;
                    if let Some(ps) = parent.structure_mut() {
                        ps.child_count -= 1;
                    }
                    self.page_mut().finish(parent)?;
                    self.page_mut().remove(left_key)?;
                } else {
                    // Keep the left node; drop the right.
                    self.hash_remove_for(right_key)?;
                    self.set_value_for_merge(left_key, &merged)?;
                    let beyond = right.structure().and_then(|s| s.right_sibling);
                    let mut node = self.page_mut().prepare(left_key)?;
                    if let Some(st) = node.structure_mut() {
                        st.right_sibling = beyond;
                    }
                    self.page_mut().finish(node)?;
                    if let Some(beyond_key) = beyond {
                        let mut node = self.page_mut().prepare(beyond_key)?;
                        if let Some(st) = node.structure_mut() {
                            st.left_sibling = Some(left_key);
                        }
                        self.page_mut().finish(node)?;
                    }
                    let mut parent = self.page_mut().prepare(parent_key)?;
                    if let Some(ps) = parent.structure_mut() {
                        ps.child_count -= 1;
                    }
                    self.page_mut().finish(parent)?;
                    self.page_mut().remove(right_key)?;
                }
            }
        }
        Ok(())
    }

    fn attach_links(
        &mut self,
        from: NodeKey,
        anchor_key: NodeKey,
        position: InsertPosition,
    ) -> Result<()> {
        let anchor = self.fetch(anchor_key)?;
        match position {
            InsertPosition::FirstChild => {
                let old_first = anchor.structure().and_then(|s| s.first_child);
                let mut node = self.page_mut().prepare(from)?;
                node.set_parent(Some(anchor_key));
                if let Some(st) = node.structure_mut() {
                    st.left_sibling = None;
                    st.right_sibling = old_first;
                }
                self.page_mut().finish(node)?;

                let mut parent = self.page_mut().prepare(anchor_key)?;
                if let Some(ps) = parent.structure_mut() {
                    ps.first_child = Some(from);
                    ps.child_count += 1;
                }
                self.page_mut().finish(parent)?;

                if let Some(first) = old_first {
                    let mut node = self.page_mut().prepare(first)?;
                    if let Some(st) = node.structure_mut() {
                        st.left_sibling = Some(from);
                    }
                    self.page_mut().finish(node)?;
                }
            }
            InsertPosition::RightSibling => {
                let old_right = anchor.structure().and_then(|s| s.right_sibling);
                let parent_key = anchor
                    .parent()
                    .ok_or_else(|| XylemError::invariant("sibling anchor without parent"))?;
                let mut node = self.page_mut().prepare(from)?;
                node.set_parent(Some(parent_key));
                if let Some(st) = node.structure_mut() {
                    st.left_sibling = Some(anchor_key);
                    st.right_sibling = old_right;
                }
                self.page_mut().finish(node)?;

                let mut left = self.page_mut().prepare(anchor_key)?;
                if let Some(st) = left.structure_mut() {
                    st.right_sibling = Some(from);
                }
                self.page_mut().finish(left)?;

                if let Some(right) = old_right {
                    let mut node = self.page_mut().prepare(right)?;
                    if let Some(st) = node.structure_mut() {
                        st.left_sibling = Some(from);
                    }
                    self.page_mut().finish(node)?;
                }

                let mut parent = self.page_mut().prepare(parent_key)?;
                if let Some(ps) = parent.structure_mut() {
                    ps.child_count += 1;
                }
                self.page_mut().finish(parent)?;
            }
            InsertPosition::LeftSibling => {
                return Err(XylemError::invariant(
                    "left-sibling moves lower onto the primitive positions",
                ));
            }
        }
        self.merge_after_attach(from)
    }

    /// Collapse text adjacencies created by attaching `from`.
    fn merge_after_attach(&mut self, from: NodeKey) -> Result<()> {
        let node = self.fetch(from)?;
        if node.kind() != NodeKind::Text {
            return Ok(());
        }
        let parent_key = node
            .parent()
            .ok_or_else(|| XylemError::invariant("attached node without parent"))?;

        let right = node.structure().and_then(|s| s.right_sibling);
        if let Some(right_key) = right {
            let sibling = self.fetch(right_key)?;
            if sibling.kind() == NodeKind::Text {
                let merged = format!("{} {}", value_text(&node)?, value_text(&sibling)?);
                // The sibling's contribution is still part of the tree; the
                // moved node's is re-added only after the merge.
                self.hash_remove_for(right_key)?;
                let beyond = sibling.structure().and_then(|s| s.right_sibling);
                let mut prepared = self.page_mut().prepare(from)?;
                *prepared
                    .value_mut()
                    .ok_or_else(|| XylemError::invariant("text node without value"))? =
                    encode_value(&merged, self.compression)?;
                if let Some(st) = prepared.structure_mut() {
                    st.right_sibling = beyond;
                }
                self.page_mut().finish(prepared)?;
                if let Some(beyond_key) = beyond {
                    let mut n = self.page_mut().prepare(beyond_key)?;
                    if let Some(st) = n.structure_mut() {
                        st.left_sibling = Some(from);
                    }
                    self.page_mut().finish(n)?;
                }
                let mut parent = self.page_mut().prepare(parent_key)?;
                if let Some(ps) = parent.structure_mut() {
                    ps.child_count -= 1;
                }
                self.page_mut().finish(parent)?;
                self.page_mut().remove(right_key)?;
            }
        }

        let node = self.fetch(from)?;
        let left = node.structure().and_then(|s| s.left_sibling);
        if let Some(left_key) = left {
            let sibling = self.fetch(left_key)?;
            if sibling.kind() == NodeKind::Text {
                let merged = format!("{} {}", value_text(&sibling)?, value_text(&node)?);
                self.hash_remove_for(left_key)?;
                let before = sibling.structure().and_then(|s| s.left_sibling);
                let mut prepared = self.page_mut().prepare(from)?;
                *prepared
                    .value_mut()
                    .ok_or_else(|| XylemError::invariant("text node without value"))? =
                    encode_value(&merged, self.compression)?;
                if let Some(st) = prepared.structure_mut() {
                    st.left_sibling = before;
                }
                self.page_mut().finish(prepared)?;
                match before {
                    Some(k) => {
                        let mut n = self.page_mut().prepare(k)?;
                        if let Some(st) = n.structure_mut() {
                            st.right_sibling = Some(from);
                        }
                        self.page_mut().finish(n)?;
                    }
                    None => {
                        let mut parent = self.page_mut().prepare(parent_key)?;
                        if let Some(ps) = parent.structure_mut() {
                            ps.first_child = Some(from);
                        }
                        self.page_mut().finish(parent)?;
                    }
                }
                let mut parent = self.page_mut().prepare(parent_key)?;
                if let Some(ps) = parent.structure_mut() {
                    ps.child_count -= 1;
                }
                self.page_mut().finish(parent)?;
                self.page_mut().remove(left_key)?;
            }
        }
        Ok(())
    }

    // --- set operations ---------------------------------------------------

    pub(crate) fn set_qname(&mut self, name: &QName) -> Result<()> {
        if !name.is_valid() {
            return Err(XylemError::InvalidQName {
                name: name.build_name(),
            });
        }
        let node = self.cursor().clone();
        let kind = node.kind();
        let Some(delegate) = node.name().copied() else {
            return Err(XylemError::wrong_kind("set_qname", kind.as_str()));
        };
        if self.read.qname()?.as_ref() == Some(name) {
            return Ok(());
        }
        self.check_access_and_commit()?;

        let old_intrinsic = crate::hash::intrinsic_hash(&node);
        self.page_mut().remove_name(delegate.name_key, kind)?;
        self.page_mut()
            .remove_name(delegate.uri_key, NodeKind::Namespace)?;
        let name_key = self
            .page_mut()
            .create_name_key(&name.build_name(), kind)?;
        let uri_key = self
            .page_mut()
            .create_name_key(&name.uri, NodeKind::Namespace)?;

        let mut prepared = self.page_mut().prepare(node.key())?;
        if let Some(d) = prepared.name_mut() {
            d.name_key = name_key;
            d.uri_key = uri_key;
        }
        self.page_mut().finish(prepared)?;
        self.read.refresh()?;
        self.hash_update_for(node.key(), old_intrinsic)?;
        self.read.refresh()
    }

    pub(crate) fn set_uri(&mut self, uri: &str) -> Result<()> {
        let node = self.cursor().clone();
        let Some(delegate) = node.name().copied() else {
            return Err(XylemError::wrong_kind("set_uri", node.kind().as_str()));
        };
        let current = self
            .page()
            .name(delegate.uri_key, NodeKind::Namespace)?
            .unwrap_or_default();
        if current == uri {
            return Ok(());
        }
        self.check_access_and_commit()?;

        let old_intrinsic = crate::hash::intrinsic_hash(&node);
        self.page_mut()
            .remove_name(delegate.uri_key, NodeKind::Namespace)?;
        let uri_key = self.page_mut().create_name_key(uri, NodeKind::Namespace)?;

        let mut prepared = self.page_mut().prepare(node.key())?;
        if let Some(d) = prepared.name_mut() {
            d.uri_key = uri_key;
        }
        self.page_mut().finish(prepared)?;
        self.read.refresh()?;
        self.hash_update_for(node.key(), old_intrinsic)?;
        self.read.refresh()
    }

    pub(crate) fn set_value(&mut self, value: &str) -> Result<()> {
        let node = self.cursor().clone();
        if node.value().is_none() {
            return Err(XylemError::wrong_kind("set_value", node.kind().as_str()));
        }
        if value_text(&node)? == value {
            return Ok(());
        }
        self.check_access_and_commit()?;
        self.set_value_internal(value)
    }

    /// Write a new value on the cursor node and fold the change into the
    /// ancestor hashes. Does not touch the modification counter.
    fn set_value_internal(&mut self, value: &str) -> Result<()> {
        let node = self.cursor().clone();
        let old_intrinsic = crate::hash::intrinsic_hash(&node);
        let compress = self.compression && node.kind() == NodeKind::Text;
        let mut prepared = self.page_mut().prepare(node.key())?;
        *prepared
            .value_mut()
            .ok_or_else(|| XylemError::wrong_kind("set_value", node.kind().as_str()))? =
            encode_value(value, compress)?;
        self.page_mut().finish(prepared)?;
        self.read.refresh()?;
        self.hash_update_for(node.key(), old_intrinsic)?;
        self.read.refresh()
    }

    /// Value write for a text merge while neighboring nodes are mid-removal.
    ///
    /// Rolling hashes fold the change along the ancestor chain immediately.
    /// The postorder kind must not recompute the chain here, because the
    /// sibling chain still references the node being merged away — but the
    /// kept leaf's own hash is re-seeded (a text leaf's `H` is exactly its
    /// intrinsic fold), so the caller's `postorder_chain` repair from the
    /// parent reads a fresh contribution once the links are rewired.
    fn set_value_for_merge(&mut self, key: NodeKey, value: &str) -> Result<()> {
        if !self.read.move_to(key) {
            return Err(XylemError::InvalidNodeKey { key: key.get() });
        }
        let node = self.cursor().clone();
        let old_intrinsic = crate::hash::intrinsic_hash(&node);
        let compress = self.compression && node.kind() == NodeKind::Text;
        let mut prepared = self.page_mut().prepare(node.key())?;
        *prepared
            .value_mut()
            .ok_or_else(|| XylemError::wrong_kind("set_value", node.kind().as_str()))? =
            encode_value(value, compress)?;
        if self.hash_kind == HashKind::Postorder && !self.skip_maintenance() {
            let seed = crate::hash::intrinsic_hash(&prepared);
            prepared.set_hash(seed);
        }
        self.page_mut().finish(prepared)?;
        self.read.refresh()?;
        if self.hash_kind == HashKind::Rolling {
            self.hash_update_rolling(key, old_intrinsic)?;
            self.read.refresh()?;
        }
        Ok(())
    }

    // --- replace and copy -------------------------------------------------

    fn assert_replaceable(&self) -> Result<Node> {
        let node = self.cursor().clone();
        match node.kind() {
            NodeKind::Element | NodeKind::Text => Ok(node),
            kind => Err(XylemError::wrong_kind("replace", kind.as_str())),
        }
    }

    pub(crate) fn replace_with_text(&mut self, value: &str) -> Result<()> {
        let old = self.assert_replaceable()?;
        self.check_access_and_commit()?;
        let old_key = old.key();
        if let Some(left) = old.structure().and_then(|s| s.left_sibling) {
            self.read.move_to(left);
            self.insert_text(InsertPosition::RightSibling, value)?;
        } else {
            self.read.move_to_parent();
            self.insert_text(InsertPosition::FirstChild, value)?;
        }
        let new_key = self.read.node_key();
        self.read.move_to(old_key);
        self.remove_current()?;
        self.read.move_to(new_key);
        Ok(())
    }

    pub(crate) fn replace_with_subtree<R: PageReadTrx>(
        &mut self,
        src: &mut NodeReadTrx<R>,
    ) -> Result<()> {
        match src.kind() {
            NodeKind::DocumentRoot | NodeKind::Element | NodeKind::Text => {
                let old = self.assert_replaceable()?;
                let old_key = old.key();
                if let Some(left) = old.structure().and_then(|s| s.left_sibling) {
                    self.read.move_to(left);
                    self.copy_subtree(src, InsertPosition::RightSibling)?;
                } else {
                    self.read.move_to_parent();
                    self.copy_subtree(src, InsertPosition::FirstChild)?;
                }
                let new_key = self.read.node_key();
                self.read.move_to(old_key);
                self.remove_current()?;
                self.read.move_to(new_key);
                Ok(())
            }
            NodeKind::Attribute => {
                if self.cursor().kind() != NodeKind::Attribute {
                    return Err(XylemError::wrong_kind(
                        "replace_with_attribute",
                        self.cursor().kind().as_str(),
                    ));
                }
                let name = src
                    .qname()?
                    .ok_or_else(|| XylemError::invariant("attribute source without name"))?;
                let value = src.value()?.unwrap_or_default();
                self.remove_current()?;
                self.insert_attribute(&name, &value, Movement::None)
            }
            NodeKind::Namespace => {
                if self.cursor().kind() != NodeKind::Namespace {
                    return Err(XylemError::wrong_kind(
                        "replace_with_namespace",
                        self.cursor().kind().as_str(),
                    ));
                }
                let name = src
                    .qname()?
                    .ok_or_else(|| XylemError::invariant("namespace source without name"))?;
                self.remove_current()?;
                self.insert_namespace(&name, Movement::None)
            }
        }
    }

    pub(crate) fn replace_with_events<I>(&mut self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = crate::shred::SubtreeEvent>,
    {
        let old = self.assert_replaceable()?;
        let old_key = old.key();
        let position = if let Some(left) = old.structure().and_then(|s| s.left_sibling) {
            self.read.move_to(left);
            InsertPosition::RightSibling
        } else {
            self.read.move_to_parent();
            InsertPosition::FirstChild
        };
        let Some(new_key) = self.insert_subtree_inner(events, position)? else {
            self.read.move_to(old_key);
            return Err(XylemError::invariant(
                "replacement event stream produced no nodes",
            ));
        };
        self.read.move_to(old_key);
        self.remove_current()?;
        self.read.move_to(new_key);
        Ok(())
    }

    pub(crate) fn copy_subtree<R: PageReadTrx>(
        &mut self,
        src: &mut NodeReadTrx<R>,
        position: InsertPosition,
    ) -> Result<()> {
        self.check_access_and_commit()?;
        let src_origin = src.node_key();
        if src.kind() == NodeKind::DocumentRoot && !src.move_to_first_child() {
            return Err(XylemError::invariant("cannot copy an empty document"));
        }
        if !matches!(src.kind(), NodeKind::Element | NodeKind::Text) {
            let kind = src.kind();
            src.move_to(src_origin);
            return Err(XylemError::wrong_kind("copy_subtree", kind.as_str()));
        }

        self.insert_from_source(src, position)?;
        let copied_root = self.read.node_key();

        let mut depth = 0usize;
        'outer: loop {
            if src.kind() == NodeKind::Element && src.move_to_first_child() {
                depth += 1;
                self.insert_from_source(src, InsertPosition::FirstChild)?;
                continue 'outer;
            }
            loop {
                if depth == 0 {
                    break 'outer;
                }
                if src.move_to_right_sibling() {
                    self.insert_from_source(src, InsertPosition::RightSibling)?;
                    continue 'outer;
                }
                if !src.move_to_parent() {
                    return Err(XylemError::invariant(
                        "source cursor escaped the copied subtree",
                    ));
                }
                self.read.move_to_parent();
                depth -= 1;
            }
        }

        src.move_to(src_origin);
        self.read.move_to(copied_root);
        Ok(())
    }

    /// Re-issue the node under the source cursor against this transaction.
    fn insert_from_source<R: PageReadTrx>(
        &mut self,
        src: &mut NodeReadTrx<R>,
        position: InsertPosition,
    ) -> Result<()> {
        match src.kind() {
            NodeKind::Element => {
                let name = src
                    .qname()?
                    .ok_or_else(|| XylemError::invariant("element source without name"))?;
                self.insert_element(position, &name)?;
                let namespaces = src.namespace_count();
                for index in 0..namespaces {
                    src.move_to_namespace(index);
                    let declaration = src
                        .qname()?
                        .ok_or_else(|| XylemError::invariant("namespace source without name"))?;
                    self.insert_namespace(&declaration, Movement::ToParent)?;
                    src.move_to_parent();
                }
                let attributes = src.attribute_count();
                for index in 0..attributes {
                    src.move_to_attribute(index);
                    let name = src
                        .qname()?
                        .ok_or_else(|| XylemError::invariant("attribute source without name"))?;
                    let value = src.value()?.unwrap_or_default();
                    self.insert_attribute(&name, &value, Movement::ToParent)?;
                    src.move_to_parent();
                }
                Ok(())
            }
            NodeKind::Text => {
                let value = src.value()?.unwrap_or_default();
                self.insert_text(position, &value)
            }
            kind => Err(XylemError::wrong_kind("copy_subtree", kind.as_str())),
        }
    }

    // --- lifecycle --------------------------------------------------------

    pub(crate) fn commit_internal(&mut self) -> Result<()> {
        self.read.assert_open()?;

        let root = self.fetch(NodeKey::DOCUMENT_ROOT)?;
        let root_children = root.structure().map_or(0, |s| s.child_count);
        if root_children > 1 {
            return Err(XylemError::invariant(
                "document root must not have more than one child",
            ));
        }

        // Eventual consistency defers hash and count maintenance during the
        // bootstrap revision; repair everything in one pass before the
        // first publish.
        if self.consistency == Consistency::Eventual
            && self.page().is_bootstrap()
            && self.modifications > 0
        {
            self.post_order_repair(NodeKey::DOCUMENT_ROOT)?;
        }

        let uber = self.page_mut().commit()?;
        self.session.set_last_committed(uber);
        info!(
            trx_id = self.trx_id,
            revision = %uber.revision,
            modifications = self.modifications,
            max_node_key = %uber.max_node_key,
            "commit"
        );
        self.modifications = 0;
        self.rotate_page_trx(uber.revision, uber.revision.next())
    }

    pub(crate) fn abort_internal(&mut self) -> Result<()> {
        self.read.assert_open()?;
        let last = self.session.last_committed_revision();
        info!(trx_id = self.trx_id, revision = %last, "abort");
        self.modifications = 0;
        self.rotate_page_trx(last, last.next())
    }

    pub(crate) fn revert_to_internal(&mut self, revision: Revision) -> Result<()> {
        self.read.assert_open()?;
        self.session.assert_access(revision)?;
        let current = self.page().revision();
        let write_revision = Revision::new(current.get().saturating_sub(1));
        info!(trx_id = self.trx_id, target = %revision, "revert");
        self.rotate_page_trx(revision, write_revision)?;
        self.modifications = 0;
        self.read.move_to_document_root();
        Ok(())
    }

    fn rotate_page_trx(&mut self, read_revision: Revision, write_revision: Revision) -> Result<()> {
        self.page_mut().close();
        let page = self
            .session
            .begin_page_write_trx(self.trx_id, read_revision, write_revision)?;
        self.read.replace_page(page)?;
        Ok(())
    }

    pub(crate) fn close_internal(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.modifications > 0 {
            return Err(XylemError::DirtyClose {
                modifications: self.modifications,
            });
        }
        self.force_close();
        Ok(())
    }

    pub(crate) fn force_close(&mut self) {
        self.page_mut().close();
        self.session.close_write_trx(self.trx_id);
        self.read.close();
    }
}
