//! In-memory revision store.
//!
//! Committed revisions are immutable snapshots behind `Arc`; the single
//! write transaction layers a dirty log and a tombstone set over its base
//! snapshot and publishes a merged snapshot on commit. Readers holding
//! older revisions are never blocked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use xylem_error::{Result, XylemError};
use xylem_types::qname::name_hash;
use xylem_types::{
    NameKey, Node, NodeKey, NodeKind, ResourceConfig, Revision, TrxId, UberPage,
};

use crate::traits::{PageReadTrx, PageWriteTrx, Session};

/// Refcounted name dictionary, keyed by `(kind, name hash)`.
#[derive(Debug, Clone, Default)]
struct NameDictionary {
    entries: HashMap<(NodeKind, NameKey), NameEntry>,
}

#[derive(Debug, Clone)]
struct NameEntry {
    text: String,
    refs: u32,
}

impl NameDictionary {
    fn register(&mut self, text: &str, kind: NodeKind) -> NameKey {
        let key = name_hash(text);
        self.entries
            .entry((kind, key))
            .and_modify(|e| e.refs += 1)
            .or_insert_with(|| NameEntry {
                text: text.to_owned(),
                refs: 1,
            });
        key
    }

    fn release(&mut self, key: NameKey, kind: NodeKind) {
        match self.entries.get_mut(&(kind, key)) {
            Some(entry) if entry.refs > 1 => entry.refs -= 1,
            Some(_) => {
                self.entries.remove(&(kind, key));
            }
            None => warn!(name_key = %key, kind = kind.as_str(), "released an unregistered name"),
        }
    }

    fn lookup(&self, key: NameKey, kind: NodeKind) -> Option<&str> {
        self.entries.get(&(kind, key)).map(|e| e.text.as_str())
    }

    fn refs(&self, key: NameKey, kind: NodeKind) -> u32 {
        self.entries.get(&(kind, key)).map_or(0, |e| e.refs)
    }
}

/// One committed revision.
#[derive(Debug)]
struct Snapshot {
    revision: Revision,
    nodes: HashMap<NodeKey, Node>,
    names: NameDictionary,
    max_node_key: NodeKey,
}

impl Snapshot {
    fn bootstrap() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeKey::DOCUMENT_ROOT, Node::document_root());
        Self {
            revision: Revision::BOOTSTRAP,
            nodes,
            names: NameDictionary::default(),
            max_node_key: NodeKey::DOCUMENT_ROOT,
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    revisions: Vec<Arc<Snapshot>>,
    writer: Option<TrxId>,
    last_committed: UberPage,
}

/// An in-memory resource: the session implementation over the snapshot store.
#[derive(Clone)]
pub struct MemResource {
    inner: Arc<RwLock<StoreInner>>,
    config: ResourceConfig,
}

impl MemResource {
    /// Create a resource holding only the bootstrap revision.
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                revisions: vec![Arc::new(Snapshot::bootstrap())],
                writer: None,
                last_committed: UberPage {
                    revision: Revision::BOOTSTRAP,
                    is_bootstrap: true,
                    max_node_key: NodeKey::DOCUMENT_ROOT,
                },
            })),
            config,
        }
    }

    /// Number of published revisions, bootstrap included.
    pub fn revision_count(&self) -> usize {
        self.inner.read().revisions.len()
    }

    /// Live reference count of a dictionary entry in the newest revision.
    /// Exposed for consistency checks in tests.
    pub fn name_refs(&self, key: NameKey, kind: NodeKind) -> u32 {
        let inner = self.inner.read();
        inner
            .revisions
            .last()
            .map_or(0, |s| s.names.refs(key, kind))
    }

    fn snapshot(&self, revision: Revision) -> Result<Arc<Snapshot>> {
        let inner = self.inner.read();
        inner
            .revisions
            .get(revision.get() as usize)
            .cloned()
            .ok_or(XylemError::RevisionNotAccessible {
                requested: revision.get(),
                newest: (inner.revisions.len() - 1) as u64,
            })
    }
}

impl Session for MemResource {
    type ReadTrx = MemPageReadTrx;
    type WriteTrx = MemPageWriteTrx;

    fn begin_page_read_trx(&self, revision: Revision) -> Result<MemPageReadTrx> {
        Ok(MemPageReadTrx {
            snapshot: self.snapshot(revision)?,
        })
    }

    fn begin_page_write_trx(
        &self,
        trx_id: TrxId,
        read_revision: Revision,
        write_revision: Revision,
    ) -> Result<MemPageWriteTrx> {
        let base = self.snapshot(read_revision)?;
        {
            let mut inner = self.inner.write();
            match inner.writer {
                Some(owner) if owner != trx_id => return Err(XylemError::WriterAlreadyOpen),
                _ => inner.writer = Some(trx_id),
            }
        }
        debug!(trx_id, read = %read_revision, write = %write_revision, "page write trx opened");
        Ok(MemPageWriteTrx {
            store: Arc::clone(&self.inner),
            names: base.names.clone(),
            max_node_key: base.max_node_key,
            base,
            log: HashMap::new(),
            removed: HashSet::new(),
            prepared: HashSet::new(),
            write_revision,
        })
    }

    fn close_write_trx(&self, trx_id: TrxId) {
        let mut inner = self.inner.write();
        if inner.writer == Some(trx_id) {
            inner.writer = None;
        }
    }

    fn assert_access(&self, revision: Revision) -> Result<()> {
        let inner = self.inner.read();
        if (revision.get() as usize) < inner.revisions.len() {
            Ok(())
        } else {
            Err(XylemError::RevisionNotAccessible {
                requested: revision.get(),
                newest: (inner.revisions.len() - 1) as u64,
            })
        }
    }

    fn set_last_committed(&self, uber: UberPage) {
        self.inner.write().last_committed = uber;
    }

    fn last_committed_revision(&self) -> Revision {
        self.inner.read().last_committed.revision
    }

    fn config(&self) -> ResourceConfig {
        self.config
    }
}

/// Read-only view over one snapshot.
pub struct MemPageReadTrx {
    snapshot: Arc<Snapshot>,
}

impl PageReadTrx for MemPageReadTrx {
    fn get(&self, key: NodeKey) -> Result<Option<Node>> {
        Ok(self.snapshot.nodes.get(&key).cloned())
    }

    fn name(&self, key: NameKey, kind: NodeKind) -> Result<Option<String>> {
        Ok(self.snapshot.names.lookup(key, kind).map(str::to_owned))
    }

    fn revision(&self) -> Revision {
        self.snapshot.revision
    }

    fn max_node_key(&self) -> NodeKey {
        self.snapshot.max_node_key
    }
}

/// The single write transaction's page view: base snapshot + dirty log.
#[derive(Debug)]
pub struct MemPageWriteTrx {
    store: Arc<RwLock<StoreInner>>,
    base: Arc<Snapshot>,
    log: HashMap<NodeKey, Node>,
    removed: HashSet<NodeKey>,
    prepared: HashSet<NodeKey>,
    names: NameDictionary,
    max_node_key: NodeKey,
    write_revision: Revision,
}

impl PageReadTrx for MemPageWriteTrx {
    fn get(&self, key: NodeKey) -> Result<Option<Node>> {
        if self.removed.contains(&key) {
            return Ok(None);
        }
        if let Some(node) = self.log.get(&key) {
            return Ok(Some(node.clone()));
        }
        Ok(self.base.nodes.get(&key).cloned())
    }

    fn name(&self, key: NameKey, kind: NodeKind) -> Result<Option<String>> {
        Ok(self.names.lookup(key, kind).map(str::to_owned))
    }

    fn revision(&self) -> Revision {
        self.write_revision
    }

    fn max_node_key(&self) -> NodeKey {
        self.max_node_key
    }
}

impl PageWriteTrx for MemPageWriteTrx {
    fn prepare(&mut self, key: NodeKey) -> Result<Node> {
        if !self.prepared.insert(key) {
            return Err(XylemError::invariant(format!(
                "nested prepare for node {key}"
            )));
        }
        match self.get(key)? {
            Some(node) => Ok(node),
            None => {
                self.prepared.remove(&key);
                Err(XylemError::InvalidNodeKey { key: key.get() })
            }
        }
    }

    fn finish(&mut self, node: Node) -> Result<()> {
        let key = node.key();
        if !self.prepared.remove(&key) {
            return Err(XylemError::invariant(format!(
                "finish without prepare for node {key}"
            )));
        }
        self.log.insert(key, node);
        Ok(())
    }

    fn create(&mut self, node: Node) -> Result<Node> {
        let key = node.key();
        if key != self.max_node_key.next() {
            return Err(XylemError::invariant(format!(
                "created node {key} out of allocation order (expected {})",
                self.max_node_key.next()
            )));
        }
        self.max_node_key = key;
        self.removed.remove(&key);
        self.log.insert(key, node.clone());
        Ok(node)
    }

    fn remove(&mut self, key: NodeKey) -> Result<()> {
        if self.get(key)?.is_none() {
            return Err(XylemError::InvalidNodeKey { key: key.get() });
        }
        self.log.remove(&key);
        self.removed.insert(key);
        Ok(())
    }

    fn create_name_key(&mut self, text: &str, kind: NodeKind) -> Result<NameKey> {
        Ok(self.names.register(text, kind))
    }

    fn remove_name(&mut self, key: NameKey, kind: NodeKind) -> Result<()> {
        self.names.release(key, kind);
        Ok(())
    }

    fn is_bootstrap(&self) -> bool {
        self.store.read().revisions.len() == 1
    }

    fn commit(&mut self) -> Result<UberPage> {
        let mut inner = self.store.write();
        let revision = Revision::new(inner.revisions.len() as u64);
        let mut nodes = self.base.nodes.clone();
        for key in &self.removed {
            nodes.remove(key);
        }
        for (key, node) in self.log.drain() {
            nodes.insert(key, node);
        }
        let snapshot = Arc::new(Snapshot {
            revision,
            nodes,
            names: self.names.clone(),
            max_node_key: self.max_node_key,
        });
        inner.revisions.push(Arc::clone(&snapshot));
        self.removed.clear();
        self.base = snapshot;
        debug!(revision = %revision, max_node_key = %self.max_node_key, "revision published");
        Ok(UberPage {
            revision,
            is_bootstrap: false,
            max_node_key: self.max_node_key,
        })
    }

    fn close(&mut self) {
        self.log.clear();
        self.removed.clear();
        self.prepared.clear();
    }
}
