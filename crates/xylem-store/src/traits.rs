//! Trait hierarchy for page-level access.
//!
//! Split read/write the way the storage stack consumes them: read
//! transactions and the cursor only ever need [`PageReadTrx`]; the write
//! transaction additionally drives the copy-on-write protocol of
//! [`PageWriteTrx`]. Tree invariants are never validated here — that is the
//! structural editor's job.

use xylem_error::Result;
use xylem_types::{NameKey, Node, NodeKey, NodeKind, ResourceConfig, Revision, TrxId, UberPage};

/// Read-only page access scoped to one revision.
pub trait PageReadTrx {
    /// Fetch a node by key. `None` for unallocated or removed keys.
    fn get(&self, key: NodeKey) -> Result<Option<Node>>;

    /// Resolve a name-dictionary key registered under `kind`.
    fn name(&self, key: NameKey, kind: NodeKind) -> Result<Option<String>>;

    /// The revision this transaction reads (for a write transaction, the
    /// revision under construction).
    fn revision(&self) -> Revision;

    /// Highest node key allocated so far.
    fn max_node_key(&self) -> NodeKey;
}

/// Mutating page access for the single writer.
///
/// Field writes happen exclusively between [`prepare`](Self::prepare) and
/// [`finish`](Self::finish); the pair must not nest for one key. `prepare`
/// hands out a copy living in the revision under construction, so every
/// mutation is copy-on-write with respect to committed revisions.
pub trait PageWriteTrx: PageReadTrx {
    /// Acquire a node for modification.
    fn prepare(&mut self, key: NodeKey) -> Result<Node>;

    /// Release a modified node back to the page.
    fn finish(&mut self, node: Node) -> Result<()>;

    /// Persist a freshly built node. The node's key must be the next
    /// allocation (`max_node_key + 1`); the revision root page advances.
    fn create(&mut self, node: Node) -> Result<Node>;

    /// Mark a node key dead in the revision under construction.
    fn remove(&mut self, key: NodeKey) -> Result<()>;

    /// Register a name under `kind`, bumping its refcount.
    fn create_name_key(&mut self, text: &str, kind: NodeKind) -> Result<NameKey>;

    /// Release one reference to a name; the entry is freed on last release.
    fn remove_name(&mut self, key: NameKey, kind: NodeKind) -> Result<()>;

    /// Whether the resource has never committed a user revision.
    fn is_bootstrap(&self) -> bool;

    /// Publish the revision under construction and return its uber page.
    fn commit(&mut self) -> Result<UberPage>;

    /// Drop all uncommitted state.
    fn close(&mut self);
}

/// The session owning a resource: hands out page transactions and tracks
/// the last committed uber page.
pub trait Session: Send + Sync + 'static {
    type ReadTrx: PageReadTrx;
    type WriteTrx: PageWriteTrx + Send;

    /// Open a read-only page transaction on a committed revision.
    fn begin_page_read_trx(&self, revision: Revision) -> Result<Self::ReadTrx>;

    /// Open the write page transaction reading from `read_revision` and
    /// constructing `write_revision`. At most one live writer per resource;
    /// the transaction id may rotate its own page transaction freely.
    fn begin_page_write_trx(
        &self,
        trx_id: TrxId,
        read_revision: Revision,
        write_revision: Revision,
    ) -> Result<Self::WriteTrx>;

    /// Deregister the writer.
    fn close_write_trx(&self, trx_id: TrxId);

    /// Fail unless `revision` has been published.
    fn assert_access(&self, revision: Revision) -> Result<()>;

    /// Record the uber page of a successful commit.
    fn set_last_committed(&self, uber: UberPage);

    /// Revision of the last committed uber page.
    fn last_committed_revision(&self) -> Revision;

    /// Resource configuration (hash kind, consistency, compression).
    fn config(&self) -> ResourceConfig;
}
