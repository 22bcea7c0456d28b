//! Bulk subtree ingest from an abstract event stream.
//!
//! The core does not parse XML; a host-side shredder lowers its input onto
//! [`SubtreeEvent`]s and the driver here replays them through the editor
//! with `bulk_insert` set, so per-edit hash and count maintenance is
//! deferred to one post-order pass per ingested root plus an ancestor fold.

use tracing::debug;

use xylem_error::{Result, XylemError};
use xylem_store::Session;
use xylem_types::{NodeKey, QName};

use crate::write::{InsertPosition, Movement, WriteTrxInner};

/// One event of a document-order subtree description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtreeEvent {
    StartDocument,
    EndDocument,
    StartElement {
        name: QName,
        /// Attribute name/value pairs in document order.
        attributes: Vec<(QName, String)>,
        /// Namespace declarations; the declared prefix rides in the qname.
        namespaces: Vec<QName>,
    },
    Text(String),
    EndElement,
}

impl<S: Session> WriteTrxInner<S> {
    /// Drive an event stream into the tree at `position` relative to the
    /// cursor. Returns the key of the first ingested root, or `None` for an
    /// empty stream. The cursor ends on that root.
    pub(crate) fn insert_subtree_inner<I>(
        &mut self,
        events: I,
        position: InsertPosition,
    ) -> Result<Option<NodeKey>>
    where
        I: IntoIterator<Item = SubtreeEvent>,
    {
        self.read.assert_open()?;
        let origin = self.read.node_key();

        self.bulk_insert = true;
        let outcome = self.drive_events(events, position);
        self.bulk_insert = false;
        let (first, roots) = outcome?;

        let Some(first_key) = first else {
            self.read.move_to(origin);
            return Ok(None);
        };
        for root in roots {
            self.bulk_repair(root)?;
        }
        self.read.move_to(first_key);
        self.read.refresh()?;
        debug!(root = %first_key, "bulk insert complete");
        Ok(Some(first_key))
    }

    /// Replay the events through the editor. Returns the first inserted
    /// key and the element roots needing post-order repair.
    fn drive_events<I>(
        &mut self,
        events: I,
        position: InsertPosition,
    ) -> Result<(Option<NodeKey>, Vec<NodeKey>)>
    where
        I: IntoIterator<Item = SubtreeEvent>,
    {
        let mut first: Option<NodeKey> = None;
        let mut roots: Vec<NodeKey> = Vec::new();
        let mut open: Vec<NodeKey> = Vec::new();
        let mut pending = position;

        for event in events {
            match event {
                SubtreeEvent::StartDocument | SubtreeEvent::EndDocument => {}
                SubtreeEvent::StartElement {
                    name,
                    attributes,
                    namespaces,
                } => {
                    self.insert_element(pending, &name)?;
                    for declaration in &namespaces {
                        self.insert_namespace(declaration, Movement::ToParent)?;
                    }
                    for (attribute, value) in &attributes {
                        self.insert_attribute(attribute, value, Movement::ToParent)?;
                    }
                    let key = self.read.node_key();
                    if open.is_empty() {
                        roots.push(key);
                        first.get_or_insert(key);
                    }
                    open.push(key);
                    pending = InsertPosition::FirstChild;
                }
                SubtreeEvent::Text(value) => {
                    if value.is_empty() {
                        continue;
                    }
                    if open.is_empty() {
                        // A top-level text may merge into a neighbor that
                        // predates this ingest; run it with full
                        // maintenance instead of repairing it as a root.
                        self.bulk_insert = false;
                        let result = self.insert_text(pending, &value);
                        self.bulk_insert = true;
                        result?;
                        first.get_or_insert(self.read.node_key());
                    } else {
                        self.insert_text(pending, &value)?;
                    }
                    pending = InsertPosition::RightSibling;
                }
                SubtreeEvent::EndElement => {
                    let key = open
                        .pop()
                        .ok_or_else(|| XylemError::invariant("unbalanced end-element event"))?;
                    if !self.read.move_to(key) {
                        return Err(XylemError::invariant(
                            "ingested element vanished during bulk insert",
                        ));
                    }
                    pending = InsertPosition::RightSibling;
                }
            }
        }
        if !open.is_empty() {
            return Err(XylemError::invariant("unbalanced start-element event"));
        }
        Ok((first, roots))
    }
}
