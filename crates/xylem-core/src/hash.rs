//! Subtree hash maintenance.
//!
//! Every node stores `H(n)`, defined by the recurrence
//!
//! ```text
//! H(n) = h(n) + P * sum of H(c) over children, attributes and namespaces
//! ```
//!
//! with `h(n)` a 64-bit fold of the node's intrinsic fields and `P` a fixed
//! prime. All arithmetic wraps. The `Rolling` kind maintains the recurrence
//! incrementally along the ancestor axis; `Postorder` recomputes the changed
//! node and its ancestors from their children; `None` skips hashes but the
//! same ancestor walk still carries the descendant-count deltas, so the
//! count invariants hold under every kind.
//!
//! Maintenance is suppressed during bulk insert and, under eventual
//! consistency, while the uber page is still bootstrap; the post-order
//! repair pass rebuilds both hashes and descendant counts in those modes.

use xxhash_rust::xxh3::xxh3_64;

use xylem_error::Result;
use xylem_store::{PageWriteTrx, Session};
use xylem_types::{Consistency, HashKind, Node, NodeKey, NodeKind};

use crate::axis;
use crate::write::WriteTrxInner;

/// Prime scaling child contributions into a parent hash.
pub(crate) const PRIME: u64 = 77081;

const fn kind_tag(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::DocumentRoot => 0,
        NodeKind::Element => 1,
        NodeKind::Text => 2,
        NodeKind::Attribute => 3,
        NodeKind::Namespace => 4,
    }
}

/// `h(n)`: 64-bit fold of a node's intrinsic, non-link fields.
///
/// The document root has no intrinsic fields and folds to zero, so its
/// stored hash is exactly the prime-scaled sum of its child contributions
/// from the moment the resource bootstraps.
pub(crate) fn intrinsic_hash(node: &Node) -> u64 {
    if node.kind() == NodeKind::DocumentRoot {
        return 0;
    }
    let value_len = node.value().map_or(0, |v| v.value.len());
    let mut buf = Vec::with_capacity(9 + value_len);
    buf.push(kind_tag(node.kind()));
    if let Some(name) = node.name() {
        buf.extend_from_slice(&name.name_key.get().to_le_bytes());
        buf.extend_from_slice(&name.uri_key.get().to_le_bytes());
    }
    if let Some(value) = node.value() {
        buf.extend_from_slice(&value.value);
    }
    xxh3_64(&buf)
}

impl<S: Session> WriteTrxInner<S> {
    /// Whether per-edit maintenance is currently suppressed.
    pub(crate) fn skip_maintenance(&self) -> bool {
        self.bulk_insert
            || (self.consistency == Consistency::Eventual && self.page().is_bootstrap())
    }

    /// Replace one child-level contribution along the ancestor chain of
    /// `start` and carry a descendant-count delta.
    ///
    /// At each ancestor the old contribution is swapped for the new one
    /// (`H <- H - P*old + P*new`); the pre/post hashes cascade upward so the
    /// recurrence stays exact at every level.
    fn ancestor_walk(
        &mut self,
        start: NodeKey,
        mut old_child: u64,
        mut new_child: u64,
        descendant_delta: i64,
        update_hashes: bool,
    ) -> Result<()> {
        let mut key = self.fetch(start)?.parent();
        while let Some(current) = key {
            let mut node = self.page_mut().prepare(current)?;
            if update_hashes {
                let before = node.hash();
                let after = before
                    .wrapping_sub(old_child.wrapping_mul(PRIME))
                    .wrapping_add(new_child.wrapping_mul(PRIME));
                node.set_hash(after);
                old_child = before;
                new_child = after;
            }
            if descendant_delta != 0 {
                if let Some(structure) = node.structure_mut() {
                    structure.descendant_count = if descendant_delta >= 0 {
                        structure.descendant_count + descendant_delta as u64
                    } else {
                        structure
                            .descendant_count
                            .saturating_sub(descendant_delta.unsigned_abs())
                    };
                }
            }
            key = node.parent();
            self.page_mut().finish(node)?;
        }
        Ok(())
    }

    /// Fold a newly inserted node into its ancestor chain.
    pub(crate) fn hash_add_for(&mut self, key: NodeKey) -> Result<()> {
        if self.skip_maintenance() {
            return Ok(());
        }
        let node = self.fetch(key)?;
        let delta = node
            .structure()
            .map_or(0, |s| s.descendant_count as i64 + 1);
        match self.hash_kind {
            HashKind::None => self.ancestor_walk(key, 0, 0, delta, false),
            HashKind::Rolling => {
                let seed = intrinsic_hash(&node);
                let mut prepared = self.page_mut().prepare(key)?;
                prepared.set_hash(seed);
                self.page_mut().finish(prepared)?;
                self.ancestor_walk(key, 0, seed, delta, true)
            }
            HashKind::Postorder => {
                self.ancestor_walk(key, 0, 0, delta, false)?;
                self.postorder_chain(key)
            }
        }
    }

    /// Subtract a node's subtree contribution from its ancestor chain.
    ///
    /// The node's own hash is left intact so a detach/attach pair (move)
    /// can transplant it unchanged. Under `Postorder` the caller repairs
    /// the chain once the links are rewired.
    pub(crate) fn hash_remove_for(&mut self, key: NodeKey) -> Result<()> {
        if self.skip_maintenance() {
            return Ok(());
        }
        let node = self.fetch(key)?;
        let delta = node
            .structure()
            .map_or(0, |s| -(s.descendant_count as i64 + 1));
        match self.hash_kind {
            HashKind::None | HashKind::Postorder => self.ancestor_walk(key, 0, 0, delta, false),
            HashKind::Rolling => self.ancestor_walk(key, node.hash(), 0, delta, true),
        }
    }

    /// Re-add a moved subtree's contribution on its new ancestor chain.
    pub(crate) fn hash_attach_for(&mut self, key: NodeKey) -> Result<()> {
        if self.skip_maintenance() {
            return Ok(());
        }
        let node = self.fetch(key)?;
        let delta = node
            .structure()
            .map_or(0, |s| s.descendant_count as i64 + 1);
        match self.hash_kind {
            HashKind::None => self.ancestor_walk(key, 0, 0, delta, false),
            HashKind::Rolling => {
                // A text value may have changed through a destination-site
                // merge; a text subtree is just the node itself.
                let node = if node.kind() == NodeKind::Text {
                    let mut prepared = self.page_mut().prepare(key)?;
                    let seed = intrinsic_hash(&prepared);
                    prepared.set_hash(seed);
                    self.page_mut().finish(prepared)?;
                    self.fetch(key)?
                } else {
                    node
                };
                self.ancestor_walk(key, 0, node.hash(), delta, true)
            }
            HashKind::Postorder => {
                self.ancestor_walk(key, 0, 0, delta, false)?;
                self.postorder_chain(key)
            }
        }
    }

    /// Fold an intrinsic-field change (rename, value write) into the chain.
    pub(crate) fn hash_update_for(&mut self, key: NodeKey, old_intrinsic: u64) -> Result<()> {
        if self.skip_maintenance() {
            return Ok(());
        }
        match self.hash_kind {
            HashKind::None => Ok(()),
            HashKind::Rolling => self.hash_update_rolling(key, old_intrinsic),
            HashKind::Postorder => self.postorder_chain(key),
        }
    }

    /// The rolling leg of an intrinsic-field update: swap the old fold for
    /// the new one on the node, then cascade along the chain.
    pub(crate) fn hash_update_rolling(&mut self, key: NodeKey, old_intrinsic: u64) -> Result<()> {
        if self.skip_maintenance() {
            return Ok(());
        }
        let node = self.fetch(key)?;
        let new_intrinsic = intrinsic_hash(&node);
        let mut prepared = self.page_mut().prepare(key)?;
        let before = prepared.hash();
        let after = before
            .wrapping_sub(old_intrinsic)
            .wrapping_add(new_intrinsic);
        prepared.set_hash(after);
        self.page_mut().finish(prepared)?;
        self.ancestor_walk(key, before, after, 0, true)
    }

    /// `H(n)` from the defining recurrence, using the stored hashes of the
    /// node's children, attributes and namespaces.
    fn compute_from_children(&self, key: NodeKey) -> Result<u64> {
        let node = self.fetch(key)?;
        let mut sum: u64 = 0;
        let mut child = node.structure().and_then(|s| s.first_child);
        while let Some(child_key) = child {
            let child_node = self.fetch(child_key)?;
            sum = sum.wrapping_add(child_node.hash());
            child = child_node.structure().and_then(|s| s.right_sibling);
        }
        for &attribute in node.attribute_keys() {
            sum = sum.wrapping_add(self.fetch(attribute)?.hash());
        }
        for &namespace in node.namespace_keys() {
            sum = sum.wrapping_add(self.fetch(namespace)?.hash());
        }
        Ok(intrinsic_hash(&node).wrapping_add(PRIME.wrapping_mul(sum)))
    }

    /// Recompute `H` for `key` and every ancestor up to the root.
    ///
    /// A non-structural start (attribute, namespace) re-seeds its own hash
    /// from the intrinsic fold, then the chain continues at its element.
    pub(crate) fn postorder_chain(&mut self, key: NodeKey) -> Result<()> {
        let node = self.fetch(key)?;
        let mut next = if node.structure().is_some() {
            Some(key)
        } else {
            let mut prepared = self.page_mut().prepare(key)?;
            let seed = intrinsic_hash(&prepared);
            prepared.set_hash(seed);
            self.page_mut().finish(prepared)?;
            node.parent()
        };
        while let Some(current) = next {
            let recomputed = self.compute_from_children(current)?;
            let mut prepared = self.page_mut().prepare(current)?;
            prepared.set_hash(recomputed);
            next = prepared.parent();
            self.page_mut().finish(prepared)?;
        }
        Ok(())
    }

    /// Rebuild hashes and descendant counts for the whole subtree under
    /// `root`, children before parents.
    pub(crate) fn post_order_repair(&mut self, root: NodeKey) -> Result<()> {
        let keys = axis::post_order_keys(self.page(), root)?;
        for key in keys {
            let node = self.fetch(key)?;
            if self.hash_kind != HashKind::None && node.kind() == NodeKind::Element {
                for &satellite in node
                    .namespace_keys()
                    .iter()
                    .chain(node.attribute_keys().iter())
                {
                    let mut prepared = self.page_mut().prepare(satellite)?;
                    let seed = intrinsic_hash(&prepared);
                    prepared.set_hash(seed);
                    self.page_mut().finish(prepared)?;
                }
            }

            let (child_count, descendant_count) = self.recount_children(key)?;
            let recomputed = if self.hash_kind != HashKind::None {
                Some(self.compute_from_children(key)?)
            } else {
                None
            };
            let mut prepared = self.page_mut().prepare(key)?;
            if let Some(structure) = prepared.structure_mut() {
                structure.child_count = child_count;
                structure.descendant_count = descendant_count;
            }
            if let Some(hash) = recomputed {
                prepared.set_hash(hash);
            }
            self.page_mut().finish(prepared)?;
        }
        Ok(())
    }

    fn recount_children(&self, key: NodeKey) -> Result<(u64, u64)> {
        let node = self.fetch(key)?;
        let mut child_count = 0;
        let mut descendant_count = 0;
        let mut child = node.structure().and_then(|s| s.first_child);
        while let Some(child_key) = child {
            let child_node = self.fetch(child_key)?;
            child_count += 1;
            descendant_count += child_node
                .structure()
                .map_or(0, |s| s.descendant_count)
                + 1;
            child = child_node.structure().and_then(|s| s.right_sibling);
        }
        Ok((child_count, descendant_count))
    }

    /// Post-order repair of a bulk-ingested subtree, then fold its root
    /// into every ancestor up to the document root.
    pub(crate) fn bulk_repair(&mut self, root: NodeKey) -> Result<()> {
        self.post_order_repair(root)?;
        let node = self.fetch(root)?;
        let delta = node
            .structure()
            .map_or(0, |s| s.descendant_count as i64 + 1);
        match self.hash_kind {
            HashKind::None => self.ancestor_walk(root, 0, 0, delta, false),
            HashKind::Rolling => self.ancestor_walk(root, 0, node.hash(), delta, true),
            HashKind::Postorder => {
                self.ancestor_walk(root, 0, 0, delta, false)?;
                if let Some(parent) = node.parent() {
                    self.postorder_chain(parent)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xylem_types::node::{NameDelegate, ValueDelegate};
    use xylem_types::NameKey;

    #[test]
    fn intrinsic_hash_depends_on_fields() {
        let name = NameDelegate {
            name_key: NameKey::new(1),
            uri_key: NameKey::new(2),
        };
        let a = Node::element(NodeKey::new(1), NodeKey::new(0), None, None, name);
        let renamed = Node::element(
            NodeKey::new(1),
            NodeKey::new(0),
            None,
            None,
            NameDelegate {
                name_key: NameKey::new(9),
                uri_key: NameKey::new(2),
            },
        );
        assert_ne!(intrinsic_hash(&a), intrinsic_hash(&renamed));

        let text = |v: &[u8]| {
            Node::text(
                NodeKey::new(2),
                NodeKey::new(1),
                None,
                None,
                ValueDelegate {
                    value: v.to_vec(),
                    compressed: false,
                },
            )
        };
        assert_ne!(intrinsic_hash(&text(b"hi")), intrinsic_hash(&text(b"ho")));
        assert_eq!(intrinsic_hash(&text(b"hi")), intrinsic_hash(&text(b"hi")));
    }

    #[test]
    fn intrinsic_hash_ignores_links() {
        let name = NameDelegate {
            name_key: NameKey::new(1),
            uri_key: NameKey::new(2),
        };
        let a = Node::element(NodeKey::new(1), NodeKey::new(0), None, None, name);
        let b = Node::element(
            NodeKey::new(7),
            NodeKey::new(3),
            Some(NodeKey::new(5)),
            Some(NodeKey::new(6)),
            name,
        );
        assert_eq!(intrinsic_hash(&a), intrinsic_hash(&b));
    }
}
