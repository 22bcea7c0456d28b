//! Key-level tree axes.
//!
//! Structural traversals used by removal, hashing and the bulk-ingest
//! repair pass. Axes walk keys, not cursors, so callers can keep the cursor
//! wherever the public API contract wants it.

use xylem_error::{Result, XylemError};
use xylem_store::PageReadTrx;
use xylem_types::{Node, NodeKey};

fn fetch<P: PageReadTrx>(page: &P, key: NodeKey) -> Result<Node> {
    page.get(key)?
        .ok_or(XylemError::InvalidNodeKey { key: key.get() })
}

fn child_keys<P: PageReadTrx>(page: &P, node: &Node) -> Result<Vec<NodeKey>> {
    let mut out = Vec::new();
    let mut next = node.structure().and_then(|s| s.first_child);
    while let Some(key) = next {
        let child = fetch(page, key)?;
        next = child.structure().and_then(|s| s.right_sibling);
        out.push(key);
    }
    Ok(out)
}

/// Structural keys of the subtree rooted at `root`, in document order.
pub fn descendant_keys<P: PageReadTrx>(
    page: &P,
    root: NodeKey,
    include_self: bool,
) -> Result<Vec<NodeKey>> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(key) = stack.pop() {
        if include_self || key != root {
            out.push(key);
        }
        let node = fetch(page, key)?;
        let children = child_keys(page, &node)?;
        stack.extend(children.into_iter().rev());
    }
    Ok(out)
}

/// Structural keys of the subtree rooted at `root`, children before parents
/// (left-to-right post-order).
pub fn post_order_keys<P: PageReadTrx>(page: &P, root: NodeKey) -> Result<Vec<NodeKey>> {
    // Reverse pre-order with children visited right-to-left yields
    // left-to-right post-order once reversed.
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(key) = stack.pop() {
        out.push(key);
        let node = fetch(page, key)?;
        stack.extend(child_keys(page, &node)?);
    }
    out.reverse();
    Ok(out)
}

/// Ancestor keys of `start`, nearest first, up to and including the
/// document root. `start` itself is not yielded.
pub fn ancestor_keys<P: PageReadTrx>(page: &P, start: NodeKey) -> Result<Vec<NodeKey>> {
    let mut out = Vec::new();
    let mut next = fetch(page, start)?.parent();
    while let Some(key) = next {
        out.push(key);
        next = fetch(page, key)?.parent();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xylem_store::{MemResource, PageWriteTrx, Session};
    use xylem_types::node::NameDelegate;
    use xylem_types::{NodeKind, ResourceConfig, Revision};

    /// Hand-build `root -> a(b, c) , d` directly on the page layer.
    fn sample() -> impl PageReadTrx {
        let resource = MemResource::new(ResourceConfig::default());
        let mut wtx = resource
            .begin_page_write_trx(1, Revision::BOOTSTRAP, Revision::new(1))
            .unwrap();
        let mut mk_name = |name: &str| NameDelegate {
            name_key: wtx.create_name_key(name, NodeKind::Element).unwrap(),
            uri_key: wtx.create_name_key("", NodeKind::Namespace).unwrap(),
        };
        let names = ["a", "b", "c", "d"].map(|n| mk_name(n));

        let k = NodeKey::new;
        let mut a = Node::element(k(1), k(0), None, Some(k(4)), names[0]);
        a.structure_mut().unwrap().first_child = Some(k(2));
        a.structure_mut().unwrap().child_count = 2;
        a.structure_mut().unwrap().descendant_count = 2;
        let b = Node::element(k(2), k(1), None, Some(k(3)), names[1]);
        let mut c = Node::element(k(3), k(1), None, None, names[2]);
        c.structure_mut().unwrap().left_sibling = Some(k(2));
        let mut d = Node::element(k(4), k(0), None, None, names[3]);
        d.structure_mut().unwrap().left_sibling = Some(k(1));

        for node in [a, b, c, d] {
            wtx.create(node).unwrap();
        }
        let mut root = wtx.prepare(k(0)).unwrap();
        root.structure_mut().unwrap().first_child = Some(k(1));
        root.structure_mut().unwrap().child_count = 2;
        root.structure_mut().unwrap().descendant_count = 4;
        wtx.finish(root).unwrap();
        wtx
    }

    fn raw(keys: &[NodeKey]) -> Vec<u64> {
        keys.iter().map(|k| k.get()).collect()
    }

    #[test]
    fn descendants_in_document_order() {
        let page = sample();
        let keys = descendant_keys(&page, NodeKey::new(0), true).unwrap();
        assert_eq!(raw(&keys), [0, 1, 2, 3, 4]);
        let keys = descendant_keys(&page, NodeKey::new(1), false).unwrap();
        assert_eq!(raw(&keys), [2, 3]);
    }

    #[test]
    fn post_order_is_children_first() {
        let page = sample();
        let keys = post_order_keys(&page, NodeKey::new(0)).unwrap();
        assert_eq!(raw(&keys), [2, 3, 1, 4, 0]);
    }

    #[test]
    fn ancestors_nearest_first() {
        let page = sample();
        let keys = ancestor_keys(&page, NodeKey::new(3)).unwrap();
        assert_eq!(raw(&keys), [1, 0]);
        assert!(ancestor_keys(&page, NodeKey::new(0)).unwrap().is_empty());
    }
}
