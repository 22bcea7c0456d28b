//! Structural consistency checks.
//!
//! An independent oracle over the page layer: link symmetry, counts, text
//! adjacency, attribute uniqueness and the hash recurrence are re-derived
//! from the definitions and compared with stored state. Used by the test
//! suite after every scenario, and available to embedders as a debugging
//! aid.

use std::collections::{HashMap, HashSet};

use xylem_error::Result;
use xylem_store::PageReadTrx;
use xylem_types::{HashKind, NameKey, Node, NodeKey, NodeKind};

use crate::hash::{intrinsic_hash, PRIME};

/// Verify the tree visible to a read transaction; returns one message per
/// violation.
pub fn check_read_trx<P: PageReadTrx>(
    rtx: &crate::read::NodeReadTrx<P>,
    hash_kind: HashKind,
) -> Result<Vec<String>> {
    check_tree(rtx.page(), hash_kind)
}

/// Count live dictionary references visible to a read transaction.
pub fn live_name_references_of<P: PageReadTrx>(
    rtx: &crate::read::NodeReadTrx<P>,
) -> Result<HashMap<(NodeKind, NameKey), u32>> {
    live_name_references(rtx.page())
}

/// Verify the whole tree; returns one message per violation.
pub(crate) fn check_tree<P: PageReadTrx>(page: &P, hash_kind: HashKind) -> Result<Vec<String>> {
    let mut violations = Vec::new();
    let root = match page.get(NodeKey::DOCUMENT_ROOT)? {
        Some(node) => node,
        None => {
            violations.push("document root is missing".to_owned());
            return Ok(violations);
        }
    };
    if root.structure().map_or(0, |s| s.child_count) > 1 {
        violations.push("document root has more than one child".to_owned());
    }
    visit(page, &root, hash_kind, &mut violations)?;
    Ok(violations)
}

/// Count live dictionary references per `(kind, name key)` over the tree.
pub(crate) fn live_name_references<P: PageReadTrx>(
    page: &P,
) -> Result<HashMap<(NodeKind, NameKey), u32>> {
    let mut counts: HashMap<(NodeKind, NameKey), u32> = HashMap::new();
    let mut bump = |kind: NodeKind, key: NameKey| *counts.entry((kind, key)).or_insert(0) += 1;
    let keys = crate::axis::descendant_keys(page, NodeKey::DOCUMENT_ROOT, true)?;
    for key in keys {
        let Some(node) = page.get(key)? else {
            continue;
        };
        if let Some(name) = node.name() {
            bump(node.kind(), name.name_key);
            bump(NodeKind::Namespace, name.uri_key);
        }
        for &satellite in node.attribute_keys().iter().chain(node.namespace_keys()) {
            let Some(satellite_node) = page.get(satellite)? else {
                continue;
            };
            if let Some(name) = satellite_node.name() {
                bump(satellite_node.kind(), name.name_key);
                bump(NodeKind::Namespace, name.uri_key);
            }
        }
    }
    Ok(counts)
}

/// Recursive check of one structural node; returns (subtree node count,
/// recomputed subtree hash).
fn visit<P: PageReadTrx>(
    page: &P,
    node: &Node,
    hash_kind: HashKind,
    violations: &mut Vec<String>,
) -> Result<(u64, u64)> {
    let key = node.key();
    let mut contribution_sum: u64 = 0;
    let mut child_count = 0u64;
    let mut descendant_total = 0u64;

    let mut previous: Option<Node> = None;
    let mut child_key = node.structure().and_then(|s| s.first_child);
    while let Some(current_key) = child_key {
        let Some(child) = page.get(current_key)? else {
            violations.push(format!("child {current_key} of {key} does not exist"));
            break;
        };
        if child.parent() != Some(key) {
            violations.push(format!(
                "child {current_key} of {key} has parent {:?}",
                child.parent()
            ));
        }
        match &previous {
            None => {
                if child.structure().and_then(|s| s.left_sibling).is_some() {
                    violations.push(format!("first child {current_key} has a left sibling"));
                }
            }
            Some(prev) => {
                if child.structure().and_then(|s| s.left_sibling) != Some(prev.key()) {
                    violations.push(format!(
                        "sibling link asymmetry between {} and {current_key}",
                        prev.key()
                    ));
                }
                if prev.kind() == NodeKind::Text && child.kind() == NodeKind::Text {
                    violations.push(format!(
                        "adjacent text nodes {} and {current_key}",
                        prev.key()
                    ));
                }
            }
        }
        if !child.kind().is_structural() {
            violations.push(format!(
                "child {current_key} of {key} has non-structural kind {}",
                child.kind().as_str()
            ));
        }

        let (subtree_nodes, subtree_hash) = visit(page, &child, hash_kind, violations)?;
        descendant_total += subtree_nodes;
        contribution_sum = contribution_sum.wrapping_add(subtree_hash);
        child_count += 1;
        child_key = child.structure().and_then(|s| s.right_sibling);
        previous = Some(child);
    }

    let mut attribute_names: HashSet<NameKey> = HashSet::new();
    for &attribute_key in node.attribute_keys() {
        let Some(attribute) = page.get(attribute_key)? else {
            violations.push(format!("attribute {attribute_key} of {key} does not exist"));
            continue;
        };
        if attribute.parent() != Some(key) {
            violations.push(format!("attribute {attribute_key} has a foreign parent"));
        }
        if let Some(name) = attribute.name() {
            if !attribute_names.insert(name.name_key) {
                violations.push(format!(
                    "duplicate attribute name hash {} on element {key}",
                    name.name_key
                ));
            }
        }
        contribution_sum = contribution_sum.wrapping_add(intrinsic_hash(&attribute));
        if hash_kind != HashKind::None && attribute.hash() != intrinsic_hash(&attribute) {
            violations.push(format!("attribute {attribute_key} hash is stale"));
        }
    }
    for &namespace_key in node.namespace_keys() {
        let Some(namespace) = page.get(namespace_key)? else {
            violations.push(format!("namespace {namespace_key} of {key} does not exist"));
            continue;
        };
        if namespace.parent() != Some(key) {
            violations.push(format!("namespace {namespace_key} has a foreign parent"));
        }
        contribution_sum = contribution_sum.wrapping_add(intrinsic_hash(&namespace));
        if hash_kind != HashKind::None && namespace.hash() != intrinsic_hash(&namespace) {
            violations.push(format!("namespace {namespace_key} hash is stale"));
        }
    }

    if let Some(structure) = node.structure() {
        if structure.child_count != child_count {
            violations.push(format!(
                "node {key} stores child_count {} but has {child_count} children",
                structure.child_count
            ));
        }
        if structure.descendant_count != descendant_total {
            violations.push(format!(
                "node {key} stores descendant_count {} but has {descendant_total} descendants",
                structure.descendant_count
            ));
        }
    }

    let recomputed = intrinsic_hash(node).wrapping_add(PRIME.wrapping_mul(contribution_sum));
    if hash_kind != HashKind::None && node.hash() != recomputed {
        violations.push(format!(
            "node {key} stores hash {:#x} but the recurrence gives {recomputed:#x}",
            node.hash()
        ));
    }
    Ok((descendant_total + 1, recomputed))
}
