//! End-to-end scenarios for the write transaction: structural edits, text
//! merging, hashing, lifecycle and snapshot isolation.

use std::sync::Arc;
use std::time::Duration;

use xylem_core::{
    begin_read_trx, verify, InsertPosition, Movement, NodeWriteTrx, SubtreeEvent,
};
use xylem_error::{ErrorKind, XylemError};
use xylem_store::MemResource;
use xylem_types::{
    Consistency, HashKind, NodeKey, NodeKind, QName, ResourceConfig, Revision,
};

fn resource_with(hash_kind: HashKind) -> Arc<MemResource> {
    Arc::new(MemResource::new(ResourceConfig {
        hash_kind,
        consistency: Consistency::Strict,
        compression: false,
    }))
}

fn writer(resource: &Arc<MemResource>) -> NodeWriteTrx<MemResource> {
    NodeWriteTrx::begin(Arc::clone(resource), 1, 0, None).unwrap()
}

fn assert_consistent(wtx: &NodeWriteTrx<MemResource>) {
    let violations = wtx.verify_consistency().unwrap();
    assert!(violations.is_empty(), "violations: {violations:?}");
}

fn q(local: &str) -> QName {
    QName::local(local)
}

/// `<log/>` under the document root; cursor left on the element.
fn insert_log(wtx: &NodeWriteTrx<MemResource>) -> NodeKey {
    wtx.move_to_document_root();
    wtx.insert_element_as_first_child(&q("log")).unwrap();
    wtx.node_key()
}

#[test]
fn scenario1_first_element() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    assert_eq!(wtx.kind(), NodeKind::Element);
    assert_eq!(wtx.qname().unwrap().unwrap(), q("log"));

    wtx.move_to_document_root();
    assert_eq!(wtx.child_count(), 1);
    assert_eq!(wtx.descendant_count(), 1);
    assert_ne!(wtx.hash(), 0);
    assert_consistent(&wtx);
}

#[test]
fn scenario2_remove_first_of_two_children() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    let a = wtx.node_key();
    wtx.insert_element_as_right_sibling(&q("b")).unwrap();
    let b = wtx.node_key();

    wtx.move_to(a);
    wtx.remove().unwrap();
    // Cursor lands on the right sibling.
    assert_eq!(wtx.node_key(), b);
    assert!(!wtx.move_to_left_sibling());

    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 1);
    assert!(wtx.move_to_first_child());
    assert_eq!(wtx.node_key(), b);
    assert_consistent(&wtx);
}

#[test]
fn scenario3_sibling_text_insertion_merges() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_text_as_first_child("hi").unwrap();
    wtx.insert_text_as_right_sibling("there").unwrap();

    assert_eq!(wtx.value().unwrap().as_deref(), Some("hi there"));
    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 1);
    assert_eq!(wtx.descendant_count(), 1);
    assert_consistent(&wtx);
}

#[test]
fn scenario4_move_to_first_child() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    let a = wtx.node_key();
    wtx.insert_element_as_right_sibling(&q("b")).unwrap();
    let b = wtx.node_key();

    wtx.move_to(a);
    wtx.move_subtree_as_first_child(b).unwrap();
    assert_eq!(wtx.node_key(), b);

    wtx.move_to(a);
    assert_eq!(wtx.child_count(), 1);
    assert!(wtx.move_to_first_child());
    assert_eq!(wtx.node_key(), b);

    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 1);
    assert_eq!(wtx.descendant_count(), 2);
    assert!(wtx.move_to_first_child());
    assert_eq!(wtx.node_key(), a);
    assert_consistent(&wtx);
}

#[test]
fn scenario5_attribute_overwrite_then_duplicate() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);

    wtx.insert_attribute(&q("severity"), "low", Movement::ToParent)
        .unwrap();
    wtx.insert_attribute(&q("severity"), "high", Movement::ToParent)
        .unwrap();
    assert_eq!(wtx.attribute_count(), 1);
    assert!(wtx.move_to_attribute(0));
    assert_eq!(wtx.value().unwrap().as_deref(), Some("high"));
    wtx.move_to_parent();

    let err = wtx
        .insert_attribute(&q("severity"), "high", Movement::ToParent)
        .unwrap_err();
    assert!(matches!(err, XylemError::DuplicateAttribute { .. }));
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_consistent(&wtx);
}

#[test]
fn scenario6_readers_keep_their_revision() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    wtx.commit().unwrap();

    let rtx = begin_read_trx(resource.as_ref(), 7, Revision::new(1)).unwrap();
    assert_eq!(rtx.revision_number(), Revision::new(1));

    // The writer is already building revision 2.
    assert_eq!(wtx.revision_number(), Revision::new(2));
    wtx.insert_element_as_right_sibling(&q("b")).unwrap();

    let mut rtx = rtx;
    assert!(rtx.move_to_document_root());
    assert!(rtx.move_to_first_child());
    assert_eq!(rtx.qname().unwrap().unwrap(), q("log"));
    assert!(rtx.move_to_first_child());
    assert_eq!(rtx.qname().unwrap().unwrap(), q("a"));
    assert!(!rtx.move_to_right_sibling());

    let violations = verify::check_read_trx(&rtx, HashKind::Rolling).unwrap();
    assert!(violations.is_empty(), "violations: {violations:?}");
}

#[test]
fn r1_insert_then_remove_restores_hashes() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    let a = wtx.node_key();

    wtx.move_to_document_root();
    let root_hash = wtx.hash();
    wtx.move_to(log);
    let log_hash = wtx.hash();

    wtx.move_to(a);
    wtx.insert_text_as_first_child("x").unwrap();
    wtx.remove().unwrap();

    wtx.move_to_document_root();
    assert_eq!(wtx.hash(), root_hash);
    assert_eq!(wtx.descendant_count(), 2);
    wtx.move_to(log);
    assert_eq!(wtx.hash(), log_hash);
    assert_consistent(&wtx);
}

#[test]
fn r2_move_to_current_position_is_noop() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    let a = wtx.node_key();
    wtx.insert_element_as_right_sibling(&q("b")).unwrap();
    let b = wtx.node_key();

    wtx.move_to_document_root();
    let before = wtx.hash();

    wtx.move_to(a);
    wtx.move_subtree_as_right_sibling(b).unwrap();
    wtx.move_to(b);
    wtx.move_subtree_as_left_sibling(a).unwrap();

    wtx.move_to(a);
    assert!(wtx.move_to_right_sibling());
    assert_eq!(wtx.node_key(), b);
    wtx.move_to_document_root();
    assert_eq!(wtx.hash(), before);
    assert_consistent(&wtx);
}

#[test]
fn r3_set_value_is_idempotent() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_text_as_first_child("v0").unwrap();

    wtx.set_value("v1").unwrap();
    let mods = wtx.modification_count();
    wtx.move_to_document_root();
    let hash = wtx.hash();

    assert!(wtx.move_to_first_child() && wtx.move_to_first_child());
    wtx.set_value("v1").unwrap();
    assert_eq!(wtx.modification_count(), mods);
    wtx.move_to_document_root();
    assert_eq!(wtx.hash(), hash);
    assert_consistent(&wtx);
}

fn sample_events() -> Vec<SubtreeEvent> {
    vec![
        SubtreeEvent::StartDocument,
        SubtreeEvent::StartElement {
            name: q("r"),
            attributes: vec![(q("id"), "1".to_owned())],
            namespaces: vec![QName::new("p", "p", "ns:r")],
        },
        SubtreeEvent::StartElement {
            name: q("c1"),
            attributes: vec![],
            namespaces: vec![],
        },
        SubtreeEvent::Text("text".to_owned()),
        SubtreeEvent::EndElement,
        SubtreeEvent::StartElement {
            name: q("c2"),
            attributes: vec![],
            namespaces: vec![],
        },
        SubtreeEvent::EndElement,
        SubtreeEvent::EndElement,
        SubtreeEvent::EndDocument,
    ]
}

#[test]
fn r4_bulk_ingest_repairs_hashes() {
    for hash_kind in [HashKind::None, HashKind::Rolling, HashKind::Postorder] {
        let resource = resource_with(hash_kind);
        let wtx = writer(&resource);
        insert_log(&wtx);
        wtx.insert_subtree(sample_events(), InsertPosition::FirstChild)
            .unwrap();

        // Cursor lands on the ingested root.
        assert_eq!(wtx.qname().unwrap().unwrap(), q("r"));
        assert_eq!(wtx.child_count(), 2);
        assert_eq!(wtx.descendant_count(), 3);
        assert_eq!(wtx.attribute_count(), 1);
        assert_eq!(wtx.namespace_count(), 1);

        wtx.move_to_document_root();
        assert_eq!(wtx.descendant_count(), 5);
        let violations = wtx.verify_consistency().unwrap();
        assert!(violations.is_empty(), "{hash_kind:?}: {violations:?}");
    }
}

#[test]
fn remove_merges_outer_text_neighbors() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_text_as_first_child("x").unwrap();
    wtx.insert_element_as_right_sibling(&q("a")).unwrap();
    let a = wtx.node_key();
    wtx.insert_text_as_right_sibling("y").unwrap();

    wtx.move_to(a);
    wtx.remove().unwrap();

    assert_eq!(wtx.kind(), NodeKind::Text);
    assert_eq!(wtx.value().unwrap().as_deref(), Some("x y"));
    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 1);
    assert_eq!(wtx.descendant_count(), 1);
    assert_consistent(&wtx);
}

#[test]
fn move_detach_merges_source_site_texts() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("keep")).unwrap();
    let keep = wtx.node_key();
    wtx.insert_text_as_right_sibling("x").unwrap();
    wtx.insert_element_as_right_sibling(&q("m")).unwrap();
    let m = wtx.node_key();
    wtx.insert_text_as_right_sibling("y").unwrap();

    // <log><keep/>x<m/>y</log>; moving m under keep merges x and y.
    wtx.move_to(keep);
    wtx.move_subtree_as_first_child(m).unwrap();

    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 2);
    assert_eq!(wtx.descendant_count(), 3);
    assert!(wtx.move_to_first_child());
    assert_eq!(wtx.node_key(), keep);
    assert!(wtx.move_to_right_sibling());
    assert_eq!(wtx.value().unwrap().as_deref(), Some("x y"));
    assert_consistent(&wtx);
}

#[test]
fn postorder_remove_merges_outer_text_neighbors() {
    let resource = resource_with(HashKind::Postorder);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_text_as_first_child("x").unwrap();
    wtx.insert_element_as_right_sibling(&q("a")).unwrap();
    let a = wtx.node_key();
    wtx.insert_text_as_right_sibling("y").unwrap();

    wtx.move_to(a);
    wtx.remove().unwrap();

    // The kept leaf's recomputed hash must flow into the chain repair.
    assert_eq!(wtx.value().unwrap().as_deref(), Some("x y"));
    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 1);
    assert_eq!(wtx.descendant_count(), 1);
    assert_consistent(&wtx);
}

#[test]
fn postorder_move_merges_source_site_texts() {
    let resource = resource_with(HashKind::Postorder);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("keep")).unwrap();
    let keep = wtx.node_key();
    wtx.insert_text_as_right_sibling("x").unwrap();
    wtx.insert_element_as_right_sibling(&q("m")).unwrap();
    let m = wtx.node_key();
    wtx.insert_text_as_right_sibling("y").unwrap();

    // <log><keep/>x<m/>y</log>; moving m under keep merges x and y.
    wtx.move_to(keep);
    wtx.move_subtree_as_first_child(m).unwrap();

    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 2);
    assert_eq!(wtx.descendant_count(), 3);
    assert!(wtx.move_to_first_child());
    assert!(wtx.move_to_right_sibling());
    assert_eq!(wtx.value().unwrap().as_deref(), Some("x y"));
    assert_consistent(&wtx);
}

#[test]
fn move_attach_merges_destination_site_texts() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    let a = wtx.node_key();
    wtx.move_to(a);
    wtx.insert_text_as_first_child("inner").unwrap();
    let inner = wtx.node_key();
    wtx.move_to(log);
    wtx.insert_text_as_first_child("outer").unwrap();

    // <log>outer<a>inner</a></log>; moving the inner text after "outer"
    // collapses both into one node.
    wtx.move_to_document_root();
    assert!(wtx.move_to_first_child());
    assert!(wtx.move_to_first_child());
    assert_eq!(wtx.value().unwrap().as_deref(), Some("outer"));
    wtx.move_subtree_as_right_sibling(inner).unwrap();

    assert_eq!(wtx.value().unwrap().as_deref(), Some("outer inner"));
    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 2);
    assert_eq!(wtx.descendant_count(), 2);
    assert_consistent(&wtx);
}

#[test]
fn move_rejects_self_and_ancestors() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    let log = wtx.node_key();
    wtx.insert_element_as_first_child(&q("a")).unwrap();

    let err = wtx.move_subtree_as_first_child(wtx.node_key()).unwrap_err();
    assert!(matches!(err, XylemError::MoveToSelf));

    let err = wtx.move_subtree_as_first_child(log).unwrap_err();
    assert!(matches!(err, XylemError::MoveToAncestor { .. }));

    let err = wtx
        .move_subtree_as_first_child(NodeKey::new(999))
        .unwrap_err();
    assert!(matches!(err, XylemError::InvalidNodeKey { key: 999 }));
    assert_consistent(&wtx);
}

#[test]
fn namespace_duplicate_prefix_is_rejected() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_namespace(&QName::new("p", "p", "ns:one"), Movement::ToParent)
        .unwrap();
    let err = wtx
        .insert_namespace(&QName::new("p", "p", "ns:two"), Movement::ToParent)
        .unwrap_err();
    assert!(matches!(err, XylemError::DuplicateNamespace { .. }));
    assert_eq!(wtx.namespace_count(), 1);
    assert_consistent(&wtx);
}

#[test]
fn remove_root_is_rejected() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    wtx.move_to_document_root();
    let err = wtx.remove().unwrap_err();
    assert!(matches!(err, XylemError::CannotRemoveRoot));
}

#[test]
fn wrong_kind_inserts_are_rejected_before_mutation() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_text_as_first_child("t").unwrap();

    // A text node takes no element children and no attributes.
    let err = wtx.insert_element_as_first_child(&q("x")).unwrap_err();
    assert!(matches!(err, XylemError::WrongKind { .. }));
    let err = wtx
        .insert_attribute(&q("a"), "v", Movement::None)
        .unwrap_err();
    assert!(matches!(err, XylemError::WrongKind { .. }));
    let err = wtx.insert_element_as_first_child(&q("9bad")).unwrap_err();
    assert!(matches!(err, XylemError::InvalidQName { .. }));
    assert_consistent(&wtx);
}

#[test]
fn set_qname_and_uri_update_names_and_hashes() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.set_qname(&q("journal")).unwrap();
    assert_eq!(wtx.qname().unwrap().unwrap(), q("journal"));
    wtx.set_uri("ns:journal").unwrap();
    assert_eq!(wtx.qname().unwrap().unwrap().uri, "ns:journal");

    // Setting the same name again is a no-op.
    let mods = wtx.modification_count();
    wtx.set_qname(&QName::new("", "journal", "ns:journal"))
        .unwrap();
    assert_eq!(wtx.modification_count(), mods);
    assert_consistent(&wtx);
}

#[test]
fn name_dictionary_refcounts_track_live_nodes() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("rec")).unwrap();
    wtx.insert_element_as_right_sibling(&q("rec")).unwrap();
    let second = wtx.node_key();
    wtx.insert_attribute(&q("id"), "1", Movement::ToParent)
        .unwrap();
    wtx.commit().unwrap();

    let rtx = begin_read_trx(resource.as_ref(), 9, Revision::new(1)).unwrap();
    let counts = verify::live_name_references_of(&rtx).unwrap();
    for ((kind, key), count) in counts {
        assert_eq!(
            resource.name_refs(key, kind),
            count,
            "refcount mismatch for {kind:?} {key}"
        );
    }

    // Removing one <rec/> releases one reference, not the entry.
    wtx.move_to(second);
    wtx.remove().unwrap();
    wtx.commit().unwrap();
    let rtx = begin_read_trx(resource.as_ref(), 10, Revision::new(2)).unwrap();
    let counts = verify::live_name_references_of(&rtx).unwrap();
    for ((kind, key), count) in counts {
        assert_eq!(resource.name_refs(key, kind), count);
    }
}

#[test]
fn commit_rejects_multi_child_root() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.move_to_document_root();
    wtx.insert_element_as_first_child(&q("second")).unwrap();

    let err = wtx.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);

    // Abort recovers the transaction.
    wtx.abort().unwrap();
    wtx.move_to_document_root();
    assert_eq!(wtx.child_count(), 0);
    assert_eq!(wtx.modification_count(), 0);
}

#[test]
fn close_rejects_dirty_transaction() {
    let resource = resource_with(HashKind::Rolling);
    let mut wtx = writer(&resource);
    insert_log(&wtx);
    let err = wtx.close().unwrap_err();
    assert!(matches!(err, XylemError::DirtyClose { modifications: 1 }));

    wtx.commit().unwrap();
    wtx.close().unwrap();
    assert!(wtx.is_closed());

    // The resource admits a new writer after close.
    let wtx2 = NodeWriteTrx::begin(Arc::clone(&resource), 2, 0, None).unwrap();
    drop(wtx2);
}

#[test]
fn closed_transaction_rejects_edits() {
    let resource = resource_with(HashKind::Rolling);
    let mut wtx = writer(&resource);
    wtx.close().unwrap();
    let err = wtx.insert_element_as_first_child(&q("x")).unwrap_err();
    assert!(matches!(err, XylemError::TrxClosed { trx_id: 1 }));
}

#[test]
fn abort_discards_pending_edits() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.commit().unwrap();

    wtx.move_to_document_root();
    assert!(wtx.move_to_first_child());
    wtx.insert_element_as_first_child(&q("junk")).unwrap();
    wtx.abort().unwrap();

    wtx.move_to_document_root();
    assert!(wtx.move_to_first_child());
    assert_eq!(wtx.qname().unwrap().unwrap(), q("log"));
    assert_eq!(wtx.child_count(), 0);
    assert_consistent(&wtx);
}

#[test]
fn revert_to_resurrects_an_old_revision() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.commit().unwrap(); // revision 1: <log/>
    wtx.move_to_document_root();
    wtx.move_to_first_child();
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    wtx.commit().unwrap(); // revision 2: <log><a/></log>

    wtx.revert_to(Revision::new(1)).unwrap();
    assert_eq!(wtx.node_key(), NodeKey::DOCUMENT_ROOT);
    assert!(wtx.move_to_first_child());
    assert_eq!(wtx.child_count(), 0);

    wtx.commit().unwrap(); // revision 3: the reverted tree
    let mut rtx = begin_read_trx(resource.as_ref(), 5, Revision::new(3)).unwrap();
    assert!(rtx.move_to_first_child());
    assert_eq!(rtx.child_count(), 0);

    // Revision 2 still holds the pre-revert tree.
    let mut rtx2 = begin_read_trx(resource.as_ref(), 6, Revision::new(2)).unwrap();
    assert!(rtx2.move_to_first_child());
    assert_eq!(rtx2.child_count(), 1);

    let err = wtx.revert_to(Revision::new(99)).unwrap_err();
    assert!(matches!(err, XylemError::RevisionNotAccessible { .. }));
}

#[test]
fn intermediate_commit_by_modification_count() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = NodeWriteTrx::begin(Arc::clone(&resource), 1, 2, None).unwrap();
    insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    assert_eq!(resource.revision_count(), 1);
    // The third modification crosses the threshold and commits first.
    wtx.insert_element_as_first_child(&q("b")).unwrap();
    assert_eq!(resource.revision_count(), 2);
    assert_consistent(&wtx);
}

#[test]
fn intermediate_commit_surfaces_root_violation() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = NodeWriteTrx::begin(Arc::clone(&resource), 1, 1, None).unwrap();
    // The second edit's threshold commit publishes a legal one-child root,
    // then the root accumulates three children without crossing the
    // threshold again until the fourth edit, whose commit must fail.
    wtx.move_to_document_root();
    wtx.insert_element_as_first_child(&q("one")).unwrap();
    wtx.move_to_document_root();
    wtx.insert_element_as_first_child(&q("two")).unwrap();
    wtx.move_to_document_root();
    wtx.insert_element_as_first_child(&q("three")).unwrap();
    wtx.move_to_document_root();
    let err = wtx.insert_element_as_first_child(&q("four")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
}

#[test]
fn scheduled_auto_commit_publishes_revisions() {
    let resource = resource_with(HashKind::Rolling);
    let mut wtx = NodeWriteTrx::begin(
        Arc::clone(&resource),
        1,
        0,
        Some(Duration::from_millis(25)),
    )
    .unwrap();
    insert_log(&wtx);
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while resource.revision_count() < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(resource.revision_count() >= 2, "auto-commit never fired");
    assert_eq!(wtx.modification_count(), 0);
    wtx.close().unwrap();
}

#[test]
fn zero_auto_commit_interval_is_rejected() {
    let resource = resource_with(HashKind::Rolling);
    let err = NodeWriteTrx::begin(Arc::clone(&resource), 1, 0, Some(Duration::ZERO)).unwrap_err();
    assert!(matches!(err, XylemError::InvalidConfig { .. }));
}

#[test]
fn replace_with_text_preserves_position() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    wtx.insert_element_as_right_sibling(&q("b")).unwrap();
    wtx.insert_element_as_right_sibling(&q("c")).unwrap();

    // Replace the middle element.
    wtx.move_to(log);
    wtx.move_to_first_child();
    wtx.move_to_right_sibling();
    wtx.replace_with_text("mid").unwrap();
    assert_eq!(wtx.value().unwrap().as_deref(), Some("mid"));
    assert!(wtx.move_to_left_sibling());
    assert_eq!(wtx.qname().unwrap().unwrap(), q("a"));
    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 3);
    assert_consistent(&wtx);
}

#[test]
fn replace_with_events_swaps_the_subtree() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("old")).unwrap();
    wtx.insert_text_as_first_child("payload").unwrap();

    wtx.move_to(log);
    wtx.move_to_first_child();
    wtx.replace_with_events(vec![
        SubtreeEvent::StartElement {
            name: q("new"),
            attributes: vec![],
            namespaces: vec![],
        },
        SubtreeEvent::Text("fresh".to_owned()),
        SubtreeEvent::EndElement,
    ])
    .unwrap();

    assert_eq!(wtx.qname().unwrap().unwrap(), q("new"));
    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 1);
    assert_eq!(wtx.descendant_count(), 2);
    assert_consistent(&wtx);
}

#[test]
fn copy_subtree_from_a_committed_revision() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    let log = insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    let a = wtx.node_key();
    wtx.insert_attribute(&q("id"), "7", Movement::ToParent)
        .unwrap();
    wtx.insert_element_as_first_child(&q("b")).unwrap();
    wtx.insert_text_as_right_sibling("tail").unwrap();
    wtx.commit().unwrap();

    let mut rtx = begin_read_trx(resource.as_ref(), 8, Revision::new(1)).unwrap();
    assert!(rtx.move_to(a));

    wtx.move_to(a);
    wtx.copy_subtree_as_right_sibling(&mut rtx).unwrap();

    // Source cursor is restored; destination cursor sits on the copy.
    assert_eq!(rtx.node_key(), a);
    assert_eq!(wtx.qname().unwrap().unwrap(), q("a"));
    assert_ne!(wtx.node_key(), a);
    assert_eq!(wtx.attribute_count(), 1);
    assert_eq!(wtx.child_count(), 2);
    wtx.move_to(log);
    assert_eq!(wtx.child_count(), 2);
    assert_eq!(wtx.descendant_count(), 6);
    assert_consistent(&wtx);
}

#[test]
fn replace_attribute_with_attribute_source() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_attribute(&q("id"), "1", Movement::ToParent)
        .unwrap();
    wtx.commit().unwrap();

    let mut rtx = begin_read_trx(resource.as_ref(), 4, Revision::new(1)).unwrap();
    assert!(rtx.move_to_first_child());
    assert!(rtx.move_to_attribute(0));

    // Replace an attribute on a fresh element by the committed one.
    wtx.move_to_document_root();
    wtx.move_to_first_child();
    wtx.insert_element_as_first_child(&q("item")).unwrap();
    wtx.insert_attribute(&q("other"), "x", Movement::None)
        .unwrap();
    wtx.replace_with_subtree(&mut rtx).unwrap();
    assert_eq!(wtx.kind(), NodeKind::Attribute);
    assert_eq!(wtx.qname().unwrap().unwrap(), q("id"));
    assert_eq!(wtx.value().unwrap().as_deref(), Some("1"));
    wtx.move_to_parent();
    assert_eq!(wtx.qname().unwrap().unwrap(), q("item"));
    assert_eq!(wtx.attribute_count(), 1);
    assert_consistent(&wtx);
}

#[test]
fn eventual_consistency_repairs_at_commit() {
    let resource = Arc::new(MemResource::new(ResourceConfig {
        hash_kind: HashKind::Rolling,
        consistency: Consistency::Eventual,
        compression: false,
    }));
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    wtx.insert_text_as_right_sibling("tail").unwrap();
    wtx.commit().unwrap();

    let rtx = begin_read_trx(resource.as_ref(), 3, Revision::new(1)).unwrap();
    let violations = verify::check_read_trx(&rtx, HashKind::Rolling).unwrap();
    assert!(violations.is_empty(), "violations: {violations:?}");
}

#[test]
fn compressed_text_round_trips() {
    let resource = Arc::new(MemResource::new(ResourceConfig {
        hash_kind: HashKind::Rolling,
        consistency: Consistency::Strict,
        compression: true,
    }));
    let wtx = writer(&resource);
    insert_log(&wtx);
    let long = "a value comfortably longer than the compression threshold";
    wtx.insert_text_as_first_child(long).unwrap();
    assert_eq!(wtx.value().unwrap().as_deref(), Some(long));
    wtx.commit().unwrap();

    let mut rtx = begin_read_trx(resource.as_ref(), 2, Revision::new(1)).unwrap();
    assert!(rtx.move_to_first_child() && rtx.move_to_first_child());
    assert_eq!(rtx.value().unwrap().as_deref(), Some(long));
    assert_consistent(&wtx);
}

#[test]
fn postorder_kind_tracks_edits() {
    let resource = resource_with(HashKind::Postorder);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_element_as_first_child(&q("a")).unwrap();
    wtx.insert_attribute(&q("id"), "1", Movement::ToParent)
        .unwrap();
    wtx.insert_text_as_first_child("v").unwrap();
    wtx.set_value("w").unwrap();
    assert_consistent(&wtx);

    wtx.move_to_parent();
    wtx.remove().unwrap();
    assert_consistent(&wtx);
}

#[test]
fn attribute_and_namespace_removal() {
    let resource = resource_with(HashKind::Rolling);
    let wtx = writer(&resource);
    insert_log(&wtx);
    wtx.insert_attribute(&q("id"), "1", Movement::None).unwrap();
    assert_eq!(wtx.kind(), NodeKind::Attribute);
    wtx.remove().unwrap();
    assert_eq!(wtx.kind(), NodeKind::Element);
    assert_eq!(wtx.attribute_count(), 0);

    wtx.insert_namespace(&QName::new("p", "p", "ns:x"), Movement::None)
        .unwrap();
    assert_eq!(wtx.kind(), NodeKind::Namespace);
    wtx.remove().unwrap();
    assert_eq!(wtx.namespace_count(), 0);
    assert_consistent(&wtx);
}
