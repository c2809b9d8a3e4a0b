//! End-to-end convergence scenarios (spec §8, S1-S6).

use crdt_doc::document::{Document, DocumentOptions};
use crdt_doc::operation::Operation;
use crdt_doc::rope::SplitNodeId;
use crdt_doc::{ActorID, DocError};

fn actor(b: u8) -> ActorID {
    ActorID::from_bytes([b; 12])
}

fn attached(doc_key: &str, a: u8) -> Document {
    Document::new(doc_key, DocumentOptions { actor: Some(actor(a)), disable_gc: false })
}

/// Sync `from` -> `to` by creating a change pack on `from` and applying it
/// to `to`. Mirrors the host-owned transport left out of scope by spec
/// §1: here it's just a direct in-process handoff of the pack.
fn sync(from: &mut Document, to: &mut Document) {
    let pack = from.create_change_pack(false);
    to.apply_change_pack(pack).unwrap();
}

#[test]
fn s1_sequential_array_appends_converge() {
    let mut r1 = attached("doc-s1", 1);
    let mut r2 = attached("doc-s1", 2);

    r1.update(None, |root, _presence| {
        let mut arr = root.set_new_array("array");
        arr.push_i32(1);
        arr.push_i32(2);
    })
    .unwrap();

    sync(&mut r1, &mut r2);

    assert_eq!(r2.get_root(), serde_json::json!({"array": [1, 2]}));
    assert_eq!(r2.get_root(), r1.get_root());
}

#[test]
fn s2_concurrent_move_and_append_converge() {
    let mut r1 = attached("doc-s2", 1);
    let mut r2 = attached("doc-s2", 2);

    r1.update(None, |root, _presence| {
        let mut arr = root.set_new_array("a");
        arr.push_i32(1);
        arr.push_i32(2);
        arr.push_i32(3);
    })
    .unwrap();
    sync(&mut r1, &mut r2);
    assert_eq!(r1.get_root(), serde_json::json!({"a": [1, 2, 3]}));
    assert_eq!(r2.get_root(), r1.get_root());

    // R1: move index 2 (value 3) to the front.
    r1.update(None, |root, _presence| {
        let mut arr = root.get_array("a").unwrap();
        arr.move_after(2, usize::MAX);
    })
    .unwrap();

    // R2 (concurrently, before observing R1's move): append 4.
    r2.update(None, |root, _presence| {
        let mut arr = root.get_array("a").unwrap();
        arr.push_i32(4);
    })
    .unwrap();

    sync(&mut r1, &mut r2);
    sync(&mut r2, &mut r1);

    let expected = serde_json::json!({"a": [3, 1, 2, 4]});
    assert_eq!(r1.get_root(), expected);
    assert_eq!(r2.get_root(), expected);
}

#[test]
fn s3_concurrent_text_edits_converge_and_interleave() {
    let mut r1 = attached("doc-s3", 1);
    let mut r2 = attached("doc-s3", 2);

    let mut base_created_at = None;
    r1.update(None, |root, _presence| {
        let mut text = root.set_new_text("body");
        text.edit(SplitNodeId::START, SplitNodeId::START, "hello");
    })
    .unwrap();

    let pack = r1.create_change_pack(false);
    for change in pack.changes() {
        for op in change.operations() {
            if let Operation::Edit { executed_at, .. } = op {
                base_created_at = Some(*executed_at);
            }
        }
    }
    r2.apply_change_pack(pack).unwrap();
    let base = base_created_at.expect("initial edit recorded an executed_at");

    assert_eq!(r1.get_root()["body"], serde_json::json!("hello"));
    assert_eq!(r2.get_root()["body"], serde_json::json!("hello"));

    let from_whole = SplitNodeId { created_at: base, offset: 0 };
    let to_whole = SplitNodeId { created_at: base, offset: 5 };
    r1.update(None, |root, _presence| {
        let mut text = root.get_text("body").unwrap();
        text.edit(from_whole, to_whole, "world");
    })
    .unwrap();

    let mid_from = SplitNodeId { created_at: base, offset: 2 };
    let mid_to = SplitNodeId { created_at: base, offset: 4 };
    r2.update(None, |root, _presence| {
        let mut text = root.get_text("body").unwrap();
        text.edit(mid_from, mid_to, "XX");
    })
    .unwrap();

    sync(&mut r1, &mut r2);
    sync(&mut r2, &mut r1);

    let t1 = r1.get_root()["body"].as_str().unwrap().to_owned();
    let t2 = r2.get_root()["body"].as_str().unwrap().to_owned();
    assert_eq!(t1, t2, "replicas must converge to the same text");
    assert!(t1.contains("XX"), "R2's concurrent insert must survive convergence");
}

#[test]
fn s4_concurrent_counter_increases_converge() {
    let mut r1 = attached("doc-s4", 1);
    let mut r2 = attached("doc-s4", 2);

    r1.update(None, |root, _presence| {
        root.set_new_counter_i64("c", 0);
    })
    .unwrap();
    sync(&mut r1, &mut r2);

    r1.update(None, |root, _presence| {
        root.increase_counter("c", crdt_doc::primitive::Primitive::Int64(3));
    })
    .unwrap();
    r2.update(None, |root, _presence| {
        root.increase_counter("c", crdt_doc::primitive::Primitive::Int64(-5));
    })
    .unwrap();

    sync(&mut r1, &mut r2);
    sync(&mut r2, &mut r1);

    assert_eq!(r1.get_root()["c"], serde_json::json!(-2));
    assert_eq!(r2.get_root()["c"], serde_json::json!(-2));
    assert_eq!(r1.garbage_collect_by_ticket(crdt_doc::TimeTicket::new(u64::MAX / 2, 0, actor(1))), 0);
}

#[test]
fn s5_update_after_remove_pack_fails_with_document_removed() {
    let mut r1 = attached("doc-s5", 1);
    r1.update(None, |root, _presence| {
        root.set_string("title", "hi");
    })
    .unwrap();

    let remove_pack = r1.create_change_pack(true);
    let mut r2 = attached("doc-s5", 2);
    r2.apply_change_pack(remove_pack).unwrap();
    assert_eq!(r2.status(), crdt_doc::document::DocStatus::Removed);

    let err = r2.update(None, |root, _presence| {
        root.set_string("another", "x");
    })
    .unwrap_err();
    assert!(matches!(err, DocError::DocumentRemoved));
}

#[test]
fn s6_presence_change_observed_by_remote_replica() {
    let mut r1 = attached("doc-s6", 1);
    let mut r2 = attached("doc-s6", 2);

    r1.update(None, |_root, presence| {
        presence.set("cursor", serde_json::json!({"x": 1, "y": 2}));
    })
    .unwrap();

    sync(&mut r1, &mut r2);

    let presence = r2.get_presence(&actor(1)).expect("presence for r1's actor observed");
    assert_eq!(presence.get("cursor"), Some(&serde_json::json!({"x": 1, "y": 2})));
}
