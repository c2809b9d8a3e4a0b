//! Randomized convergence checks (spec §8 Invariant 1, via proptest).

use proptest::prelude::*;

use crdt_doc::document::{Document, DocumentOptions};
use crdt_doc::primitive::Primitive;
use crdt_doc::ActorID;

fn actor(b: u8) -> ActorID {
    ActorID::from_bytes([b; 12])
}

fn attached(doc_key: &str, a: u8) -> Document {
    Document::new(doc_key, DocumentOptions { actor: Some(actor(a)), disable_gc: false })
}

fn sync(from: &mut Document, to: &mut Document) {
    let pack = from.create_change_pack(false);
    to.apply_change_pack(pack).unwrap();
}

proptest! {
    /// Two replicas independently increase the same counter by arbitrary
    /// amounts, then exchange change packs in both directions. The
    /// increase-only counter CRDT commutes, so the final value must equal
    /// the sum of every increase regardless of how the two sides split
    /// their work or which order the two syncs happen in.
    #[test]
    fn counter_increases_converge_regardless_of_split(
        r1_deltas in prop::collection::vec(-100i64..100, 0..6),
        r2_deltas in prop::collection::vec(-100i64..100, 0..6),
    ) {
        let mut r1 = attached("doc-prop-counter", 1);
        let mut r2 = attached("doc-prop-counter", 2);

        r1.update(None, |root, _presence| {
            root.set_new_counter_i64("c", 0);
        })
        .unwrap();
        sync(&mut r1, &mut r2);

        for d in &r1_deltas {
            r1.update(None, |root, _presence| {
                root.increase_counter("c", Primitive::Int64(*d));
            })
            .unwrap();
        }
        for d in &r2_deltas {
            r2.update(None, |root, _presence| {
                root.increase_counter("c", Primitive::Int64(*d));
            })
            .unwrap();
        }

        sync(&mut r1, &mut r2);
        sync(&mut r2, &mut r1);

        let expected: i64 = r1_deltas.iter().chain(r2_deltas.iter()).sum();
        prop_assert_eq!(r1.get_root()["c"].as_i64().unwrap(), expected);
        prop_assert_eq!(r2.get_root()["c"].as_i64().unwrap(), expected);
    }

    /// Sequential array appends from a single replica converge to the
    /// inserted order on a fresh replica regardless of how many elements
    /// were pushed (spec §8 S1, generalized from a fixed-size example).
    #[test]
    fn array_appends_converge_to_insertion_order(values in prop::collection::vec(any::<i32>(), 0..8)) {
        let mut r1 = attached("doc-prop-array", 1);
        let mut r2 = attached("doc-prop-array", 2);

        r1.update(None, |root, _presence| {
            let mut arr = root.set_new_array("a");
            for v in &values {
                arr.push_i32(*v);
            }
        })
        .unwrap();

        sync(&mut r1, &mut r2);

        let expected = serde_json::json!({"a": values});
        prop_assert_eq!(r2.get_root(), expected);
        prop_assert_eq!(r1.get_root(), r2.get_root());
    }
}
