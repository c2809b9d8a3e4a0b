//! Version vectors and checkpoints (spec §3.1).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::actor::ActorID;
use crate::time_ticket::{Lamport, TimeTicket};

/// Per-actor Lamport map capturing exact causal coverage.
///
/// Backed by a `BTreeMap` (not a `HashMap`) so iteration order is
/// deterministic by actor — required for `to_wire_map` to produce a stable
/// byte representation across replicas (spec §6.1; SPEC_FULL.md §B.1).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector(BTreeMap<ActorID, Lamport>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor: &ActorID) -> Lamport {
        self.0.get(actor).copied().unwrap_or(0)
    }

    pub fn set(&mut self, actor: ActorID, lamport: Lamport) {
        self.0.insert(actor, lamport);
    }

    /// Pointwise maximum merge (spec §3.1: "pointwise max on merge").
    pub fn merge(&mut self, other: &VersionVector) {
        for (actor, lamport) in other.0.iter() {
            let entry = self.0.entry(*actor).or_insert(0);
            if *lamport > *entry {
                *entry = *lamport;
            }
        }
    }

    pub fn max(a: &VersionVector, b: &VersionVector) -> VersionVector {
        let mut out = a.clone();
        out.merge(b);
        out
    }

    /// `vector[ticket.actor] >= ticket.lamport` — this vector has causally
    /// observed `ticket`.
    pub fn after_or_equal(&self, ticket: &TimeTicket) -> bool {
        self.get(&ticket.actor()) >= ticket.lamport()
    }

    /// True iff `after_or_equal` holds with respect to every actor this
    /// vector or `other` know about — used when checking whether a set of
    /// peers (represented as one merged vector) all dominate a tombstone.
    pub fn dominates(&self, other: &VersionVector) -> bool {
        other.0.iter().all(|(actor, lamport)| self.get(actor) >= *lamport)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActorID, &Lamport)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop the `initial` sentinel actor's entry. Used by `ChangeID::set_clocks`
    /// when loading a snapshot (spec §4.1).
    pub fn without_initial_actor(&self) -> VersionVector {
        let mut out = self.clone();
        out.0.remove(&ActorID::INITIAL);
        out
    }

    /// `actor -> lamport` map for the wire `version_vector` field (spec §6.1).
    pub fn to_wire_map(&self) -> BTreeMap<String, i64> {
        self.0.iter().map(|(a, l)| (a.to_hex(), *l as i64)).collect()
    }

    pub fn from_wire_map(map: &BTreeMap<String, i64>) -> Option<VersionVector> {
        let mut out = VersionVector::new();
        for (hex, lamport) in map {
            let actor = ActorID::from_hex(hex)?;
            out.set(actor, (*lamport).max(0) as Lamport);
        }
        Some(out)
    }
}

/// `(server_seq, client_seq)` cursor into the mutual operation log.
///
/// Forward-only: `forward` advances each component to the pointwise max
/// (spec §3.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    server_seq: i64,
    client_seq: u32,
}

impl Checkpoint {
    pub const INITIAL: Checkpoint = Checkpoint { server_seq: 0, client_seq: 0 };

    pub fn new(server_seq: i64, client_seq: u32) -> Self {
        Checkpoint { server_seq, client_seq }
    }

    pub fn server_seq(&self) -> i64 {
        self.server_seq
    }

    pub fn client_seq(&self) -> u32 {
        self.client_seq
    }

    pub fn forward(&mut self, other: &Checkpoint) {
        self.server_seq = self.server_seq.max(other.server_seq);
        self.client_seq = self.client_seq.max(other.client_seq);
    }

    pub fn increased_client_seq(&self, by: u32) -> Checkpoint {
        Checkpoint { server_seq: self.server_seq, client_seq: self.client_seq + by }
    }

    /// `self >= other`, component-wise — used to check checkpoint
    /// monotonicity (spec §8 Invariant 9).
    pub fn ge(&self, other: &Checkpoint) -> bool {
        self.server_seq >= other.server_seq && self.client_seq >= other.client_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(b: u8) -> ActorID {
        ActorID::from_bytes([b; 12])
    }

    #[test]
    fn merge_is_pointwise_max() {
        let mut a = VersionVector::new();
        a.set(actor(1), 5);
        a.set(actor(2), 1);
        let mut b = VersionVector::new();
        b.set(actor(1), 2);
        b.set(actor(2), 9);
        a.merge(&b);
        assert_eq!(a.get(&actor(1)), 5);
        assert_eq!(a.get(&actor(2)), 9);
    }

    #[test]
    fn after_or_equal_checks_single_actor_lamport() {
        let mut vv = VersionVector::new();
        vv.set(actor(1), 5);
        let t = TimeTicket::new(5, 0, actor(1));
        assert!(vv.after_or_equal(&t));
        let t2 = TimeTicket::new(6, 0, actor(1));
        assert!(!vv.after_or_equal(&t2));
    }

    #[test]
    fn checkpoint_forward_is_componentwise_max() {
        let mut c = Checkpoint::new(5, 10);
        c.forward(&Checkpoint::new(3, 20));
        assert_eq!(c, Checkpoint::new(5, 20));
    }

    #[test]
    fn wire_map_roundtrip() {
        let mut vv = VersionVector::new();
        vv.set(actor(1), 7);
        vv.set(actor(2), 3);
        let map = vv.to_wire_map();
        let back = VersionVector::from_wire_map(&map).unwrap();
        assert_eq!(vv, back);
    }
}
