//! `ChangeID`: the identity and causal metadata carried by every `Change`
//! (spec §3.1, §4.1).

use serde::{Deserialize, Serialize};

use crate::actor::ActorID;
use crate::time_ticket::{Delimiter, Lamport, TimeTicket};
use crate::version_vector::VersionVector;

/// `(client-seq, lamport, actor, version-vector, optional server-seq)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeID {
    client_seq: u32,
    lamport: Lamport,
    actor: ActorID,
    vector: VersionVector,
    server_seq: Option<i64>,
}

impl ChangeID {
    /// The identity a freshly-created (unattached) document starts with.
    pub fn initial() -> Self {
        ChangeID {
            client_seq: 0,
            lamport: 0,
            actor: ActorID::INITIAL,
            vector: VersionVector::new(),
            server_seq: None,
        }
    }

    pub fn new(client_seq: u32, lamport: Lamport, actor: ActorID, vector: VersionVector, server_seq: Option<i64>) -> Self {
        ChangeID { client_seq, lamport, actor, vector, server_seq }
    }

    pub fn client_seq(&self) -> u32 {
        self.client_seq
    }

    pub fn lamport(&self) -> Lamport {
        self.lamport
    }

    pub fn actor(&self) -> ActorID {
        self.actor
    }

    pub fn vector(&self) -> &VersionVector {
        &self.vector
    }

    pub fn server_seq(&self) -> Option<i64> {
        self.server_seq
    }

    pub fn with_actor(&self, actor: ActorID) -> ChangeID {
        ChangeID { actor, ..self.clone() }
    }

    pub fn with_server_seq(&self, server_seq: i64) -> ChangeID {
        ChangeID { server_seq: Some(server_seq), ..self.clone() }
    }

    /// Produce a `TimeTicket` for the `delimiter`-th operation generated
    /// under this ChangeID (all operations of one change share a Lamport
    /// value and differ only by delimiter, spec §4.8).
    pub fn make_ticket(&self, delimiter: Delimiter) -> TimeTicket {
        TimeTicket::new(self.lamport, delimiter, self.actor)
    }

    /// Advance to the next `ChangeID`, bumping client-seq, incrementing the
    /// Lamport clock, and recording `vector[actor] = lamport` — the "with
    /// clocks" form used by ordinary (operation-bearing) changes.
    pub fn next(&self) -> ChangeID {
        let lamport = self.lamport + 1;
        let mut vector = self.vector.clone();
        vector.set(self.actor, lamport);
        ChangeID {
            client_seq: self.client_seq + 1,
            lamport,
            actor: self.actor,
            vector,
            server_seq: None,
        }
    }

    /// Advance to the next `ChangeID` *without* bumping the Lamport clock —
    /// used for presence-only changes, which still need a fresh client-seq
    /// for the server to sequence them but carry no operation (spec §4.8,
    /// §9 "Presence-only changes").
    pub fn next_without_clocks(&self) -> ChangeID {
        ChangeID {
            client_seq: self.client_seq + 1,
            lamport: self.lamport,
            actor: self.actor,
            vector: self.vector.clone(),
            server_seq: None,
        }
    }

    /// Merge causal metadata from a remotely-received `ChangeID` (spec
    /// §4.1):
    /// 1. if `other` carries no clocks (lamport 0 and empty vector,
    ///    i.e. a fresh/unassigned ID), return a clone of `self`.
    /// 2. `new_lamport = max(self.lamport, other.lamport) + 1`.
    /// 3. `merged = pointwise max(self.vector, other.vector)`, then
    ///    `merged[self.actor] = new_lamport`.
    pub fn sync_clocks(&self, other: &ChangeID) -> ChangeID {
        if other.lamport == 0 && other.vector.is_empty() {
            return self.clone();
        }
        let new_lamport = self.lamport.max(other.lamport) + 1;
        let mut merged = VersionVector::max(&self.vector, &other.vector);
        merged.set(self.actor, new_lamport);
        ChangeID {
            client_seq: self.client_seq,
            lamport: new_lamport,
            actor: self.actor,
            vector: merged,
            server_seq: self.server_seq,
        }
    }

    /// Used when loading a snapshot (spec §4.1): merges `other_lamport`/
    /// `vector` into `self`, dropping the `initial` actor's vector entry
    /// first, then sets `merged[self.actor] = max(other_lamport + 1, self.lamport + 1)`.
    pub fn set_clocks(&self, other_lamport: Lamport, vector: &VersionVector) -> ChangeID {
        let incoming = vector.without_initial_actor();
        let mut merged = VersionVector::max(&self.vector, &incoming);
        let self_next = (other_lamport + 1).max(self.lamport + 1);
        merged.set(self.actor, self_next);
        ChangeID {
            client_seq: self.client_seq,
            lamport: self_next,
            actor: self.actor,
            vector: merged,
            server_seq: self.server_seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(b: u8) -> ActorID {
        ActorID::from_bytes([b; 12])
    }

    #[test]
    fn next_bumps_seq_and_lamport_and_records_self_in_vector() {
        let id = ChangeID::initial().with_actor(actor(1));
        let id2 = id.next();
        assert_eq!(id2.client_seq(), 1);
        assert_eq!(id2.lamport(), 1);
        assert_eq!(id2.vector().get(&actor(1)), 1);
    }

    #[test]
    fn next_without_clocks_bumps_seq_only() {
        let id = ChangeID::initial().with_actor(actor(1)).next();
        let presence_only = id.next_without_clocks();
        assert_eq!(presence_only.client_seq(), id.client_seq() + 1);
        assert_eq!(presence_only.lamport(), id.lamport());
    }

    #[test]
    fn sync_clocks_advances_lamport_past_both_sides() {
        let mut a = ChangeID::initial().with_actor(actor(1));
        a = a.next(); // lamport 1

        let mut remote_vector = VersionVector::new();
        remote_vector.set(actor(2), 5);
        let remote = ChangeID::new(0, 5, actor(2), remote_vector, Some(1));

        let synced = a.sync_clocks(&remote);
        assert_eq!(synced.lamport(), 6); // max(1,5)+1
        assert_eq!(synced.vector().get(&actor(1)), 6);
        assert_eq!(synced.vector().get(&actor(2)), 5);
    }

    #[test]
    fn sync_clocks_with_clockless_other_is_noop() {
        let a = ChangeID::initial().with_actor(actor(1)).next();
        let clockless = ChangeID::initial();
        let synced = a.sync_clocks(&clockless);
        assert_eq!(synced, a);
    }
}
