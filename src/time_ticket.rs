//! Logical identity for every CRDT node and operation (spec §4.1).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actor::ActorID;

/// 64-bit monotonic counter, one per replica.
pub type Lamport = u64;

/// A disambiguator within a single Lamport tick: every operation produced
/// inside one `ChangeContext` shares a Lamport value but gets a distinct,
/// increasing delimiter (spec §4.8).
pub type Delimiter = u32;

/// `(lamport, delimiter, actor)` — the total order every CRDT node and
/// operation is identified and compared by.
///
/// Ordering is lamport ascending, then actor lexicographic, then delimiter
/// ascending (spec §4.1). This is *not* the same field order as the struct
/// (delimiter sits between lamport and actor in the tuple definition, but
/// actor outranks delimiter for tie-breaking) so `Ord` is implemented by
/// hand rather than derived.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTicket {
    lamport: Lamport,
    delimiter: Delimiter,
    actor: ActorID,
}

impl TimeTicket {
    /// The smallest possible ticket: sorts before every real ticket.
    pub const INITIAL: TimeTicket = TimeTicket { lamport: 0, delimiter: 0, actor: ActorID::INITIAL };

    /// The largest possible ticket: sorts after every real ticket. Used as
    /// a sentinel upper bound (e.g. "end of document" rope positions).
    pub const MAX: TimeTicket =
        TimeTicket { lamport: u64::MAX, delimiter: u32::MAX, actor: ActorID::from_bytes([0xff; 12]) };

    pub fn new(lamport: Lamport, delimiter: Delimiter, actor: ActorID) -> Self {
        TimeTicket { lamport, delimiter, actor }
    }

    pub fn lamport(&self) -> Lamport {
        self.lamport
    }

    pub fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    pub fn actor(&self) -> ActorID {
        self.actor
    }

    /// `self` happened strictly after `other` in the total order.
    pub fn after(&self, other: &TimeTicket) -> bool {
        self > other
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }

    /// Returns a copy with `delimiter` replaced — used when a `ChangeContext`
    /// issues a fresh ticket from its Lamport/actor at a new delimiter.
    pub fn with_delimiter(&self, delimiter: Delimiter) -> Self {
        TimeTicket { delimiter, ..*self }
    }
}

impl PartialOrd for TimeTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.actor.cmp(&other.actor))
            .then_with(|| self.delimiter.cmp(&other.delimiter))
    }
}

impl fmt::Debug for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.lamport, self.delimiter, self.actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(b: u8) -> ActorID {
        ActorID::from_bytes([b; 12])
    }

    #[test]
    fn orders_by_lamport_then_actor_then_delimiter() {
        let a = TimeTicket::new(1, 5, actor(1));
        let b = TimeTicket::new(2, 0, actor(1));
        assert!(b.after(&a));

        let c = TimeTicket::new(1, 0, actor(2));
        let d = TimeTicket::new(1, 9, actor(1));
        assert!(c.after(&d)); // actor breaks the tie before delimiter does

        let e = TimeTicket::new(1, 0, actor(1));
        let f = TimeTicket::new(1, 1, actor(1));
        assert!(f.after(&e));
    }

    #[test]
    fn sentinels_bound_every_real_ticket() {
        let t = TimeTicket::new(42, 3, actor(7));
        assert!(t.after(&TimeTicket::INITIAL));
        assert!(TimeTicket::MAX.after(&t));
    }
}
