//! `ChangeContext`: accumulates the operations and presence update a host's
//! `Document::update` closure produces, against a private clone of the
//! document's root (spec §4.8, §4.9).
//!
//! Every operation issued through a context shares one Lamport tick;
//! `issue_ticket` pins that tick lazily, on the first operation, so a
//! closure that only touches presence never bumps the document's Lamport
//! clock for an operation it didn't produce (spec §4.8, SPEC_FULL.md's
//! `next` vs `next_without_clocks` split).

use crate::actor::ActorID;
use crate::change::Change;
use crate::change_id::ChangeID;
use crate::operation::Operation;
use crate::presence::PresenceChange;
use crate::root::Root;
use crate::time_ticket::{Delimiter, TimeTicket};

pub struct ChangeContext {
    root: Root,
    base_id: ChangeID,
    pinned_id: Option<ChangeID>,
    next_delimiter: Delimiter,
    operations: Vec<Operation>,
    presence_change: Option<PresenceChange>,
    message: Option<String>,
}

impl ChangeContext {
    pub fn new(root: Root, base_id: ChangeID) -> Self {
        ChangeContext { root, base_id, pinned_id: None, next_delimiter: 0, operations: Vec::new(), presence_change: None, message: None }
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Root {
        &mut self.root
    }

    pub fn actor(&self) -> ActorID {
        self.base_id.actor()
    }

    /// Issue a fresh `TimeTicket` for a new operation, pinning this
    /// context's Lamport tick on first use.
    pub fn issue_ticket(&mut self) -> TimeTicket {
        if self.pinned_id.is_none() {
            self.pinned_id = Some(self.base_id.next());
        }
        let delimiter = self.next_delimiter;
        self.next_delimiter += 1;
        self.pinned_id.as_ref().unwrap().make_ticket(delimiter)
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }

    pub fn set_presence_change(&mut self, change: PresenceChange) {
        self.presence_change = Some(change);
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Finalize into `(Change, mutated root)`, or `None` if the closure
    /// touched neither operations nor presence (spec §4.9: an update that
    /// changes nothing produces no change and fires no event).
    pub fn finish(self) -> Option<(Change, Root)> {
        if self.operations.is_empty() && self.presence_change.is_none() {
            return None;
        }
        let id = self.pinned_id.unwrap_or_else(|| self.base_id.next_without_clocks());
        let change = Change::new(id, self.operations, self.presence_change, self.message);
        Some((change, self.root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperandValue;
    use crate::primitive::Primitive;

    fn actor(b: u8) -> ActorID {
        ActorID::from_bytes([b; 12])
    }

    #[test]
    fn presence_only_context_advances_seq_but_not_lamport() {
        let base = ChangeID::initial().with_actor(actor(1)).next();
        let lamport_before = base.lamport();
        let mut ctx = ChangeContext::new(Root::new(), base);
        ctx.set_presence_change(PresenceChange::Clear);
        let (change, _root) = ctx.finish().unwrap();
        assert_eq!(change.id().lamport(), lamport_before);
        assert!(change.operations().is_empty());
    }

    #[test]
    fn operations_share_one_lamport_tick_with_increasing_delimiters() {
        let base = ChangeID::initial().with_actor(actor(1)).next();
        let mut ctx = ChangeContext::new(Root::new(), base);
        let t1 = ctx.issue_ticket();
        let t2 = ctx.issue_ticket();
        assert_eq!(t1.lamport(), t2.lamport());
        assert!(t2.delimiter() > t1.delimiter());
    }

    #[test]
    fn touching_nothing_produces_no_change() {
        let base = ChangeID::initial().with_actor(actor(1)).next();
        let ctx = ChangeContext::new(Root::new(), base);
        assert!(ctx.finish().is_none());
    }

    #[test]
    fn an_operation_pins_lamport_past_base() {
        let base = ChangeID::initial().with_actor(actor(1)).next();
        let lamport_before = base.lamport();
        let mut ctx = ChangeContext::new(Root::new(), base);
        let created_at = ctx.issue_ticket();
        ctx.push(Operation::Set {
            parent_created_at: TimeTicket::INITIAL,
            key: "a".into(),
            value: OperandValue::Primitive(Primitive::Int32(1)),
            created_at,
            executed_at: created_at,
        });
        let (change, _root) = ctx.finish().unwrap();
        assert!(change.id().lamport() > lamport_before);
    }
}
