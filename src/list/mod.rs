//! `RGATreeList` — a replicated, ordered, tombstone-preserving list with a
//! splay-indexed view for O(log n) amortized `index_of` / `find_by_index`
//! (spec §4.4). Used directly by `CrdtArray` (payload = child `TimeTicket`)
//! and by the tree module for sibling ordering.

use std::collections::HashMap;

use splay_index::{Handle, SplayIndex};

use crate::time_ticket::TimeTicket;

type NodeId = u32;

#[derive(Debug, Clone)]
struct Node<V> {
    created_at: TimeTicket,
    moved_at: Option<TimeTicket>,
    removed_at: Option<TimeTicket>,
    value: V,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    splay: Handle,
}

/// A replicated growable array of `V` values, ordered by an RGA
/// predecessor-and-tiebreak rule (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct RgaTreeList<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
    head: Option<NodeId>,
    by_created_at: HashMap<TimeTicket, NodeId>,
    by_splay_handle: HashMap<Handle, NodeId>,
    splay: SplayIndex,
}

impl<V: Clone> RgaTreeList<V> {
    pub fn new() -> Self {
        RgaTreeList {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            by_created_at: HashMap::new(),
            by_splay_handle: HashMap::new(),
            splay: SplayIndex::new(),
        }
    }

    fn alloc(&mut self, node: Node<V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id as usize] = Some(node);
            id
        } else {
            let id = self.nodes.len() as NodeId;
            self.nodes.push(Some(node));
            id
        }
    }

    fn node(&self, id: NodeId) -> &Node<V> {
        self.nodes[id as usize].as_ref().expect("dangling list node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<V> {
        self.nodes[id as usize].as_mut().expect("dangling list node id")
    }

    fn is_live(&self, id: NodeId) -> bool {
        self.node(id).removed_at.is_none()
    }

    /// Insert `value` identified by `created_at` immediately after the node
    /// identified by `prev_created_at` (or at the very front, when
    /// `prev_created_at` is `TimeTicket::INITIAL`).
    ///
    /// Concurrent-insert tiebreak (spec §4.4): walks right past any
    /// existing successor whose `created_at` is greater than the new
    /// node's, so concurrent inserts at the same predecessor end up
    /// ordered by descending `created_at` (spec §8 Invariant 5).
    pub fn insert_after(&mut self, prev_created_at: TimeTicket, created_at: TimeTicket, value: V) -> TimeTicket {
        let prev_id = if prev_created_at.is_initial() {
            None
        } else {
            Some(*self.by_created_at.get(&prev_created_at).expect("insert_after: unknown predecessor"))
        };

        let mut anchor = prev_id;
        loop {
            let next_id = match anchor {
                None => self.head,
                Some(id) => self.node(id).next,
            };
            match next_id {
                Some(next) if self.node(next).created_at > created_at => anchor = Some(next),
                _ => break,
            }
        }

        let next_of_anchor = match anchor {
            None => self.head,
            Some(id) => self.node(id).next,
        };
        let splay_after = anchor.map(|id| self.node(id).splay);
        let splay_handle = self.splay.insert_after(splay_after, 1);

        let new_id = self.alloc(Node {
            created_at,
            moved_at: None,
            removed_at: None,
            value,
            prev: anchor,
            next: next_of_anchor,
            splay: splay_handle,
        });

        match anchor {
            None => self.head = Some(new_id),
            Some(id) => self.node_mut(id).next = Some(new_id),
        }
        if let Some(next) = next_of_anchor {
            self.node_mut(next).prev = Some(new_id);
        }
        self.by_created_at.insert(created_at, new_id);
        self.by_splay_handle.insert(splay_handle, new_id);
        created_at
    }

    /// Relink `target` to sit right after `after_of` (spec §4.4 `move`).
    /// Rejected (returns `false`, stale-move no-op) unless
    /// `executed_at > target.moved_at`. Self-move is a no-op that still
    /// reports success (nothing to converge on).
    pub fn move_after(&mut self, target: TimeTicket, after_of: TimeTicket, executed_at: TimeTicket) -> bool {
        if target == after_of {
            return true;
        }
        let target_id = match self.by_created_at.get(&target) {
            Some(id) => *id,
            None => return false,
        };
        if self.node(target_id).moved_at.map(|m| executed_at > m).unwrap_or(true) {
            self.node_mut(target_id).moved_at = Some(executed_at);
        } else {
            return false; // stale move (spec §8 Invariant 7)
        }

        self.unlink(target_id);

        let after_id = if after_of.is_initial() { None } else { self.by_created_at.get(&after_of).copied() };
        let mut anchor = after_id;
        loop {
            let next_id = match anchor {
                None => self.head,
                Some(id) => self.node(id).next,
            };
            match next_id {
                Some(next) if next != target_id && self.node(next).created_at > self.node(target_id).created_at => {
                    anchor = Some(next)
                }
                _ => break,
            }
        }
        let next_of_anchor = match anchor {
            None => self.head,
            Some(id) => self.node(id).next,
        };

        self.node_mut(target_id).prev = anchor;
        self.node_mut(target_id).next = next_of_anchor;
        match anchor {
            None => self.head = Some(target_id),
            Some(id) => self.node_mut(id).next = Some(target_id),
        }
        if let Some(next) = next_of_anchor {
            self.node_mut(next).prev = Some(target_id);
        }

        // Re-attach the node's weight into the splay sequence at its new
        // structural position: the splay index only tracks order and
        // weight, not this linked list's pointers, so the cheapest correct
        // move is unlink-then-reinsert at the new anchor.
        let weight = if self.is_live(target_id) { 1 } else { 0 };
        let splay_after = anchor.map(|id| self.node(id).splay);
        let new_handle = self.splay.insert_after(splay_after, weight);
        self.node_mut(target_id).splay = new_handle;
        self.by_splay_handle.insert(new_handle, target_id);
        true
    }

    /// Unlink `id` from the doubly-linked list and free its splay slot.
    /// Callers that reuse the id (as `move_after` does) must re-insert it
    /// into the splay index afterward.
    fn unlink(&mut self, id: NodeId) {
        let (prev, next) = {
            let n = self.node(id);
            (n.prev, n.next)
        };
        match prev {
            None => self.head = next,
            Some(p) => self.node_mut(p).next = next,
        }
        if let Some(n) = next {
            self.node_mut(n).prev = prev;
        }
        let handle = self.node(id).splay;
        self.splay.remove(handle);
        self.by_splay_handle.remove(&handle);
    }

    /// Tombstone `target` at `executed_at` (spec §4.4 `remove`). Accepted
    /// only under the shared element invariant: `executed_at >= created_at`
    /// and (`removed_at` absent or `executed_at` strictly later).
    pub fn remove(&mut self, target: TimeTicket, executed_at: TimeTicket) -> bool {
        let id = match self.by_created_at.get(&target) {
            Some(id) => *id,
            None => return false,
        };
        let node = self.node(id);
        if executed_at < node.created_at {
            return false;
        }
        if node.removed_at.map(|r| executed_at > r).unwrap_or(true) {
            self.node_mut(id).removed_at = Some(executed_at);
            let handle = self.node(id).splay;
            self.splay.set_weight(handle, 0);
            true
        } else {
            false
        }
    }

    /// The `created_at` of the live element at live-length position `index`
    /// (O(log n) amortized via the splay index).
    pub fn created_at_at(&mut self, index: usize) -> Option<TimeTicket> {
        let handle = self.splay.find_by_index(index as u64)?;
        let id = *self.by_splay_handle.get(&handle)?;
        Some(self.node(id).created_at)
    }

    /// 0-based live-length position of `created_at`, or `None` if unknown.
    pub fn index_of(&mut self, created_at: TimeTicket) -> Option<usize> {
        let id = *self.by_created_at.get(&created_at)?;
        let handle = self.node(id).splay;
        Some(self.splay.index_of(handle) as usize)
    }

    pub fn len(&self) -> usize {
        self.splay.total_weight() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live values in document order.
    pub fn iter_live(&self) -> impl Iterator<Item = &V> {
        self.iter_in_order().filter(|(id, _)| self.is_live(*id)).map(|(id, _)| &self.node(id).value)
    }

    /// All (tombstoned included) `(created_at, &V)` pairs in document order.
    pub fn iter_all(&self) -> impl Iterator<Item = (TimeTicket, &V)> {
        self.iter_in_order().map(|(id, _)| (self.node(id).created_at, &self.node(id).value))
    }

    /// Every node (tombstoned included), in document order, with full
    /// identity metadata — used to snapshot the list for a change pack
    /// (spec §6.1 snapshot field).
    pub fn all_entries(&self) -> Vec<(TimeTicket, Option<TimeTicket>, Option<TimeTicket>, V)> {
        self.iter_in_order()
            .map(|(id, _)| {
                let n = self.node(id);
                (n.created_at, n.moved_at, n.removed_at, n.value.clone())
            })
            .collect()
    }

    /// Rebuild a list directly from an already-ordered snapshot (the order
    /// a snapshot stores is final document order, so entries are linked in
    /// directly rather than re-run through `insert_after`'s tie-break
    /// logic, which would be redundant work for already-resolved order).
    pub fn from_ordered(entries: Vec<(TimeTicket, Option<TimeTicket>, Option<TimeTicket>, V)>) -> Self {
        let mut list = RgaTreeList::new();
        let mut prev: Option<NodeId> = None;
        for (created_at, moved_at, removed_at, value) in entries {
            let weight = if removed_at.is_some() { 0 } else { 1 };
            let splay_after = prev.map(|id| list.node(id).splay);
            let splay_handle = list.splay.insert_after(splay_after, weight);
            let node = Node { created_at, moved_at, removed_at, value, prev, next: None, splay: splay_handle };
            let id = list.alloc(node);
            match prev {
                None => list.head = Some(id),
                Some(p) => list.node_mut(p).next = Some(id),
            }
            list.by_created_at.insert(created_at, id);
            list.by_splay_handle.insert(splay_handle, id);
            prev = Some(id);
        }
        list
    }

    fn iter_in_order(&self) -> impl Iterator<Item = (NodeId, ())> + '_ {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(id) = cur {
            out.push((id, ()));
            cur = self.node(id).next;
        }
        out.into_iter()
    }

    pub fn get(&self, created_at: TimeTicket) -> Option<&V> {
        let id = *self.by_created_at.get(&created_at)?;
        Some(&self.node(id).value)
    }

    pub fn is_removed(&self, created_at: TimeTicket) -> bool {
        self.by_created_at.get(&created_at).map(|id| self.node(*id).removed_at.is_some()).unwrap_or(false)
    }

    pub fn removed_at(&self, created_at: TimeTicket) -> Option<TimeTicket> {
        let id = *self.by_created_at.get(&created_at)?;
        self.node(id).removed_at
    }

    /// Fully unlink and free the node for `created_at` — used once GC has
    /// determined the tombstone is covered by every peer.
    pub fn purge(&mut self, created_at: TimeTicket) -> bool {
        let id = match self.by_created_at.remove(&created_at) {
            Some(id) => id,
            None => return false,
        };
        self.unlink(id);
        self.nodes[id as usize] = None;
        self.free.push(id);
        true
    }

    pub fn tombstones(&self) -> Vec<TimeTicket> {
        self.iter_in_order().filter(|(id, _)| !self.is_live(*id)).map(|(id, _)| self.node(id).created_at).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorID;

    fn ticket(l: u64, actor: u8) -> TimeTicket {
        TimeTicket::new(l, 0, ActorID::from_bytes([actor; 12]))
    }

    #[test]
    fn s1_sequential_appends_in_order() {
        let mut list: RgaTreeList<i32> = RgaTreeList::new();
        let a = ticket(1, 1);
        let b = ticket(2, 1);
        list.insert_after(TimeTicket::INITIAL, a, 1);
        list.insert_after(a, b, 2);
        assert_eq!(list.iter_live().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn concurrent_inserts_at_same_predecessor_order_by_descending_created_at() {
        let mut list: RgaTreeList<&'static str> = RgaTreeList::new();
        let root = ticket(1, 1);
        list.insert_after(TimeTicket::INITIAL, root, "root");
        let from_actor1 = ticket(2, 1);
        let from_actor2 = ticket(3, 2);
        // Both concurrently inserted after `root`.
        list.insert_after(root, from_actor1, "a1");
        list.insert_after(root, from_actor2, "a2");
        assert_eq!(list.iter_live().copied().collect::<Vec<_>>(), vec!["root", "a2", "a1"]);
    }

    #[test]
    fn remove_tombstones_without_unlinking() {
        let mut list: RgaTreeList<i32> = RgaTreeList::new();
        let a = ticket(1, 1);
        let b = ticket(2, 1);
        list.insert_after(TimeTicket::INITIAL, a, 1);
        list.insert_after(a, b, 2);
        list.remove(a, ticket(3, 1));
        assert_eq!(list.iter_live().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(list.iter_all().count(), 2);
    }

    #[test]
    fn stale_move_is_rejected() {
        let mut list: RgaTreeList<i32> = RgaTreeList::new();
        let a = ticket(1, 1);
        let b = ticket(2, 1);
        let c = ticket(3, 1);
        list.insert_after(TimeTicket::INITIAL, a, 1);
        list.insert_after(a, b, 2);
        list.insert_after(b, c, 3);

        assert!(list.move_after(c, a, ticket(10, 1)));
        assert_eq!(list.iter_live().copied().collect::<Vec<_>>(), vec![1, 3, 2]);

        // An older move attempt is stale and rejected.
        assert!(!list.move_after(c, b, ticket(5, 1)));
        assert_eq!(list.iter_live().copied().collect::<Vec<_>>(), vec![1, 3, 2]);
    }

    #[test]
    fn purge_removes_tombstone_from_structure() {
        let mut list: RgaTreeList<i32> = RgaTreeList::new();
        let a = ticket(1, 1);
        let b = ticket(2, 1);
        list.insert_after(TimeTicket::INITIAL, a, 1);
        list.insert_after(a, b, 2);
        list.remove(a, ticket(3, 1));
        assert!(list.purge(a));
        assert_eq!(list.iter_all().count(), 1);
    }

    #[test]
    fn snapshot_roundtrip_preserves_order_and_tombstones() {
        let mut list: RgaTreeList<i32> = RgaTreeList::new();
        let a = ticket(1, 1);
        let b = ticket(2, 1);
        let c = ticket(3, 1);
        list.insert_after(TimeTicket::INITIAL, a, 1);
        list.insert_after(a, b, 2);
        list.insert_after(b, c, 3);
        list.remove(b, ticket(4, 1));

        let rebuilt = RgaTreeList::from_ordered(list.all_entries());
        assert_eq!(rebuilt.iter_live().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(rebuilt.iter_all().count(), 3);
        assert!(rebuilt.is_removed(b));
    }
}
