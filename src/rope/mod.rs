//! `RGATreeSplit` — a rope of split nodes for text and rich text (spec §4.5).
//!
//! Every node's identity is `(created_at, offset)`: `created_at` is the
//! ticket of the edit that first produced this stretch of text, `offset`
//! is how many characters into that original run this fragment starts.
//! Splitting a node at some interior point keeps the left fragment's id
//! unchanged and gives the right fragment a new, higher `offset` under the
//! same `created_at` — identity survives splitting (spec §8 Invariant 6).
//!
//! Edit/style positions are anchors of that same shape: `(created_at,
//! offset)` names "the boundary immediately before character `offset` of
//! the run created at `created_at`" (offset 0 of the sentinel head run
//! `TimeTicket::INITIAL` names "the start of the document"). Because the
//! anchor is identity-based rather than a raw integer index, it keeps
//! meaning the same place after concurrent edits elsewhere have shifted
//! everything around it — the property §8's S3 scenario depends on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use splay_index::{Handle, SplayIndex};

use crate::actor::ActorID;
use crate::rht::Rht;
use crate::time_ticket::TimeTicket;
use crate::version_vector::VersionVector;

type NodeId = u32;

/// Identity of a split node, and also the shape of an edit/style anchor
/// (spec §4.5: "Identity: `NodeID = (createdAt, offset)`").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitNodeId {
    pub created_at: TimeTicket,
    pub offset: u32,
}

impl SplitNodeId {
    pub const START: SplitNodeId = SplitNodeId { created_at: TimeTicket::INITIAL, offset: 0 };
}

#[derive(Debug, Clone)]
struct SplitNode {
    id: SplitNodeId,
    content: String,
    removed_at: Option<TimeTicket>,
    attrs: Rht<String>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    splay: Handle,
}

impl SplitNode {
    fn char_len(&self) -> u32 {
        self.content.chars().count() as u32
    }
}

/// Result of an `edit`: the updated max-created-at watermark map (spec
/// §4.5's `maxCreatedAtMapByActor`) and the ids of newly inserted content.
pub struct EditResult {
    pub max_created_at_map: HashMap<ActorID, TimeTicket>,
    pub inserted: Vec<SplitNodeId>,
}

/// A rope: ordered split nodes, each carrying live or tombstoned text
/// content, indexed by live character count via a splay tree.
#[derive(Debug, Clone)]
pub struct RgaTreeSplit {
    nodes: Vec<Option<SplitNode>>,
    free: Vec<NodeId>,
    head: NodeId,
    runs: HashMap<TimeTicket, Vec<NodeId>>,
    by_splay_handle: HashMap<Handle, NodeId>,
    splay: SplayIndex,
}

impl RgaTreeSplit {
    pub fn new() -> Self {
        let mut nodes = Vec::new();
        let mut splay = SplayIndex::new();
        let splay_handle = splay.insert_after(None, 0);
        nodes.push(Some(SplitNode {
            id: SplitNodeId::START,
            content: String::new(),
            removed_at: None,
            attrs: Rht::new(),
            prev: None,
            next: None,
            splay: splay_handle,
        }));
        let mut by_splay_handle = HashMap::new();
        by_splay_handle.insert(splay_handle, 0u32);
        RgaTreeSplit {
            nodes,
            free: Vec::new(),
            head: 0,
            runs: HashMap::from([(TimeTicket::INITIAL, vec![0u32])]),
            by_splay_handle,
            splay,
        }
    }

    fn node(&self, id: NodeId) -> &SplitNode {
        self.nodes[id as usize].as_ref().expect("dangling rope node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut SplitNode {
        self.nodes[id as usize].as_mut().expect("dangling rope node id")
    }

    fn insert_node_after(&mut self, after: NodeId, id: SplitNodeId, content: String, removed_at: Option<TimeTicket>) -> NodeId {
        let weight = if removed_at.is_some() { 0 } else { content.chars().count() as u64 };
        let splay_after = self.node(after).splay;
        let splay_handle = self.splay.insert_after(Some(splay_after), weight);
        let next_of_after = self.node(after).next;

        let new_node = SplitNode { id, content, removed_at, attrs: Rht::new(), prev: Some(after), next: next_of_after, splay: splay_handle };
        let node_id = if let Some(free_id) = self.free.pop() {
            self.nodes[free_id as usize] = Some(new_node);
            free_id
        } else {
            let nid = self.nodes.len() as NodeId;
            self.nodes.push(Some(new_node));
            nid
        };
        self.node_mut(after).next = Some(node_id);
        if let Some(n) = next_of_after {
            self.node_mut(n).prev = Some(node_id);
        }
        self.by_splay_handle.insert(splay_handle, node_id);
        self.runs.entry(id.created_at).or_default().push(node_id);
        node_id
    }

    /// Split node `node_id` so that it ends exactly `at` characters into its
    /// current content, producing a new fragment (same `created_at`, higher
    /// `offset`) for the remainder. No-op at the node's existing boundaries.
    fn split_at(&mut self, node_id: NodeId, at: u32) {
        let node = self.node(node_id);
        let len = node.char_len();
        if at == 0 || at >= len {
            return;
        }
        let chars: Vec<char> = node.content.chars().collect();
        let left: String = chars[..at as usize].iter().collect();
        let right: String = chars[at as usize..].iter().collect();
        let right_id = SplitNodeId { created_at: node.id.created_at, offset: node.id.offset + at };
        let removed_at = node.removed_at;
        let attrs = node.attrs.clone();
        let left_weight = if removed_at.is_some() { 0 } else { at as u64 };

        self.node_mut(node_id).content = left;
        let handle = self.node(node_id).splay;
        self.splay.set_weight(handle, left_weight);

        let new_id = self.insert_node_after(node_id, right_id, right, removed_at);
        self.node_mut(new_id).attrs = attrs;
    }

    /// Resolve an anchor to the node ending exactly at that boundary,
    /// splitting if the anchor falls inside a fragment's current content.
    /// Returns `None` if the anchor's run is unknown (e.g. the creating
    /// change hasn't been applied here yet — surfaced as `Reference` by
    /// the operation layer).
    fn resolve_anchor(&mut self, anchor: SplitNodeId) -> Option<NodeId> {
        let fragments = self.runs.get(&anchor.created_at)?.clone();
        for frag in fragments {
            let f = self.node(frag);
            let start = f.id.offset;
            let end = start + f.char_len();
            if anchor.offset < start || anchor.offset > end {
                continue;
            }
            // Checked in this order so the zero-length head sentinel
            // (start == end == 0) resolves to itself rather than to its
            // (nonexistent) predecessor: `SplitNodeId::START` must name
            // "right after the sentinel", not "nothing".
            if anchor.offset == end {
                return Some(frag);
            }
            if anchor.offset == start {
                // The boundary immediately before this fragment's first
                // character is whatever currently sits right before it.
                return self.node(frag).prev;
            }
            self.split_at(frag, anchor.offset - start);
            return Some(frag);
        }
        None
    }

    /// Apply an edit: delete the live range `[from, to)` and insert
    /// `content` at `from` (spec §4.5).
    ///
    /// `max_created_at_map_by_actor` carries, per actor, the highest
    /// `created_at` that actor is known to have contributed; a node is
    /// purged of content only when `executed_at` is later than both the
    /// node's own `created_at` and that actor's watermark — the
    /// "preserve concurrent inserts" rule.
    pub fn edit(
        &mut self,
        from: SplitNodeId,
        to: SplitNodeId,
        content: &str,
        max_created_at_map_by_actor: &HashMap<ActorID, TimeTicket>,
        executed_at: TimeTicket,
    ) -> Option<EditResult> {
        let from_anchor = self.resolve_anchor(from)?;
        let to_anchor = self.resolve_anchor(to)?;
        let mut map = max_created_at_map_by_actor.clone();

        let mut cur = self.node(from_anchor).next;
        let mut after_delete_cursor = from_anchor;
        loop {
            let Some(id) = cur else { break };
            let node = self.node(id);
            let actor = node.id.created_at.actor();
            let prior_watermark = map.get(&actor).copied();
            let node_created_at = node.id.created_at;
            map.entry(actor)
                .and_modify(|w| if node_created_at > *w { *w = node_created_at; })
                .or_insert(node_created_at);

            // An actor never seen before carries no watermark to compare
            // against; treat that as "unreached", not "already past", so a
            // first-seen concurrent insert survives on raw created_at alone.
            let preserve_as_concurrent = !(executed_at > node_created_at || prior_watermark.map(|w| executed_at > w).unwrap_or(false));
            if node.removed_at.is_none() && !preserve_as_concurrent {
                self.node_mut(id).removed_at = Some(executed_at);
                let handle = self.node(id).splay;
                self.splay.set_weight(handle, 0);
            }

            if id == to_anchor {
                break;
            }
            cur = self.node(id).next;
            after_delete_cursor = id;
        }
        let _ = after_delete_cursor;

        let mut inserted = Vec::new();
        if !content.is_empty() {
            let new_id = SplitNodeId { created_at: executed_at, offset: 0 };
            let mut anchor = from_anchor;
            loop {
                let next = self.node(anchor).next;
                match next {
                    Some(n) if self.node(n).id.created_at > executed_at => anchor = n,
                    _ => break,
                }
            }
            self.insert_node_after(anchor, new_id, content.to_string(), None);
            inserted.push(new_id);
            map.entry(executed_at.actor())
                .and_modify(|w| if executed_at > *w { *w = executed_at; })
                .or_insert(executed_at);
        }

        Some(EditResult { max_created_at_map: map, inserted })
    }

    /// Apply attribute updates to every live fragment in `[from, to)` (spec
    /// §4.5 style operation), using `(created_at, executed_at)` RHT
    /// priority per fragment.
    pub fn style(&mut self, from: SplitNodeId, to: SplitNodeId, attrs: &[(String, String)], executed_at: TimeTicket) -> Option<()> {
        let from_anchor = self.resolve_anchor(from)?;
        let to_anchor = self.resolve_anchor(to)?;

        let mut cur = self.node(from_anchor).next;
        loop {
            let Some(id) = cur else { break };
            if self.node(id).removed_at.is_none() {
                for (k, v) in attrs {
                    self.node_mut(id).attrs.set(k, executed_at, v.clone());
                }
            }
            if id == to_anchor {
                break;
            }
            cur = self.node(id).next;
        }
        Some(())
    }

    pub fn len(&self) -> usize {
        self.splay.total_weight() as usize
    }

    /// Live character offset of `anchor`, for descriptive event metadata
    /// only (spec §6.3 `OperationInfo` `from`/`to`) — not used by the edit
    /// algorithm itself, so an O(n) walk is fine.
    pub fn char_index_of(&mut self, anchor: SplitNodeId) -> Option<usize> {
        let target = self.resolve_anchor(anchor)?;
        let mut count = 0usize;
        let mut cur = Some(self.head);
        loop {
            let id = cur?;
            let node = self.node(id);
            if node.removed_at.is_none() {
                count += node.char_len() as usize;
            }
            if id == target {
                return Some(count);
            }
            cur = node.next;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every fragment after the sentinel head, in document order, with
    /// full identity and attribute metadata — used to snapshot the rope for
    /// a change pack (spec §6.1 snapshot field).
    pub fn all_fragments(&self) -> Vec<(SplitNodeId, String, Option<TimeTicket>, Vec<(String, String)>)> {
        let mut out = Vec::new();
        let mut cur = self.node(self.head).next;
        while let Some(id) = cur {
            let node = self.node(id);
            let attrs: Vec<_> = node.attrs.iter().map(|(k, v)| (k.to_owned(), v.clone())).collect();
            out.push((node.id, node.content.clone(), node.removed_at, attrs));
            cur = node.next;
        }
        out
    }

    /// Rebuild a rope directly from an already-ordered fragment snapshot
    /// (mirrors `RgaTreeList::from_ordered`: the snapshot's order is final,
    /// so fragments are linked in directly).
    pub fn from_fragments(fragments: Vec<(SplitNodeId, String, Option<TimeTicket>, Vec<(String, String)>)>) -> Self {
        let mut rope = RgaTreeSplit::new();
        let mut prev = rope.head;
        for (id, content, removed_at, attrs) in fragments {
            let node_id = rope.insert_node_after(prev, id, content, removed_at);
            for (k, v) in attrs {
                // Attribute priority ticket isn't preserved across the
                // wire today; re-apply at the fragment's own created_at so
                // `style` calls that postdate this snapshot still win.
                rope.node_mut(node_id).attrs.set(&k, id.created_at, v);
            }
            prev = node_id;
        }
        rope
    }

    /// Live text content, in document order.
    pub fn to_string_live(&self) -> String {
        let mut out = String::new();
        let mut cur = self.node(self.head).next;
        while let Some(id) = cur {
            let node = self.node(id);
            if node.removed_at.is_none() {
                out.push_str(&node.content);
            }
            cur = node.next;
        }
        out
    }

    /// Tombstoned fragment ids satisfying `dominates(removed_at)`.
    pub fn collectible_tombstones(&self, dominates: impl Fn(TimeTicket) -> bool) -> Vec<SplitNodeId> {
        let mut cur = self.node(self.head).next;
        let mut out = Vec::new();
        while let Some(id) = cur {
            let node = self.node(id);
            if let Some(r) = node.removed_at {
                if dominates(r) {
                    out.push(node.id);
                }
            }
            cur = node.next;
        }
        out
    }

    pub fn gc_covered_by_version_vector(&self, vv: &VersionVector) -> Vec<SplitNodeId> {
        self.collectible_tombstones(|t| vv.after_or_equal(&t))
    }

    /// Fully unlink and free the fragment identified by `id` — used once
    /// GC has determined the tombstone is covered by every peer.
    pub fn purge(&mut self, id: SplitNodeId) -> bool {
        let Some(fragments) = self.runs.get_mut(&id.created_at) else { return false };
        let Some(pos) = fragments.iter().position(|&n| self.nodes[n as usize].as_ref().map(|n| n.id) == Some(id)) else {
            return false;
        };
        let node_id = fragments.remove(pos);
        if fragments.is_empty() {
            self.runs.remove(&id.created_at);
        }

        let (prev, next) = {
            let n = self.node(node_id);
            (n.prev, n.next)
        };
        if let Some(p) = prev {
            self.node_mut(p).next = next;
        }
        if let Some(n) = next {
            self.node_mut(n).prev = prev;
        }
        let handle = self.node(node_id).splay;
        self.splay.remove(handle);
        self.by_splay_handle.remove(&handle);
        self.nodes[node_id as usize] = None;
        self.free.push(node_id);
        true
    }
}

impl Default for RgaTreeSplit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(b: u8) -> ActorID {
        ActorID::from_bytes([b; 12])
    }

    fn ticket(l: u64, a: u8) -> TimeTicket {
        TimeTicket::new(l, 0, actor(a))
    }

    #[test]
    fn insert_into_empty_rope() {
        let mut rope = RgaTreeSplit::new();
        rope.edit(SplitNodeId::START, SplitNodeId::START, "hello", &HashMap::new(), ticket(1, 1));
        assert_eq!(rope.to_string_live(), "hello");
        assert_eq!(rope.len(), 5);
    }

    #[test]
    fn s3_sequential_edits_replace_content() {
        let mut rope = RgaTreeSplit::new();
        let r1 = rope.edit(SplitNodeId::START, SplitNodeId::START, "hello", &HashMap::new(), ticket(1, 1)).unwrap();
        let inserted = r1.inserted[0];
        let end = SplitNodeId { created_at: inserted.created_at, offset: 5 };
        rope.edit(inserted, end, "world", &r1.max_created_at_map, ticket(2, 1));
        assert_eq!(rope.to_string_live(), "world");
    }

    #[test]
    fn split_preserves_text_concatenation() {
        let mut rope = RgaTreeSplit::new();
        let r1 = rope.edit(SplitNodeId::START, SplitNodeId::START, "hello", &HashMap::new(), ticket(1, 1)).unwrap();
        let base = r1.inserted[0];
        let mid = SplitNodeId { created_at: base.created_at, offset: 2 };
        rope.edit(mid, mid, "XX", &r1.max_created_at_map, ticket(2, 1));
        assert_eq!(rope.to_string_live(), "heXXllo");
    }

    #[test]
    fn s3_concurrent_edit_preserves_concurrent_insert() {
        // R1 types "hello", then R1 replaces [0,5) with "world" while R2
        // concurrently (same base state, no knowledge of R1's edit) edits
        // [2,4) with "XX". Replaying R2's edit against R1's already-applied
        // state must not destroy R2's insert.
        let mut rope = RgaTreeSplit::new();
        let r0 = rope.edit(SplitNodeId::START, SplitNodeId::START, "hello", &HashMap::new(), ticket(1, 1)).unwrap();
        let base = r0.inserted[0];

        // R1's replace of the whole word with "world" (executed_at ticket 2).
        let end = SplitNodeId { created_at: base.created_at, offset: 5 };
        let r1 = rope.edit(base, end, "world", &r0.max_created_at_map, ticket(2, 1)).unwrap();

        // R2's concurrent edit targets the *original* [2,4) anchor (it never
        // saw R1's edit), executed at a ticket from a different actor that
        // is NOT covered by actor 1's watermark as recorded locally.
        let from2 = SplitNodeId { created_at: base.created_at, offset: 2 };
        let to2 = SplitNodeId { created_at: base.created_at, offset: 4 };
        rope.edit(from2, to2, "XX", &r0.max_created_at_map, ticket(1, 2));
        let _ = r1;

        assert!(rope.to_string_live().contains("XX"));
    }

    #[test]
    fn edit_preserves_concurrent_insert_from_a_never_seen_actor() {
        // actor1 types "hello"; actor3 concurrently inserts "ZZ" at [2,2)
        // knowing actor1's state. actor2, who has never heard of actor3,
        // then replaces the whole original [0,5) range with "world" at a
        // lamport time earlier than actor3's insert. actor2's own
        // max_created_at_map has no entry for actor3 at all, so the only
        // signal available is the raw created_at/executed_at comparison;
        // ZZ's created_at outranks executed_at, so it must survive.
        let mut rope = RgaTreeSplit::new();
        let r0 = rope.edit(SplitNodeId::START, SplitNodeId::START, "hello", &HashMap::new(), ticket(1, 1)).unwrap();
        let base = r0.inserted[0];
        let mid = SplitNodeId { created_at: base.created_at, offset: 2 };
        rope.edit(mid, mid, "ZZ", &r0.max_created_at_map, ticket(5, 3));

        let end = SplitNodeId { created_at: base.created_at, offset: 5 };
        let actor2_known = r0.max_created_at_map.clone(); // no entry for actor 3
        rope.edit(base, end, "world", &actor2_known, ticket(3, 2));

        assert_eq!(rope.to_string_live(), "worldZZ");
    }

    #[test]
    fn gc_purges_only_dominated_tombstones() {
        let mut rope = RgaTreeSplit::new();
        let r0 = rope.edit(SplitNodeId::START, SplitNodeId::START, "hello", &HashMap::new(), ticket(1, 1)).unwrap();
        let base = r0.inserted[0];
        let end = SplitNodeId { created_at: base.created_at, offset: 5 };
        rope.edit(base, end, "", &r0.max_created_at_map, ticket(2, 1));
        assert_eq!(rope.to_string_live(), "");

        let mut vv = VersionVector::new();
        vv.set(actor(1), 1); // does not yet dominate removed_at = ticket(2,1)
        assert!(rope.gc_covered_by_version_vector(&vv).is_empty());

        vv.set(actor(1), 2);
        let collectible = rope.gc_covered_by_version_vector(&vv);
        assert_eq!(collectible.len(), 1);
        assert!(rope.purge(collectible[0]));
    }

    #[test]
    fn snapshot_roundtrip_preserves_text_and_tombstones() {
        let mut rope = RgaTreeSplit::new();
        let r0 = rope.edit(SplitNodeId::START, SplitNodeId::START, "hello", &HashMap::new(), ticket(1, 1)).unwrap();
        let base = r0.inserted[0];
        let mid = SplitNodeId { created_at: base.created_at, offset: 2 };
        rope.edit(mid, mid, "XX", &r0.max_created_at_map, ticket(2, 1));
        rope.style(SplitNodeId::START, mid, &[("bold".into(), "true".into())], ticket(3, 1));

        let rebuilt = RgaTreeSplit::from_fragments(rope.all_fragments());
        assert_eq!(rebuilt.to_string_live(), rope.to_string_live());
        assert_eq!(rebuilt.len(), rope.len());
    }
}
