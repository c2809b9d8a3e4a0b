//! CRDT Tree — a rooted node graph with typed elements and text leaves
//! (spec §4.6).
//!
//! Every node has a `created_at` identity and lives in exactly one parent's
//! ordered child list. Each parent indexes its own children with a
//! [`SplayIndex`] (weight 1 per live child) so `index_of`/`child_at`
//! conversions at that level are O(log n) amortized — the tree is a forest
//! of small splay indices rather than one index over the whole document,
//! matching "every internal node carries a splay tree over children."
//!
//! Text content lives only on leaf nodes and is itself splittable at edit
//! boundaries, the same way `RgaTreeSplit` splits rope nodes — a tree leaf
//! is a one-node rope.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use splay_index::{Handle, SplayIndex};

use crate::rht::Rht;
use crate::time_ticket::TimeTicket;

type NodeId = u32;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// An element node with a tag name, e.g. `"p"`, `"doc"`.
    Element(String),
    /// A text leaf. Its own content is splittable, like a rope node.
    Text(String),
}

#[derive(Clone, Debug)]
struct TreeNode {
    id: TimeTicket,
    kind: NodeKind,
    parent: Option<NodeId>,
    /// Children in document order, oldest split-fragment first. Includes
    /// tombstoned children (unlinked only by GC).
    children: Vec<NodeId>,
    attrs: Rht<String>,
    removed_at: Option<TimeTicket>,
    /// This node's handle in its *parent's* sibling splay index. `None` for
    /// the root, which has no parent index entry.
    sibling_handle: Option<Handle>,
}

/// A position within the tree: a node id and a character/child offset
/// inside it (spec §4.6: conversions `path ↔ index ↔ pos`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreePos {
    pub node: TimeTicket,
    pub offset: u32,
}

pub struct TreeEditResult {
    pub max_created_at_map: HashMap<crate::actor::ActorID, TimeTicket>,
}

/// A serializable mirror of one tree node and its subtree (spec §6.1
/// snapshot field; SPEC_FULL.md's ambient wire stack).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeNodeSnapshot {
    pub id: TimeTicket,
    pub kind: NodeKind,
    pub removed_at: Option<TimeTicket>,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<TreeNodeSnapshot>,
}

/// Replicated rooted tree. The root element (`created_at ==
/// TimeTicket::INITIAL`) always exists and is never removed.
#[derive(Clone, Debug)]
pub struct CrdtTree {
    nodes: Vec<Option<TreeNode>>,
    free: Vec<NodeId>,
    by_created_at: HashMap<TimeTicket, NodeId>,
    /// Per-parent sibling ordering index.
    sibling_index: HashMap<NodeId, SplayIndex>,
    root: NodeId,
}

impl CrdtTree {
    pub fn new(root_tag: &str) -> Self {
        let root_node = TreeNode {
            id: TimeTicket::INITIAL,
            kind: NodeKind::Element(root_tag.to_owned()),
            parent: None,
            children: Vec::new(),
            attrs: Rht::new(),
            removed_at: None,
            sibling_handle: None,
        };
        let mut by_created_at = HashMap::new();
        by_created_at.insert(TimeTicket::INITIAL, 0u32);
        CrdtTree {
            nodes: vec![Some(root_node)],
            free: Vec::new(),
            by_created_at,
            sibling_index: HashMap::from([(0u32, SplayIndex::new())]),
            root: 0,
        }
    }

    fn node(&self, id: NodeId) -> &TreeNode {
        self.nodes[id as usize].as_ref().expect("dangling tree node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        self.nodes[id as usize].as_mut().expect("dangling tree node id")
    }

    pub fn root_created_at(&self) -> TimeTicket {
        TimeTicket::INITIAL
    }

    fn find(&self, created_at: TimeTicket) -> Option<NodeId> {
        self.by_created_at.get(&created_at).copied()
    }

    /// Insert a new child of `parent_created_at` right after the child
    /// identified by `prev_created_at` (`None` = insert as first child).
    /// Idempotent under `created_at` (spec §4.7): a `created_at` already
    /// registered means this insert was already applied, so replay is a
    /// no-op rather than a duplicate sibling.
    pub fn insert(
        &mut self,
        parent_created_at: TimeTicket,
        prev_created_at: Option<TimeTicket>,
        created_at: TimeTicket,
        kind: NodeKind,
    ) -> Option<()> {
        if self.by_created_at.contains_key(&created_at) {
            return Some(());
        }
        let parent = self.find(parent_created_at)?;
        let prev_handle = match prev_created_at {
            None => None,
            Some(t) => {
                let prev_id = self.find(t)?;
                self.node(prev_id).sibling_handle
            }
        };

        let splay = self.sibling_index.get_mut(&parent).unwrap();
        let handle = splay.insert_after(prev_handle, 1);

        let node = TreeNode {
            id: created_at,
            kind,
            parent: Some(parent),
            children: Vec::new(),
            attrs: Rht::new(),
            removed_at: None,
            sibling_handle: Some(handle),
        };
        let node_id = if let Some(id) = self.free.pop() {
            self.nodes[id as usize] = Some(node);
            id
        } else {
            let id = self.nodes.len() as NodeId;
            self.nodes.push(Some(node));
            id
        };
        self.sibling_index.insert(node_id, SplayIndex::new());

        let prev_index = prev_handle.map(|_| {
            let s = self.sibling_index.get_mut(&parent).unwrap();
            s.index_of(handle)
        });
        let insert_at = prev_index.map(|i| i as usize + 1).unwrap_or(0);
        self.node_mut(parent).children.insert(insert_at.min(self.node(parent).children.len()), node_id);

        self.by_created_at.insert(created_at, node_id);
        Some(())
    }

    /// Tombstone `created_at` and its whole subtree (spec §4.6: "removes
    /// (tombstones) nodes fully inside the range").
    pub fn remove_subtree(&mut self, created_at: TimeTicket, executed_at: TimeTicket) -> bool {
        let Some(id) = self.find(created_at) else { return false };
        if self.node(id).removed_at.map(|r| executed_at > r).unwrap_or(true) {
            self.tombstone_recursive(id, executed_at);
            true
        } else {
            false
        }
    }

    fn tombstone_recursive(&mut self, id: NodeId, executed_at: TimeTicket) {
        self.node_mut(id).removed_at = Some(executed_at);
        if let Some(parent) = self.node(id).parent {
            if let Some(handle) = self.node(id).sibling_handle {
                self.sibling_index.get_mut(&parent).unwrap().set_weight(handle, 0);
            }
        }
        let children = self.node(id).children.clone();
        for child in children {
            self.tombstone_recursive(child, executed_at);
        }
    }

    /// Apply RHT attribute updates to the internal node `created_at` (spec
    /// §4.6 `style`).
    pub fn style(&mut self, created_at: TimeTicket, attrs: &[(String, String)], executed_at: TimeTicket) -> Option<()> {
        let id = self.find(created_at)?;
        if self.node(id).removed_at.is_some() {
            return Some(());
        }
        for (k, v) in attrs {
            self.node_mut(id).attrs.set(k, executed_at, v.clone());
        }
        Some(())
    }

    /// Edit a text leaf's content in place — the common case where `from`
    /// and `to` resolve inside the same text node (spec §4.6: "behaves as a
    /// rope edit").
    pub fn edit_text_leaf(&mut self, leaf_created_at: TimeTicket, from: u32, to: u32, content: &str) -> Option<()> {
        let id = self.find(leaf_created_at)?;
        let NodeKind::Text(text) = &self.node(id).kind else { return None };
        let chars: Vec<char> = text.chars().collect();
        if to as usize > chars.len() || from > to {
            return None;
        }
        let mut next: String = chars[..from as usize].iter().collect();
        next.push_str(content);
        next.extend(chars[to as usize..].iter());
        self.node_mut(id).kind = NodeKind::Text(next);
        Some(())
    }

    /// Insert a brand-new text leaf as a child of `parent_created_at`.
    pub fn insert_text(&mut self, parent_created_at: TimeTicket, prev_created_at: Option<TimeTicket>, created_at: TimeTicket, content: &str) -> Option<()> {
        self.insert(parent_created_at, prev_created_at, created_at, NodeKind::Text(content.to_owned()))
    }

    /// Every child, live or tombstoned, still linked under `parent_created_at`.
    pub fn child_count(&self, parent_created_at: TimeTicket) -> Option<usize> {
        let id = self.find(parent_created_at)?;
        Some(self.node(id).children.len())
    }

    /// Live (non-tombstoned) child count of `parent_created_at` — what a
    /// host-facing index is counted against (spec §4.6: "conversions path ↔
    /// index ↔ pos" only ever address live children).
    pub fn live_child_count(&self, parent_created_at: TimeTicket) -> Option<usize> {
        let id = self.find(parent_created_at)?;
        Some(self.node(id).children.iter().filter(|c| self.node(**c).removed_at.is_none()).count())
    }

    /// Resolve a host-facing insert position `index`, counted over live
    /// children only, to the `created_at` of the live sibling an RGA insert
    /// should land after. `Some(None)` means "insert as the first live
    /// child"; `None` means `parent_created_at` is unknown or `index` is
    /// past the live child count (a genuine reference failure, not
    /// "prepend").
    pub fn prev_sibling_for_insert_at(&self, parent_created_at: TimeTicket, index: u32) -> Option<Option<TimeTicket>> {
        let id = self.find(parent_created_at)?;
        if index == 0 {
            return Some(None);
        }
        let live_count = self.node(id).children.iter().filter(|c| self.node(**c).removed_at.is_none()).count();
        if index as usize > live_count {
            return None;
        }
        let prev = self
            .node(id)
            .children
            .iter()
            .filter(|c| self.node(**c).removed_at.is_none())
            .nth((index - 1) as usize)
            .map(|c| self.node(*c).id);
        Some(prev)
    }

    /// The live child index of `created_at` within its parent (spec §4.6
    /// index conversion), or `None` if it is tombstoned or unknown.
    pub fn live_index_in_parent(&mut self, created_at: TimeTicket) -> Option<u64> {
        let id = self.find(created_at)?;
        if self.node(id).removed_at.is_some() {
            return None;
        }
        let parent = self.node(id).parent?;
        let handle = self.node(id).sibling_handle?;
        Some(self.sibling_index.get_mut(&parent).unwrap().index_of(handle))
    }

    pub fn is_removed(&self, created_at: TimeTicket) -> bool {
        self.find(created_at).map(|id| self.node(id).removed_at.is_some()).unwrap_or(false)
    }

    pub fn attrs(&self, created_at: TimeTicket) -> Option<&Rht<String>> {
        let id = self.find(created_at)?;
        Some(&self.node(id).attrs)
    }

    /// Structural projection to JSON: `{type, children: [...]}` for
    /// elements, `{type:"text", value}` for leaves. Tombstoned nodes are
    /// skipped.
    pub fn to_json(&self) -> serde_json::Value {
        self.node_to_json(self.root)
    }

    fn node_to_json(&self, id: NodeId) -> serde_json::Value {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Text(s) => serde_json::json!({ "type": "text", "value": s }),
            NodeKind::Element(tag) => {
                let children: Vec<_> = node
                    .children
                    .iter()
                    .filter(|c| self.node(**c).removed_at.is_none())
                    .map(|c| self.node_to_json(*c))
                    .collect();
                let attrs: serde_json::Map<_, _> = node.attrs.iter().map(|(k, v)| (k.to_owned(), serde_json::Value::String(v.clone()))).collect();
                serde_json::json!({ "type": tag, "attrs": attrs, "children": children })
            }
        }
    }

    /// Tombstoned node ids whose `removed_at` satisfies `dominates`,
    /// traversed from `from` downward (used by GC).
    pub fn collectible_tombstones(&self, dominates: impl Fn(TimeTicket) -> bool + Copy) -> Vec<TimeTicket> {
        let mut out = Vec::new();
        self.collect_tombstones_from(self.root, dominates, &mut out);
        out
    }

    fn collect_tombstones_from(&self, id: NodeId, dominates: impl Fn(TimeTicket) -> bool + Copy, out: &mut Vec<TimeTicket>) {
        let node = self.node(id);
        if let Some(r) = node.removed_at {
            if dominates(r) {
                out.push(node.id);
            }
        }
        for child in &node.children {
            self.collect_tombstones_from(*child, dominates, out);
        }
    }

    /// A serializable mirror of one node and its subtree, used to snapshot
    /// the whole tree for a change pack (spec §6.1 snapshot field).
    pub fn to_snapshot(&self) -> TreeNodeSnapshot {
        self.node_to_snapshot(self.root)
    }

    fn node_to_snapshot(&self, id: NodeId) -> TreeNodeSnapshot {
        let node = self.node(id);
        TreeNodeSnapshot {
            id: node.id,
            kind: node.kind.clone(),
            removed_at: node.removed_at,
            attrs: node.attrs.iter().map(|(k, v)| (k.to_owned(), v.clone())).collect(),
            children: node.children.iter().map(|c| self.node_to_snapshot(*c)).collect(),
        }
    }

    /// Rebuild a tree from its root snapshot.
    pub fn from_snapshot(snapshot: TreeNodeSnapshot) -> Self {
        let root_tag = match &snapshot.kind {
            NodeKind::Element(tag) => tag.clone(),
            NodeKind::Text(_) => String::new(), // invariant: root is never a text leaf
        };
        let mut tree = CrdtTree::new(&root_tag);
        for (k, v) in &snapshot.attrs {
            tree.node_mut(tree.root).attrs.set(k, snapshot.id, v.clone());
        }
        tree.insert_snapshot_children(tree.root, snapshot.id, &snapshot.children);
        tree
    }

    fn insert_snapshot_children(&mut self, parent: NodeId, parent_created_at: TimeTicket, children: &[TreeNodeSnapshot]) {
        let mut prev: Option<TimeTicket> = None;
        for child in children {
            self.insert(parent_created_at, prev, child.id, child.kind.clone()).expect("snapshot children insert in order");
            let child_id = self.find(child.id).expect("just-inserted snapshot node");
            for (k, v) in &child.attrs {
                self.node_mut(child_id).attrs.set(k, child.id, v.clone());
            }
            if let Some(r) = child.removed_at {
                self.node_mut(child_id).removed_at = Some(r);
                if let Some(handle) = self.node(child_id).sibling_handle {
                    self.sibling_index.get_mut(&parent).unwrap().set_weight(handle, 0);
                }
            }
            self.insert_snapshot_children(child_id, child.id, &child.children);
            prev = Some(child.id);
        }
    }

    pub fn purge(&mut self, created_at: TimeTicket) -> bool {
        let Some(id) = self.find(created_at) else { return false };
        let Some(parent) = self.node(id).parent else { return false };
        if let Some(handle) = self.node(id).sibling_handle {
            self.sibling_index.get_mut(&parent).unwrap().remove(handle);
        }
        self.node_mut(parent).children.retain(|c| *c != id);
        self.by_created_at.remove(&created_at);
        self.sibling_index.remove(&id);
        self.nodes[id as usize] = None;
        self.free.push(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorID;

    fn actor(b: u8) -> ActorID {
        ActorID::from_bytes([b; 12])
    }

    fn ticket(l: u64) -> TimeTicket {
        TimeTicket::new(l, 0, actor(1))
    }

    #[test]
    fn insert_children_in_order() {
        let mut tree = CrdtTree::new("doc");
        let root = tree.root_created_at();
        let p1 = ticket(1);
        let p2 = ticket(2);
        tree.insert(root, None, p1, NodeKind::Element("p".into())).unwrap();
        tree.insert(root, Some(p1), p2, NodeKind::Element("p".into())).unwrap();
        assert_eq!(tree.child_count(root), Some(2));
        assert_eq!(tree.live_index_in_parent(p2), Some(1));
    }

    #[test]
    fn remove_subtree_tombstones_descendants() {
        let mut tree = CrdtTree::new("doc");
        let root = tree.root_created_at();
        let p1 = ticket(1);
        let text = ticket(2);
        tree.insert(root, None, p1, NodeKind::Element("p".into())).unwrap();
        tree.insert_text(p1, None, text, "hi").unwrap();
        tree.remove_subtree(p1, ticket(3));
        assert!(tree.is_removed(p1));
        assert!(tree.is_removed(text));
        assert_eq!(tree.child_count(root), Some(1)); // still linked until GC
    }

    #[test]
    fn text_leaf_edit_behaves_as_rope_edit() {
        let mut tree = CrdtTree::new("doc");
        let root = tree.root_created_at();
        let text = ticket(1);
        tree.insert_text(root, None, text, "hello").unwrap();
        tree.edit_text_leaf(text, 1, 4, "ipp").unwrap();
        let json = tree.to_json();
        assert_eq!(json["children"][0]["value"], "hippo");
    }

    #[test]
    fn style_is_a_no_op_on_tombstoned_node() {
        let mut tree = CrdtTree::new("doc");
        let root = tree.root_created_at();
        let p1 = ticket(1);
        tree.insert(root, None, p1, NodeKind::Element("p".into())).unwrap();
        tree.remove_subtree(p1, ticket(2));
        tree.style(p1, &[("bold".into(), "true".into())], ticket(3)).unwrap();
        assert!(tree.attrs(p1).unwrap().is_empty());
    }

    #[test]
    fn gc_purges_only_dominated_tombstones() {
        use crate::version_vector::VersionVector;
        let mut tree = CrdtTree::new("doc");
        let root = tree.root_created_at();
        let p1 = ticket(1);
        tree.insert(root, None, p1, NodeKind::Element("p".into())).unwrap();
        tree.remove_subtree(p1, ticket(2));

        let mut vv = VersionVector::new();
        vv.set(actor(1), 1);
        assert!(tree.collectible_tombstones(|t| vv.after_or_equal(&t)).is_empty());
        vv.set(actor(1), 2);
        let collectible = tree.collectible_tombstones(|t| vv.after_or_equal(&t));
        assert_eq!(collectible, vec![p1]);
        assert!(tree.purge(p1));
        assert_eq!(tree.child_count(root), Some(0));
    }

    #[test]
    fn snapshot_roundtrip_preserves_structure_and_tombstones() {
        let mut tree = CrdtTree::new("doc");
        let root = tree.root_created_at();
        let p1 = ticket(1);
        let text = ticket(2);
        let p2 = ticket(3);
        tree.insert(root, None, p1, NodeKind::Element("p".into())).unwrap();
        tree.insert_text(p1, None, text, "hi").unwrap();
        tree.insert(root, Some(p1), p2, NodeKind::Element("p".into())).unwrap();
        tree.style(p1, &[("bold".into(), "true".into())], ticket(4)).unwrap();
        tree.remove_subtree(p2, ticket(5));

        let snapshot = tree.to_snapshot();
        let rebuilt = CrdtTree::from_snapshot(snapshot);
        assert_eq!(rebuilt.to_json(), tree.to_json());
        assert!(rebuilt.is_removed(p2));
        assert_eq!(rebuilt.attrs(p1).unwrap().get("bold"), Some(&"true".to_string()));
    }
}
