//! The CRDT Root — element registry, GC bookkeeping, and size accounting
//! (spec §3.3).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::counter::{Counter, CounterValue};
use crate::element::{ArrayValue, Element, ElementValue, ObjectValue, TextValue};
use crate::error::{DocError, DocResult};
use crate::list::RgaTreeList;
use crate::primitive::Primitive;
use crate::rht::Rht;
use crate::rope::{RgaTreeSplit, SplitNodeId};
use crate::time_ticket::TimeTicket;
use crate::tree::{CrdtTree, TreeNodeSnapshot};
use crate::version_vector::VersionVector;

/// `(data, meta)` byte counters, tracked separately for live and
/// garbage-collected-but-not-yet-purged elements (SPEC_FULL.md §B.3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataSize {
    pub data: usize,
    pub meta: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DocSize {
    pub live: DataSize,
    pub gc: DataSize,
}

/// Per-element metadata size: createdAt + movedAt + removedAt, each a fixed
/// `TimeTicket` (lamport 8B + delimiter 4B + actor 12B = 24B).
const META_SIZE: usize = 24 * 3;

/// One (parent, child) pair awaiting GC for a split/tree node that the
/// container itself tombstoned internally (rope split nodes, tree nodes) —
/// distinct from `removed_elements`, which tracks top-level elements
/// removed by a `Remove` operation (spec §3.3 `gcPairs`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GcPair {
    pub parent: TimeTicket,
    pub child: TimeTicket,
}

/// Element registry by creation time, with GC tracking (spec §3.3).
#[derive(Clone, Debug)]
pub struct Root {
    elements: HashMap<TimeTicket, Element>,
    /// created_at of elements tombstoned by `Remove`, not yet purged.
    removed_elements: HashSet<TimeTicket>,
    /// Parent container -> internal (rope/tree) node ids it owns that are
    /// tombstoned and pending GC.
    gc_pairs: HashMap<TimeTicket, HashSet<TimeTicket>>,
    doc_size: DocSize,
}

impl Root {
    /// A fresh Root whose top-level value is an empty Object rooted at
    /// `TimeTicket::INITIAL`.
    pub fn new() -> Self {
        let mut elements = HashMap::new();
        elements.insert(TimeTicket::INITIAL, Element::new(TimeTicket::INITIAL, ElementValue::Object(ObjectValue::new())));
        Root { elements, removed_elements: HashSet::new(), gc_pairs: HashMap::new(), doc_size: DocSize::default() }
    }

    pub fn root_created_at(&self) -> TimeTicket {
        TimeTicket::INITIAL
    }

    pub fn doc_size(&self) -> DocSize {
        self.doc_size
    }

    pub fn get(&self, created_at: TimeTicket) -> DocResult<&Element> {
        self.elements.get(&created_at).ok_or(DocError::Reference(created_at))
    }

    pub fn get_mut(&mut self, created_at: TimeTicket) -> DocResult<&mut Element> {
        self.elements.get_mut(&created_at).ok_or(DocError::Reference(created_at))
    }

    pub fn contains(&self, created_at: TimeTicket) -> bool {
        self.elements.contains_key(&created_at)
    }

    /// Register a newly created element and account its size into the live
    /// side of `doc_size` (SPEC_FULL.md §B.3).
    pub fn register(&mut self, element: Element) {
        let size = element.data_size() + META_SIZE;
        self.doc_size.live.data += size;
        self.doc_size.live.meta += META_SIZE;
        self.elements.insert(element.created_at(), element);
    }

    /// Tombstone a top-level element and add it to the removal-pending set
    /// (spec §3.3: removed elements stay reachable, tombstoned, from their
    /// parent until GC).
    pub fn remove_element(&mut self, created_at: TimeTicket, executed_at: TimeTicket) -> DocResult<bool> {
        let el = self.get_mut(created_at)?;
        let removed = el.remove(executed_at);
        if removed {
            self.removed_elements.insert(created_at);
        }
        Ok(removed)
    }

    /// Register an internal split/tree node id as pending GC under its
    /// owning container (spec §3.3 `gcPairs`).
    pub fn register_gc_pair(&mut self, parent: TimeTicket, child: TimeTicket) {
        self.gc_pairs.entry(parent).or_default().insert(child);
    }

    pub fn unregister_gc_pair(&mut self, parent: TimeTicket, child: TimeTicket) {
        if let Some(set) = self.gc_pairs.get_mut(&parent) {
            set.remove(&child);
            if set.is_empty() {
                self.gc_pairs.remove(&parent);
            }
        }
    }

    pub fn gc_pairs_of(&self, parent: TimeTicket) -> impl Iterator<Item = TimeTicket> + '_ {
        self.gc_pairs.get(&parent).into_iter().flatten().copied()
    }

    /// Purge every removed top-level element whose `removed_at` is
    /// dominated by `dominates` (spec §4.9 `garbageCollect`). Internal
    /// gc-pair cleanup (rope/tree split nodes) is the caller's
    /// responsibility, since it requires reaching into the owning
    /// container's own structure.
    pub fn collect_garbage(&mut self, dominates: impl Fn(TimeTicket) -> bool) -> usize {
        let mut purged = Vec::new();
        for created_at in self.removed_elements.iter().copied() {
            if let Some(el) = self.elements.get(&created_at) {
                if let Some(r) = el.removed_at() {
                    if dominates(r) {
                        purged.push(created_at);
                    }
                }
            }
        }
        for created_at in &purged {
            if let Some(el) = self.elements.remove(created_at) {
                let size = el.data_size() + META_SIZE;
                self.doc_size.live.data = self.doc_size.live.data.saturating_sub(size);
                self.doc_size.live.meta = self.doc_size.live.meta.saturating_sub(META_SIZE);
                self.doc_size.gc.data += size;
                self.doc_size.gc.meta += META_SIZE;
            }
            self.removed_elements.remove(created_at);
        }
        trace!(count = purged.len(), "root garbage collected");
        purged.len()
    }

    pub fn garbage_len(&self) -> usize {
        self.removed_elements.len() + self.gc_pairs.values().map(|s| s.len()).sum::<usize>()
    }

    /// GC driven by a single minimum-synced ticket — the legacy path
    /// (SPEC_FULL.md §B.4): an element is collectible iff its `removed_at`
    /// lamport is `<= min_synced.lamport()`.
    pub fn collect_garbage_by_ticket(&mut self, min_synced: TimeTicket) -> usize {
        self.collect_garbage(|removed_at| removed_at.lamport() <= min_synced.lamport())
    }

    /// GC driven by a version vector — the preferred path (spec §9).
    pub fn collect_garbage_by_version_vector(&mut self, vv: &VersionVector) -> usize {
        self.collect_garbage(|removed_at| vv.after_or_equal(&removed_at))
    }

    /// Purge dominated tombstones inside every live rope/tree container
    /// (split nodes, tree nodes) — the `gcPairs` walk of spec §3.3/§9.
    ///
    /// Rather than requiring every `Edit`/`TreeEdit` operation to also
    /// register its freshly-tombstoned node ids into `gc_pairs`, the
    /// Document's GC pass walks live `Text`/`Tree` elements directly and
    /// asks each container for its own dominated tombstones; the container
    /// already tracks this (see `RgaTreeSplit::collectible_tombstones`,
    /// `CrdtTree::collectible_tombstones`), so a second registry would
    /// just be a second source of truth for the same fact (DESIGN.md).
    pub fn collect_internal_garbage(&mut self, dominates: impl Fn(TimeTicket) -> bool + Copy) -> usize {
        let created_ats: Vec<TimeTicket> = self.elements.keys().copied().collect();
        let mut purged = 0usize;
        for created_at in created_ats {
            let Some(el) = self.elements.get_mut(&created_at) else { continue };
            match &mut el.value {
                ElementValue::Text(text) => {
                    for id in text.rope.collectible_tombstones(dominates) {
                        if text.rope.purge(id) {
                            purged += 1;
                        }
                    }
                }
                ElementValue::Tree(tree) => {
                    for id in tree.collectible_tombstones(dominates) {
                        if tree.purge(id) {
                            purged += 1;
                        }
                    }
                }
                _ => {}
            }
        }
        if purged > 0 {
            trace!(count = purged, "root internal (rope/tree) garbage collected");
        }
        purged
    }

    /// A serializable mirror of the whole element registry, used for the
    /// change pack's `snapshot` field (spec §6.1).
    pub fn to_snapshot(&self) -> RootSnapshot {
        RootSnapshot { elements: self.elements.values().map(element_to_snapshot).collect() }
    }

    /// Rebuild a `Root` from a snapshot (spec §4.9 `applyChangePack`:
    /// "if pack.snapshot is present, replaces root... from snapshot
    /// bytes"). `doc_size` is recomputed rather than carried on the wire.
    pub fn from_snapshot(snapshot: RootSnapshot) -> Root {
        let mut elements = HashMap::new();
        for es in &snapshot.elements {
            let value = match &es.payload {
                ElementPayloadSnapshot::Primitive(p) => ElementValue::Primitive(p.clone()),
                ElementPayloadSnapshot::Counter(v) => ElementValue::Counter(Counter::new(es.created_at, v.clone())),
                ElementPayloadSnapshot::Object(_) => ElementValue::Object(ObjectValue::new()),
                ElementPayloadSnapshot::Array(_) => ElementValue::Array(ArrayValue::new()),
                ElementPayloadSnapshot::Text(fragments) => {
                    // The per-actor edit watermark isn't part of the wire
                    // snapshot (same simplification as the lost style
                    // priority ticket in `from_fragments`); it rebuilds
                    // empty and reaccumulates from the first edit applied
                    // after load.
                    ElementValue::Text(TextValue { rope: RgaTreeSplit::from_fragments(fragments.clone()), max_created_at_map: HashMap::new() })
                }
                ElementPayloadSnapshot::Tree(t) => ElementValue::Tree(CrdtTree::from_snapshot(t.clone())),
            };
            let mut el = Element::new(es.created_at, value);
            if let Some(m) = es.moved_at {
                el.set_moved_at(m);
            }
            if let Some(r) = es.removed_at {
                el.remove(r);
            }
            elements.insert(es.created_at, el);
        }

        // Second pass: containers reference sibling elements by TimeTicket,
        // so their by-id index must already be fully populated.
        let mut removed_elements = HashSet::new();
        for es in &snapshot.elements {
            match &es.payload {
                ElementPayloadSnapshot::Object(entries) => {
                    let rht = Rht::from_entries(entries.iter().cloned());
                    if let Some(el) = elements.get_mut(&es.created_at) {
                        el.value = ElementValue::Object(ObjectValue { members: rht });
                    }
                }
                ElementPayloadSnapshot::Array(items) => {
                    let ordered = items.iter().map(|(c, m, r)| (*c, *m, *r, *c)).collect();
                    let list = RgaTreeList::from_ordered(ordered);
                    if let Some(el) = elements.get_mut(&es.created_at) {
                        el.value = ElementValue::Array(ArrayValue { items: list });
                    }
                }
                _ => {}
            }
            if es.removed_at.is_some() {
                removed_elements.insert(es.created_at);
            }
        }

        let doc_size = compute_doc_size(&elements);
        Root { elements, removed_elements, gc_pairs: HashMap::new(), doc_size }
    }
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

fn element_to_snapshot(el: &Element) -> ElementSnapshot {
    let payload = match &el.value {
        ElementValue::Primitive(p) => ElementPayloadSnapshot::Primitive(p.clone()),
        ElementValue::Counter(c) => ElementPayloadSnapshot::Counter(c.value().clone()),
        ElementValue::Object(o) => {
            ElementPayloadSnapshot::Object(o.members.all_entries().map(|(k, c, r, v)| (k.to_owned(), c, r, *v)).collect())
        }
        ElementValue::Array(a) => {
            ElementPayloadSnapshot::Array(a.items.all_entries().into_iter().map(|(c, m, r, _v)| (c, m, r)).collect())
        }
        ElementValue::Text(t) => ElementPayloadSnapshot::Text(t.rope.all_fragments()),
        ElementValue::Tree(t) => ElementPayloadSnapshot::Tree(t.to_snapshot()),
    };
    ElementSnapshot { created_at: el.created_at(), moved_at: el.moved_at(), removed_at: el.removed_at(), payload }
}

fn compute_doc_size(elements: &HashMap<TimeTicket, Element>) -> DocSize {
    let mut size = DocSize::default();
    for el in elements.values() {
        let data = el.data_size() + META_SIZE;
        if el.is_removed() {
            size.gc.data += data;
            size.gc.meta += META_SIZE;
        } else {
            size.live.data += data;
            size.live.meta += META_SIZE;
        }
    }
    size
}

/// One element's snapshot payload, keyed by element kind (spec §6.1:
/// "Element values are encoded either as typed primitives... or as nested
/// simple elements").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ElementPayloadSnapshot {
    Primitive(Primitive),
    Counter(CounterValue),
    /// `(key, entry created_at, entry removed_at, child created_at)`.
    Object(Vec<(String, TimeTicket, Option<TimeTicket>, TimeTicket)>),
    /// `(child created_at, child moved_at, child removed_at)` in document order.
    Array(Vec<(TimeTicket, Option<TimeTicket>, Option<TimeTicket>)>),
    Text(Vec<(SplitNodeId, String, Option<TimeTicket>, Vec<(String, String)>)>),
    Tree(TreeNodeSnapshot),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub created_at: TimeTicket,
    pub moved_at: Option<TimeTicket>,
    pub removed_at: Option<TimeTicket>,
    pub payload: ElementPayloadSnapshot,
}

/// A serializable mirror of the whole `Root` registry (spec §6.1 snapshot
/// field; SPEC_FULL.md's ambient wire stack).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RootSnapshot {
    pub elements: Vec<ElementSnapshot>,
}
