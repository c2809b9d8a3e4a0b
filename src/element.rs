//! Tagged CRDT element variants (spec §3.2, §9 "dynamic dispatch over CRDT
//! elements"): `{Object, Array, Primitive, Counter, Text, Tree}` behind one
//! shared capability set.
//!
//! Containers hold only `TimeTicket` references to their children — the
//! children themselves live in the Root's `elements` map (spec §9 "cyclic
//! references... expressed as indices into the Root's by-id map"). This
//! sidesteps `Rc<RefCell<_>>`/unsafe entirely: there is exactly one owner of
//! element state (the Root), and every other reference is a plain copyable
//! id.

use std::collections::HashMap;

use crate::actor::ActorID;
use crate::counter::Counter;
use crate::list::RgaTreeList;
use crate::primitive::Primitive;
use crate::rht::Rht;
use crate::rope::RgaTreeSplit;
use crate::time_ticket::TimeTicket;
use crate::tree::CrdtTree;

#[derive(Clone, Debug)]
pub struct ObjectValue {
    pub members: Rht<TimeTicket>,
}

#[derive(Clone, Debug)]
pub struct ArrayValue {
    pub items: RgaTreeList<TimeTicket>,
}

impl ArrayValue {
    pub fn new() -> Self {
        ArrayValue { items: RgaTreeList::new() }
    }
}

impl Default for ArrayValue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct TextValue {
    pub rope: RgaTreeSplit,
    /// Per-actor highest `created_at` ever walked by an `Edit` on this
    /// text (spec §4.5 `maxCreatedAtMapByActor`), carried on the element
    /// rather than recomputed per-call so a second local edit in the same
    /// update still sees what the first one learned.
    pub max_created_at_map: HashMap<ActorID, TimeTicket>,
}

impl TextValue {
    pub fn new() -> Self {
        TextValue { rope: RgaTreeSplit::new(), max_created_at_map: HashMap::new() }
    }
}

impl Default for TextValue {
    fn default() -> Self {
        Self::new()
    }
}

/// One CRDT element: identity plus a tagged payload.
#[derive(Clone, Debug)]
pub struct Element {
    created_at: TimeTicket,
    moved_at: Option<TimeTicket>,
    removed_at: Option<TimeTicket>,
    pub value: ElementValue,
}

#[derive(Clone, Debug)]
pub enum ElementValue {
    Object(ObjectValue),
    Array(ArrayValue),
    Primitive(Primitive),
    Counter(Counter),
    Text(TextValue),
    Tree(CrdtTree),
}

impl Element {
    pub fn new(created_at: TimeTicket, value: ElementValue) -> Self {
        Element { created_at, moved_at: None, removed_at: None, value }
    }

    pub fn created_at(&self) -> TimeTicket {
        self.created_at
    }

    pub fn moved_at(&self) -> Option<TimeTicket> {
        self.moved_at
    }

    pub fn removed_at(&self) -> Option<TimeTicket> {
        self.removed_at
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// Shared element invariant (spec §3.2): accepted only if current
    /// `moved_at` is absent or `t` is strictly later.
    pub fn set_moved_at(&mut self, t: TimeTicket) -> bool {
        if self.moved_at.map(|m| t > m).unwrap_or(true) {
            self.moved_at = Some(t);
            true
        } else {
            false
        }
    }

    /// Shared element invariant (spec §3.2): accepted only if `t >=
    /// created_at` and (`removed_at` absent or `t` strictly later).
    pub fn remove(&mut self, t: TimeTicket) -> bool {
        if t < self.created_at {
            return false;
        }
        if self.removed_at.map(|r| t > r).unwrap_or(true) {
            self.removed_at = Some(t);
            true
        } else {
            false
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.value {
            ElementValue::Object(_) => "object",
            ElementValue::Array(_) => "array",
            ElementValue::Primitive(_) => "primitive",
            ElementValue::Counter(_) => "counter",
            ElementValue::Text(_) => "text",
            ElementValue::Tree(_) => "tree",
        }
    }

    pub fn data_size(&self) -> usize {
        match &self.value {
            ElementValue::Object(o) => o.members.len() * 8,
            ElementValue::Array(a) => a.items.len() * 8,
            ElementValue::Primitive(p) => p.data_size(),
            ElementValue::Counter(c) => c.data_size(),
            ElementValue::Text(t) => t.rope.len(),
            ElementValue::Tree(_) => 0,
        }
    }
}

impl ObjectValue {
    pub fn new() -> Self {
        ObjectValue { members: Rht::new() }
    }
}

impl Default for ObjectValue {
    fn default() -> Self {
        Self::new()
    }
}
