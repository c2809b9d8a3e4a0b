//! The edit algebra: one `Operation` variant per mutating action a
//! `ChangeContext` can record (spec §4.7).
//!
//! Every operation carries `parent_created_at` (its target container) and
//! `executed_at` (its `TimeTicket`). Execution against a `Root` is
//! idempotent under identical `executed_at` — replaying an operation whose
//! effect was already applied is a no-op, which is what lets
//! `Document::apply_change_pack` safely re-run a change that partially
//! landed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::actor::ActorID;
use crate::element::{ArrayValue, Element, ElementValue, ObjectValue, TextValue};
use crate::error::{DocError, DocResult};
use crate::primitive::Primitive;
use crate::root::Root;
use crate::rope::SplitNodeId;
use crate::time_ticket::TimeTicket;
use crate::tree::NodeKind;

/// What kind of value an `Add`/`Set` operation is installing. Nested
/// containers are created empty and populated by their own subsequent
/// operations (spec §6.1: "Element values are encoded either as typed
/// primitives... or as nested simple elements").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OperandValue {
    Primitive(Primitive),
    Object,
    Array,
    Text,
    Counter(crate::counter::CounterValue),
    Tree(String),
}

/// What a `TreeEdit` operation does to its `target_created_at` node (spec
/// §4.6). Kept distinct from `Edit`/`Set`/`Add` because a tree node insert
/// additionally needs a tag-or-text payload and the existing-leaf edit case
/// needs a character range, neither of which the other operations carry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TreeEditKind {
    /// Insert a new element child under `target_created_at`.
    InsertElement(String),
    /// Insert a new text-leaf child under `target_created_at`.
    InsertText(String),
    /// Replace `[from, to)` of the existing text leaf `target_created_at`.
    EditText(String),
    /// Tombstone `target_created_at`'s subtree.
    Remove,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Operation {
    Set { parent_created_at: TimeTicket, key: String, value: OperandValue, created_at: TimeTicket, executed_at: TimeTicket },
    Add { parent_created_at: TimeTicket, prev_created_at: TimeTicket, value: OperandValue, created_at: TimeTicket, executed_at: TimeTicket },
    Move { parent_created_at: TimeTicket, prev_created_at: TimeTicket, created_at: TimeTicket, executed_at: TimeTicket },
    Remove { parent_created_at: TimeTicket, created_at: TimeTicket, executed_at: TimeTicket },
    Edit {
        parent_created_at: TimeTicket,
        from: SplitNodeId,
        to: SplitNodeId,
        content: String,
        max_created_at_map: HashMap<ActorID, TimeTicket>,
        executed_at: TimeTicket,
    },
    Style { parent_created_at: TimeTicket, from: SplitNodeId, to: SplitNodeId, attrs: Vec<(String, String)>, executed_at: TimeTicket },
    Increase { parent_created_at: TimeTicket, value: Primitive, executed_at: TimeTicket },
    /// `parent_created_at` is the Tree element's own id; `target_created_at`
    /// is the node the edit targets (the parent for an insert, the node
    /// itself for an in-place edit or a removal).
    TreeEdit {
        parent_created_at: TimeTicket,
        target_created_at: TimeTicket,
        from: u32,
        to: u32,
        kind: TreeEditKind,
        new_created_at: TimeTicket,
        executed_at: TimeTicket,
    },
    TreeStyle { tree_created_at: TimeTicket, target_created_at: TimeTicket, attrs: Vec<(String, String)>, executed_at: TimeTicket },
}

impl Operation {
    pub fn parent_created_at(&self) -> TimeTicket {
        match self {
            Operation::Set { parent_created_at, .. }
            | Operation::Add { parent_created_at, .. }
            | Operation::Move { parent_created_at, .. }
            | Operation::Remove { parent_created_at, .. }
            | Operation::Edit { parent_created_at, .. }
            | Operation::Style { parent_created_at, .. }
            | Operation::Increase { parent_created_at, .. }
            | Operation::TreeEdit { parent_created_at, .. } => *parent_created_at,
            Operation::TreeStyle { tree_created_at, .. } => *tree_created_at,
        }
    }

    pub fn executed_at(&self) -> TimeTicket {
        match self {
            Operation::Set { executed_at, .. }
            | Operation::Add { executed_at, .. }
            | Operation::Move { executed_at, .. }
            | Operation::Remove { executed_at, .. }
            | Operation::Edit { executed_at, .. }
            | Operation::Style { executed_at, .. }
            | Operation::Increase { executed_at, .. }
            | Operation::TreeEdit { executed_at, .. }
            | Operation::TreeStyle { executed_at, .. } => *executed_at,
        }
    }

    /// Execute against `root`. Type mismatches are `Unsupported`; an
    /// unknown target is `Reference` (spec §4.7 error modes).
    pub fn execute(&self, root: &mut Root) -> DocResult<()> {
        match self {
            Operation::Set { parent_created_at, key, value, created_at, .. } => {
                let child = make_element(*created_at, value.clone());
                {
                    let parent = root.get_mut(*parent_created_at)?;
                    let ElementValue::Object(obj) = &mut parent.value else {
                        return Err(DocError::Unsupported(*parent_created_at, "Set target is not an object".into()));
                    };
                    obj.members.set(key, *created_at, *created_at);
                }
                root.register(child);
                Ok(())
            }
            Operation::Add { parent_created_at, prev_created_at, value, created_at, .. } => {
                if root.contains(*created_at) {
                    // Already applied (spec §4.7: replay is a no-op).
                    return Ok(());
                }
                let child = make_element(*created_at, value.clone());
                {
                    let parent = root.get_mut(*parent_created_at)?;
                    let ElementValue::Array(arr) = &mut parent.value else {
                        return Err(DocError::Unsupported(*parent_created_at, "Add target is not an array".into()));
                    };
                    arr.items.insert_after(*prev_created_at, *created_at, *created_at);
                }
                root.register(child);
                Ok(())
            }
            Operation::Move { parent_created_at, prev_created_at, created_at, executed_at } => {
                let parent = root.get_mut(*parent_created_at)?;
                let ElementValue::Array(arr) = &mut parent.value else {
                    return Err(DocError::Unsupported(*parent_created_at, "Move target is not an array".into()));
                };
                arr.items.move_after(*created_at, *prev_created_at, *executed_at);
                if let Ok(el) = root.get_mut(*created_at) {
                    el.set_moved_at(*executed_at);
                }
                Ok(())
            }
            Operation::Remove { parent_created_at, created_at, executed_at } => {
                {
                    let parent = root.get_mut(*parent_created_at)?;
                    match &mut parent.value {
                        ElementValue::Object(obj) => {
                            obj.members.remove(*created_at, *executed_at);
                        }
                        ElementValue::Array(arr) => {
                            arr.items.remove(*created_at, *executed_at);
                        }
                        _ => return Err(DocError::Unsupported(*parent_created_at, "Remove target has no children".into())),
                    }
                }
                root.remove_element(*created_at, *executed_at)?;
                Ok(())
            }
            Operation::Edit { parent_created_at, from, to, content, max_created_at_map, executed_at } => {
                let parent = root.get_mut(*parent_created_at)?;
                let ElementValue::Text(text) = &mut parent.value else {
                    return Err(DocError::Unsupported(*parent_created_at, "Edit target is not text".into()));
                };
                // The op's own map reflects what its origin knew; union it
                // with whatever this replica has separately learned, so an
                // out-of-order replay still preserves concurrent inserts.
                let mut merged = text.max_created_at_map.clone();
                for (actor, t) in max_created_at_map {
                    merged.entry(*actor).and_modify(|w| if *t > *w { *w = *t }).or_insert(*t);
                }
                let result =
                    text.rope.edit(*from, *to, content, &merged, *executed_at).ok_or(DocError::Reference(*parent_created_at))?;
                text.max_created_at_map = result.max_created_at_map;
                Ok(())
            }
            Operation::Style { parent_created_at, from, to, attrs, executed_at } => {
                let parent = root.get_mut(*parent_created_at)?;
                let ElementValue::Text(text) = &mut parent.value else {
                    return Err(DocError::Unsupported(*parent_created_at, "Style target is not text".into()));
                };
                text.rope.style(*from, *to, attrs, *executed_at).ok_or(DocError::Reference(*parent_created_at))
            }
            Operation::Increase { parent_created_at, value, executed_at } => {
                let parent = root.get_mut(*parent_created_at)?;
                let ElementValue::Counter(counter) = &mut parent.value else {
                    return Err(DocError::Unsupported(*parent_created_at, "Increase target is not a counter".into()));
                };
                counter.increase(value, *executed_at)
            }
            Operation::TreeEdit { parent_created_at, target_created_at, from, to, kind, new_created_at, executed_at } => {
                let parent = root.get_mut(*parent_created_at)?;
                let ElementValue::Tree(tree) = &mut parent.value else {
                    return Err(DocError::Unsupported(*parent_created_at, "TreeEdit target is not a tree".into()));
                };
                match kind {
                    TreeEditKind::InsertElement(tag) => {
                        let prev = tree
                            .prev_sibling_for_insert_at(*target_created_at, *from)
                            .ok_or(DocError::Reference(*target_created_at))?;
                        tree.insert(*target_created_at, prev, *new_created_at, NodeKind::Element(tag.clone()))
                            .ok_or(DocError::Reference(*target_created_at))
                    }
                    TreeEditKind::InsertText(text) => {
                        let prev = tree
                            .prev_sibling_for_insert_at(*target_created_at, *from)
                            .ok_or(DocError::Reference(*target_created_at))?;
                        tree.insert_text(*target_created_at, prev, *new_created_at, text)
                            .ok_or(DocError::Reference(*target_created_at))
                    }
                    TreeEditKind::EditText(text) => {
                        tree.edit_text_leaf(*target_created_at, *from, *to, text).ok_or(DocError::Reference(*target_created_at))
                    }
                    TreeEditKind::Remove => {
                        tree.remove_subtree(*target_created_at, *executed_at);
                        Ok(())
                    }
                }
            }
            Operation::TreeStyle { tree_created_at, target_created_at, attrs, executed_at } => {
                let parent = root.get_mut(*tree_created_at)?;
                let ElementValue::Tree(tree) = &mut parent.value else {
                    return Err(DocError::Unsupported(*tree_created_at, "TreeStyle target is not a tree".into()));
                };
                tree.style(*target_created_at, attrs, *executed_at).ok_or(DocError::Reference(*target_created_at))
            }
        }
    }
}

fn make_element(created_at: TimeTicket, value: OperandValue) -> Element {
    let v = match value {
        OperandValue::Primitive(p) => ElementValue::Primitive(p),
        OperandValue::Object => ElementValue::Object(ObjectValue::new()),
        OperandValue::Array => ElementValue::Array(ArrayValue::new()),
        OperandValue::Text => ElementValue::Text(TextValue::new()),
        OperandValue::Counter(v) => ElementValue::Counter(crate::counter::Counter::new(created_at, v)),
        OperandValue::Tree(tag) => ElementValue::Tree(crate::tree::CrdtTree::new(&tag)),
    };
    Element::new(created_at, v)
}
