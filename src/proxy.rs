//! Host-facing mutable views over a `ChangeContext` (spec §9 "Proxies over
//! live state"). Every mutating call both applies the equivalent
//! `Operation` to the context's cloned root immediately — so a later read
//! in the same `update` sees its own writes — and records the `Operation`
//! for replication.
//!
//! `expect()` below is reserved for operations that have just been applied
//! to a freshly-cloned, locally-consistent root: by construction the
//! target exists and is the right kind, so a failure there means the
//! proxy itself built a malformed operation, not a legitimate runtime
//! condition.

use std::collections::HashMap;

use crate::change_context::ChangeContext;
use crate::counter::CounterValue;
use crate::element::ElementValue;
use crate::operation::{Operation, OperandValue, TreeEditKind};
use crate::primitive::Primitive;
use crate::rope::SplitNodeId;
use crate::time_ticket::TimeTicket;

pub struct ObjectProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> ObjectProxy<'a> {
    pub(crate) fn new(ctx: &'a mut ChangeContext, target: TimeTicket) -> Self {
        ObjectProxy { ctx, target }
    }

    fn set_primitive(&mut self, key: &str, value: Primitive) {
        let created_at = self.ctx.issue_ticket();
        let op = Operation::Set { parent_created_at: self.target, key: key.to_owned(), value: OperandValue::Primitive(value), created_at, executed_at: created_at };
        op.execute(self.ctx.root_mut()).expect("set against a freshly cloned root");
        self.ctx.push(op);
    }

    pub fn set_null(&mut self, key: &str) {
        self.set_primitive(key, Primitive::Null);
    }
    pub fn set_bool(&mut self, key: &str, v: bool) {
        self.set_primitive(key, Primitive::Bool(v));
    }
    pub fn set_i32(&mut self, key: &str, v: i32) {
        self.set_primitive(key, Primitive::Int32(v));
    }
    pub fn set_i64(&mut self, key: &str, v: i64) {
        self.set_primitive(key, Primitive::Int64(v));
    }
    pub fn set_f64(&mut self, key: &str, v: f64) {
        self.set_primitive(key, Primitive::Float64(v));
    }
    pub fn set_string(&mut self, key: &str, v: impl Into<String>) {
        self.set_primitive(key, Primitive::String(v.into()));
    }
    pub fn set_bytes(&mut self, key: &str, v: Vec<u8>) {
        self.set_primitive(key, Primitive::Bytes(v));
    }

    fn set_container(&mut self, key: &str, value: OperandValue) -> TimeTicket {
        let created_at = self.ctx.issue_ticket();
        let op = Operation::Set { parent_created_at: self.target, key: key.to_owned(), value, created_at, executed_at: created_at };
        op.execute(self.ctx.root_mut()).expect("set against a freshly cloned root");
        self.ctx.push(op);
        created_at
    }

    pub fn set_new_object(&mut self, key: &str) -> ObjectProxy<'_> {
        let created_at = self.set_container(key, OperandValue::Object);
        ObjectProxy::new(self.ctx, created_at)
    }

    pub fn set_new_array(&mut self, key: &str) -> ArrayProxy<'_> {
        let created_at = self.set_container(key, OperandValue::Array);
        ArrayProxy::new(self.ctx, created_at)
    }

    pub fn set_new_text(&mut self, key: &str) -> TextProxy<'_> {
        let created_at = self.set_container(key, OperandValue::Text);
        TextProxy::new(self.ctx, created_at)
    }

    pub fn set_new_counter_i64(&mut self, key: &str, initial: i64) -> TimeTicket {
        self.set_container(key, OperandValue::Counter(CounterValue::Int64(initial)))
    }

    pub fn set_new_tree(&mut self, key: &str, root_tag: impl Into<String>) -> TreeProxy<'_> {
        let created_at = self.set_container(key, OperandValue::Tree(root_tag.into()));
        TreeProxy::new(self.ctx, created_at)
    }

    /// Remove `key` (spec §4.7 `Remove`); a no-op if it's absent or
    /// already tombstoned.
    pub fn remove(&mut self, key: &str) {
        let Some(created_at) = self.child(key) else { return };
        let executed_at = self.ctx.issue_ticket();
        let op = Operation::Remove { parent_created_at: self.target, created_at, executed_at };
        op.execute(self.ctx.root_mut()).expect("remove against a freshly cloned root");
        self.ctx.push(op);
    }

    pub fn increase_counter(&mut self, key: &str, delta: Primitive) {
        let Some(child) = self.child(key) else { return };
        let executed_at = self.ctx.issue_ticket();
        let op = Operation::Increase { parent_created_at: child, value: delta, executed_at };
        if op.execute(self.ctx.root_mut()).is_ok() {
            self.ctx.push(op);
        }
    }

    pub fn get_object(&mut self, key: &str) -> Option<ObjectProxy<'_>> {
        let child = self.child(key)?;
        Some(ObjectProxy::new(self.ctx, child))
    }

    pub fn get_array(&mut self, key: &str) -> Option<ArrayProxy<'_>> {
        let child = self.child(key)?;
        Some(ArrayProxy::new(self.ctx, child))
    }

    pub fn get_text(&mut self, key: &str) -> Option<TextProxy<'_>> {
        let child = self.child(key)?;
        Some(TextProxy::new(self.ctx, child))
    }

    pub fn get_tree(&mut self, key: &str) -> Option<TreeProxy<'_>> {
        let child = self.child(key)?;
        Some(TreeProxy::new(self.ctx, child))
    }

    pub fn has(&self, key: &str) -> bool {
        self.child(key).is_some()
    }

    fn child(&self, key: &str) -> Option<TimeTicket> {
        let el = self.ctx.root().get(self.target).ok()?;
        let ElementValue::Object(o) = &el.value else { return None };
        o.members.get(key).copied()
    }

    pub fn to_json(&self) -> serde_json::Value {
        crate::json_view::object_to_json(self.ctx.root(), self.target)
    }
}

pub struct ArrayProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> ArrayProxy<'a> {
    pub(crate) fn new(ctx: &'a mut ChangeContext, target: TimeTicket) -> Self {
        ArrayProxy { ctx, target }
    }

    fn last_live_created_at(&mut self) -> TimeTicket {
        let Ok(el) = self.ctx.root_mut().get_mut(self.target) else { return TimeTicket::INITIAL };
        let ElementValue::Array(arr) = &mut el.value else { return TimeTicket::INITIAL };
        let len = arr.items.len();
        if len == 0 {
            return TimeTicket::INITIAL;
        }
        arr.items.created_at_at(len - 1).unwrap_or(TimeTicket::INITIAL)
    }

    fn push_primitive(&mut self, value: Primitive) {
        let prev = self.last_live_created_at();
        let created_at = self.ctx.issue_ticket();
        let op = Operation::Add { parent_created_at: self.target, prev_created_at: prev, value: OperandValue::Primitive(value), created_at, executed_at: created_at };
        op.execute(self.ctx.root_mut()).expect("add against a freshly cloned root");
        self.ctx.push(op);
    }

    pub fn push_null(&mut self) {
        self.push_primitive(Primitive::Null);
    }
    pub fn push_bool(&mut self, v: bool) {
        self.push_primitive(Primitive::Bool(v));
    }
    pub fn push_i32(&mut self, v: i32) {
        self.push_primitive(Primitive::Int32(v));
    }
    pub fn push_i64(&mut self, v: i64) {
        self.push_primitive(Primitive::Int64(v));
    }
    pub fn push_f64(&mut self, v: f64) {
        self.push_primitive(Primitive::Float64(v));
    }
    pub fn push_string(&mut self, v: impl Into<String>) {
        self.push_primitive(Primitive::String(v.into()));
    }

    fn push_container(&mut self, value: OperandValue) -> TimeTicket {
        let prev = self.last_live_created_at();
        let created_at = self.ctx.issue_ticket();
        let op = Operation::Add { parent_created_at: self.target, prev_created_at: prev, value, created_at, executed_at: created_at };
        op.execute(self.ctx.root_mut()).expect("add against a freshly cloned root");
        self.ctx.push(op);
        created_at
    }

    pub fn push_new_object(&mut self) -> ObjectProxy<'_> {
        let created_at = self.push_container(OperandValue::Object);
        ObjectProxy::new(self.ctx, created_at)
    }

    pub fn push_new_array(&mut self) -> ArrayProxy<'_> {
        let created_at = self.push_container(OperandValue::Array);
        ArrayProxy::new(self.ctx, created_at)
    }

    pub fn push_new_text(&mut self) -> TextProxy<'_> {
        let created_at = self.push_container(OperandValue::Text);
        TextProxy::new(self.ctx, created_at)
    }

    /// Remove the live element currently at `index` (spec §4.4 `Remove`).
    pub fn remove(&mut self, index: usize) {
        let created_at = {
            let Ok(el) = self.ctx.root_mut().get_mut(self.target) else { return };
            let ElementValue::Array(arr) = &mut el.value else { return };
            let Some(c) = arr.items.created_at_at(index) else { return };
            c
        };
        let executed_at = self.ctx.issue_ticket();
        let op = Operation::Remove { parent_created_at: self.target, created_at, executed_at };
        if op.execute(self.ctx.root_mut()).is_ok() {
            self.ctx.push(op);
        }
    }

    /// Relink the live element at `from_index` to sit right after the
    /// live element at `after_index` (spec §4.4 `Move`).
    pub fn move_after(&mut self, from_index: usize, after_index: usize) {
        let (target, after) = {
            let Ok(el) = self.ctx.root_mut().get_mut(self.target) else { return };
            let ElementValue::Array(arr) = &mut el.value else { return };
            let Some(t) = arr.items.created_at_at(from_index) else { return };
            let after = arr.items.created_at_at(after_index).unwrap_or(TimeTicket::INITIAL);
            (t, after)
        };
        let executed_at = self.ctx.issue_ticket();
        let op = Operation::Move { parent_created_at: self.target, prev_created_at: after, created_at: target, executed_at };
        op.execute(self.ctx.root_mut()).expect("move against a freshly cloned root");
        self.ctx.push(op);
    }

    pub fn len(&self) -> usize {
        self.ctx
            .root()
            .get(self.target)
            .ok()
            .and_then(|el| match &el.value {
                ElementValue::Array(a) => Some(a.items.len()),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        crate::json_view::array_to_json(self.ctx.root(), self.target)
    }
}

pub struct TextProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> TextProxy<'a> {
    pub(crate) fn new(ctx: &'a mut ChangeContext, target: TimeTicket) -> Self {
        TextProxy { ctx, target }
    }

    /// Replace the live range `[from, to)` with `content` (spec §4.5
    /// `Edit`). The range is given as identity anchors, not raw indices —
    /// see `crate::rope`'s module doc for why.
    pub fn edit(&mut self, from: SplitNodeId, to: SplitNodeId, content: &str) {
        let executed_at = self.ctx.issue_ticket();
        let carried = match self.ctx.root().get(self.target).map(|el| &el.value) {
            Ok(ElementValue::Text(t)) => t.max_created_at_map.clone(),
            _ => HashMap::new(),
        };
        let op =
            Operation::Edit { parent_created_at: self.target, from, to, content: content.to_owned(), max_created_at_map: carried, executed_at };
        if op.execute(self.ctx.root_mut()).is_ok() {
            self.ctx.push(op);
        }
    }

    pub fn style(&mut self, from: SplitNodeId, to: SplitNodeId, attrs: Vec<(String, String)>) {
        let executed_at = self.ctx.issue_ticket();
        let op = Operation::Style { parent_created_at: self.target, from, to, attrs, executed_at };
        if op.execute(self.ctx.root_mut()).is_ok() {
            self.ctx.push(op);
        }
    }

    pub fn to_string_live(&self) -> String {
        match self.ctx.root().get(self.target).map(|el| &el.value) {
            Ok(ElementValue::Text(t)) => t.rope.to_string_live(),
            _ => String::new(),
        }
    }
}

pub struct TreeProxy<'a> {
    ctx: &'a mut ChangeContext,
    target: TimeTicket,
}

impl<'a> TreeProxy<'a> {
    pub(crate) fn new(ctx: &'a mut ChangeContext, target: TimeTicket) -> Self {
        TreeProxy { ctx, target }
    }

    /// Insert a new element child as the last live child of `parent_node`
    /// (spec §4.6 `TreeEdit`). For a specific position, use
    /// [`TreeProxy::insert_element_at`].
    pub fn insert_element(&mut self, parent_node: TimeTicket, tag: impl Into<String>) -> TimeTicket {
        let at = self.live_child_count(parent_node);
        self.insert_element_at(parent_node, at, tag)
    }

    /// Insert a new element child at live-child index `index` under
    /// `parent_node` (spec §4.6: "conversions path ↔ index ↔ pos").
    pub fn insert_element_at(&mut self, parent_node: TimeTicket, index: u32, tag: impl Into<String>) -> TimeTicket {
        self.insert(parent_node, index, TreeEditKind::InsertElement(tag.into()))
    }

    pub fn insert_text(&mut self, parent_node: TimeTicket, text: impl Into<String>) -> TimeTicket {
        let at = self.live_child_count(parent_node);
        self.insert_text_at(parent_node, at, text)
    }

    pub fn insert_text_at(&mut self, parent_node: TimeTicket, index: u32, text: impl Into<String>) -> TimeTicket {
        self.insert(parent_node, index, TreeEditKind::InsertText(text.into()))
    }

    fn tree(&self) -> Option<&crate::tree::CrdtTree> {
        match self.ctx.root().get(self.target).map(|el| &el.value) {
            Ok(ElementValue::Tree(t)) => Some(t),
            _ => None,
        }
    }

    fn live_child_count(&self, parent_node: TimeTicket) -> u32 {
        self.tree().and_then(|t| t.live_child_count(parent_node)).unwrap_or(0) as u32
    }

    fn insert(&mut self, parent_node: TimeTicket, index: u32, kind: TreeEditKind) -> TimeTicket {
        let new_created_at = self.ctx.issue_ticket();
        let op = Operation::TreeEdit {
            parent_created_at: self.target,
            target_created_at: parent_node,
            from: index,
            to: index,
            kind,
            new_created_at,
            executed_at: new_created_at,
        };
        if op.execute(self.ctx.root_mut()).is_ok() {
            self.ctx.push(op);
        }
        new_created_at
    }

    /// Replace `[from, to)` of the existing text leaf `leaf` (spec §4.6).
    pub fn edit_text(&mut self, leaf: TimeTicket, from: u32, to: u32, content: impl Into<String>) {
        let executed_at = self.ctx.issue_ticket();
        let op = Operation::TreeEdit {
            parent_created_at: self.target,
            target_created_at: leaf,
            from,
            to,
            kind: TreeEditKind::EditText(content.into()),
            new_created_at: executed_at,
            executed_at,
        };
        if op.execute(self.ctx.root_mut()).is_ok() {
            self.ctx.push(op);
        }
    }

    pub fn remove(&mut self, node: TimeTicket) {
        let executed_at = self.ctx.issue_ticket();
        let op = Operation::TreeEdit {
            parent_created_at: self.target,
            target_created_at: node,
            from: 0,
            to: 0,
            kind: TreeEditKind::Remove,
            new_created_at: executed_at,
            executed_at,
        };
        if op.execute(self.ctx.root_mut()).is_ok() {
            self.ctx.push(op);
        }
    }

    pub fn style(&mut self, node: TimeTicket, attrs: Vec<(String, String)>) {
        let executed_at = self.ctx.issue_ticket();
        let op = Operation::TreeStyle { tree_created_at: self.target, target_created_at: node, attrs, executed_at };
        if op.execute(self.ctx.root_mut()).is_ok() {
            self.ctx.push(op);
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self.ctx.root().get(self.target).map(|el| &el.value) {
            Ok(ElementValue::Tree(t)) => t.to_json(),
            _ => serde_json::Value::Null,
        }
    }

    pub fn root_node(&self) -> TimeTicket {
        TimeTicket::INITIAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorID;
    use crate::change_id::ChangeID;
    use crate::root::Root;

    fn ctx() -> ChangeContext {
        ChangeContext::new(Root::new(), ChangeID::initial().with_actor(ActorID::from_bytes([1; 12])).next())
    }

    #[test]
    fn object_set_and_get_nested_roundtrips_through_json() {
        let mut c = ctx();
        {
            let mut root_obj = ObjectProxy::new(&mut c, TimeTicket::INITIAL);
            root_obj.set_string("title", "hello");
            let mut todos = root_obj.set_new_array("todos");
            todos.push_string("wash dishes");
            todos.push_string("write spec");
        }
        let mut root_obj = ObjectProxy::new(&mut c, TimeTicket::INITIAL);
        assert_eq!(root_obj.to_json()["title"], serde_json::json!("hello"));
        let todos = root_obj.get_array("todos").unwrap();
        assert_eq!(todos.len(), 2);
        assert_eq!(todos.to_json(), serde_json::json!(["wash dishes", "write spec"]));
    }

    #[test]
    fn array_remove_drops_element_from_live_view() {
        let mut c = ctx();
        let mut root_obj = ObjectProxy::new(&mut c, TimeTicket::INITIAL);
        let mut arr = root_obj.set_new_array("list");
        arr.push_i32(1);
        arr.push_i32(2);
        arr.push_i32(3);
        arr.remove(1);
        assert_eq!(arr.to_json(), serde_json::json!([1, 3]));
    }

    #[test]
    fn text_insert_then_edit_produces_expected_content() {
        let mut c = ctx();
        let mut root_obj = ObjectProxy::new(&mut c, TimeTicket::INITIAL);
        let mut text = root_obj.set_new_text("body");
        text.edit(SplitNodeId::START, SplitNodeId::START, "hello");
        assert_eq!(text.to_string_live(), "hello");
    }

    #[test]
    fn tree_insert_element_and_text_builds_expected_json() {
        let mut c = ctx();
        let mut root_obj = ObjectProxy::new(&mut c, TimeTicket::INITIAL);
        let mut tree = root_obj.set_new_tree("doc", "doc");
        let root_node = tree.root_node();
        let p = tree.insert_element(root_node, "p");
        tree.insert_text(p, "hi");
        let json = tree.to_json();
        assert_eq!(json["children"][0]["children"][0]["value"], serde_json::json!("hi"));
    }
}
