//! Read-only JSON projection of a `Root` subtree (spec §6.3 `getRoot`,
//! §9 "read-only access outside `update` returns a snapshot view").

use crate::element::ElementValue;
use crate::root::Root;
use crate::time_ticket::TimeTicket;

/// `{key: value, ...}` for a live object element, recursing into live
/// children only — tombstoned entries never surface here (spec §3.2/§4.3).
pub fn object_to_json(root: &Root, created_at: TimeTicket) -> serde_json::Value {
    value_to_json(root, created_at)
}

pub fn array_to_json(root: &Root, created_at: TimeTicket) -> serde_json::Value {
    value_to_json(root, created_at)
}

pub fn value_to_json(root: &Root, created_at: TimeTicket) -> serde_json::Value {
    let Ok(el) = root.get(created_at) else { return serde_json::Value::Null };
    match &el.value {
        ElementValue::Primitive(p) => p.to_json(),
        ElementValue::Counter(c) => c.to_json(),
        ElementValue::Object(o) => {
            let map: serde_json::Map<String, serde_json::Value> =
                o.members.iter().map(|(k, child)| (k.to_owned(), value_to_json(root, *child))).collect();
            serde_json::Value::Object(map)
        }
        ElementValue::Array(a) => serde_json::Value::Array(a.items.iter_live().map(|child| value_to_json(root, *child)).collect()),
        ElementValue::Text(t) => serde_json::Value::String(t.rope.to_string_live()),
        ElementValue::Tree(t) => t.to_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::primitive::Primitive;

    #[test]
    fn projects_nested_object_skipping_tombstones() {
        let mut root = Root::new();
        let child = TimeTicket::new(1, 0, crate::actor::ActorID::from_bytes([1; 12]));
        root.register(Element::new(child, ElementValue::Primitive(Primitive::String("hi".into()))));
        {
            let ElementValue::Object(obj) = &mut root.get_mut(TimeTicket::INITIAL).unwrap().value else { unreachable!() };
            obj.members.set("greeting", child, child);
        }
        let removed = TimeTicket::new(2, 0, crate::actor::ActorID::from_bytes([1; 12]));
        root.register(Element::new(removed, ElementValue::Primitive(Primitive::Int32(1))));
        {
            let ElementValue::Object(obj) = &mut root.get_mut(TimeTicket::INITIAL).unwrap().value else { unreachable!() };
            obj.members.set("gone", removed, removed);
            obj.members.remove(removed, TimeTicket::new(3, 0, crate::actor::ActorID::from_bytes([1; 12])));
        }

        let json = object_to_json(&root, TimeTicket::INITIAL);
        assert_eq!(json["greeting"], serde_json::json!("hi"));
        assert!(json.get("gone").is_none());
    }
}
