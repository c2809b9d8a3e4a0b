//! Local event dispatch: `ChangeInfo`/`OperationInfo` (spec §6.3) and the
//! path-scoped subscriber registry (spec §4.9, §9 "dispatch by a path
//! trie").
//!
//! There's no literal trie here — with the handful of subscriptions a host
//! document realistically carries, a linear scan with a cheap prefix test
//! is simpler and just as fast; "trie" here names the *matching rule*
//! (ancestor-or-equal, either direction), not a mandated data structure.

use crate::actor::ActorID;
use crate::element::ElementValue;
use crate::error::{DocError, DocResult};
use crate::presence::PresenceData;
use crate::root::Root;
use crate::time_ticket::TimeTicket;

/// Type-specific detail carried by one `OperationInfo` (spec §6.3: "path,
/// type, and type-specific fields").
#[derive(Clone, Debug, PartialEq)]
pub enum OperationDetail {
    Set { key: String },
    Add { index: usize },
    Move { index: usize },
    Remove { key_or_index: String },
    Edit { from: usize, to: usize, content: String },
    Style { from: usize, to: usize },
    Increase { value: String },
    TreeEdit { from: u32, to: u32 },
    TreeStyle,
}

impl OperationDetail {
    pub fn type_name(&self) -> &'static str {
        match self {
            OperationDetail::Set { .. } => "set",
            OperationDetail::Add { .. } => "add",
            OperationDetail::Move { .. } => "move",
            OperationDetail::Remove { .. } => "remove",
            OperationDetail::Edit { .. } => "edit",
            OperationDetail::Style { .. } => "style",
            OperationDetail::Increase { .. } => "increase",
            OperationDetail::TreeEdit { .. } => "tree-edit",
            OperationDetail::TreeStyle => "tree-style",
        }
    }
}

/// One executed operation, reported with its dotted path from `$` (spec
/// §6.3).
#[derive(Clone, Debug, PartialEq)]
pub struct OperationInfo {
    pub path: String,
    pub detail: OperationDetail,
}

/// The payload of a `local-change`/`remote-change` event (spec §6.3
/// `ChangeInfo`).
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeInfo {
    pub message: Option<String>,
    pub operations: Vec<OperationInfo>,
    pub actor: ActorID,
}

/// Every event kind the host-facing API can subscribe to (spec §6.3).
#[derive(Clone, Debug, PartialEq)]
pub enum DocEvent {
    Snapshot,
    LocalChange(ChangeInfo),
    RemoteChange(ChangeInfo),
    Initialized,
    Watched(ActorID),
    Unwatched(ActorID),
    PresenceChanged { actor: ActorID, presence: PresenceData },
    ConnectionChanged(bool),
    StatusChanged(crate::document::DocStatus),
}

/// Handle returned by `subscribe`, passed back to `unsubscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: u64,
    path: Option<String>,
    callback: Box<dyn Fn(&DocEvent)>,
}

/// `path` must be `"$"` or start with `"$."` (spec §4.9: "dotted key path
/// rooted at `$`"). An unrooted path is `Unexpected` (spec §7).
fn validate_path(path: &str) -> DocResult<()> {
    if path == "$" || path.starts_with("$.") {
        Ok(())
    } else {
        Err(DocError::Unexpected(format!("subscribe path must be rooted at $, got {path:?}")))
    }
}

/// `prefix` is `path` itself, or an ancestor of it on a `.`-segment
/// boundary (so `"$.a"` is a prefix of `"$.ab"` only incidentally in
/// string terms, not path terms — the boundary check rules that out).
fn is_path_prefix(prefix: &str, path: &str) -> bool {
    if prefix == path {
        return true;
    }
    path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'.')
}

/// Two paths are "related" for subscription dispatch if either is a
/// prefix of the other (spec §4.9 + §8 Invariant 10: a subscriber
/// receives operations at its own path and below, *and* at any ancestor
/// of its path, since an ancestor edit — e.g. removing a container — can
/// affect everything under it).
fn paths_related(sub_path: &str, op_path: &str) -> bool {
    is_path_prefix(sub_path, op_path) || is_path_prefix(op_path, sub_path)
}

/// Registry of host callbacks, scanned linearly on dispatch (see module
/// doc comment for why this isn't literally a trie).
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: u64,
    subs: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `path = None` subscribes to every event of every kind. A `Some`
    /// path scopes `LocalChange`/`RemoteChange` delivery to operations
    /// whose path is related (§`paths_related`); `Snapshot` still routes
    /// to `"$"` specifically (spec §4.9: "Snapshot events route to `$`").
    pub fn subscribe(&mut self, path: Option<&str>, callback: impl Fn(&DocEvent) + 'static) -> DocResult<SubscriptionId> {
        if let Some(p) = path {
            validate_path(p)?;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.subs.push(Subscription { id, path: path.map(str::to_owned), callback: Box::new(callback) });
        Ok(SubscriptionId(id))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subs.retain(|s| s.id != id.0);
    }

    /// Dispatch a `LocalChange`/`RemoteChange` event, scoped per-subscriber
    /// by whether any of the change's operation paths are related to the
    /// subscriber's path.
    pub fn dispatch_change(&self, event: &DocEvent, info: &ChangeInfo) {
        for sub in &self.subs {
            let deliver = match &sub.path {
                None => true,
                Some(p) => info.operations.iter().any(|op| paths_related(p, &op.path)),
            };
            if deliver {
                (sub.callback)(event);
            }
        }
    }

    /// Dispatch any other event kind. Unscoped (`None`-path) subscribers
    /// always receive it; `"$"`-scoped subscribers receive it too (every
    /// path-scoped event in this family is document-wide in spirit).
    pub fn dispatch(&self, event: &DocEvent) {
        for sub in &self.subs {
            if sub.path.is_none() || sub.path.as_deref() == Some("$") {
                (sub.callback)(event);
            }
        }
    }
}

fn find_path_from(root: &Root, container: TimeTicket, target: TimeTicket, prefix: &str) -> Option<String> {
    let el = root.get(container).ok()?;
    match &el.value {
        ElementValue::Object(o) => {
            for (key, child) in o.members.iter() {
                let child_path = format!("{prefix}.{key}");
                if *child == target {
                    return Some(child_path);
                }
                if let Some(p) = find_path_from(root, *child, target, &child_path) {
                    return Some(p);
                }
            }
            None
        }
        ElementValue::Array(a) => {
            for (i, (_, child)) in a.items.iter_all().enumerate() {
                let child_path = format!("{prefix}.{i}");
                if *child == target {
                    return Some(child_path);
                }
                if let Some(p) = find_path_from(root, *child, target, &child_path) {
                    return Some(p);
                }
            }
            None
        }
        // Primitive/Counter/Text/Tree are leaves of the path tree: their
        // own internal structure (rope fragments, tree nodes) isn't
        // addressed by the dotted path scheme.
        _ => None,
    }
}

/// The dotted path from `$` down to `target`, or `None` if `target` is no
/// longer reachable (e.g. its parent was concurrently removed).
pub fn path_of(root: &Root, target: TimeTicket) -> Option<String> {
    if target == root.root_created_at() {
        return Some("$".to_string());
    }
    find_path_from(root, root.root_created_at(), target, "$")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unrooted_path() {
        let mut reg = SubscriptionRegistry::new();
        let err = reg.subscribe(Some("a.b"), |_| {}).unwrap_err();
        assert!(matches!(err, DocError::Unexpected(_)));
    }

    #[test]
    fn i10_scoping_matches_ancestor_and_descendant_but_not_siblings() {
        assert!(paths_related("$.a.b", "$"));
        assert!(paths_related("$.a.b", "$.a"));
        assert!(paths_related("$.a.b", "$.a.b"));
        assert!(paths_related("$.a.b", "$.a.b.c"));
        assert!(!paths_related("$.a.b", "$.a.c"));
        assert!(!paths_related("$.a.b", "$.ab"));
    }

    #[test]
    fn dispatch_change_only_reaches_related_subscribers() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut reg = SubscriptionRegistry::new();
        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        reg.subscribe(Some("$.a"), move |_| hits2.set(hits2.get() + 1)).unwrap();

        let info = ChangeInfo {
            message: None,
            operations: vec![OperationInfo { path: "$.b".into(), detail: OperationDetail::Set { key: "x".into() } }],
            actor: ActorID::from_bytes([1; 12]),
        };
        reg.dispatch_change(&DocEvent::LocalChange(info.clone()), &info);
        assert_eq!(hits.get(), 0);

        let info2 = ChangeInfo {
            message: None,
            operations: vec![OperationInfo { path: "$.a.b".into(), detail: OperationDetail::Set { key: "x".into() } }],
            actor: ActorID::from_bytes([1; 12]),
        };
        reg.dispatch_change(&DocEvent::LocalChange(info2.clone()), &info2);
        assert_eq!(hits.get(), 1);
    }
}
