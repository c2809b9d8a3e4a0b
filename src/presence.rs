//! Presence — per-actor ephemeral state tracked alongside changes, outside
//! the CRDT merge (spec §4.8, §4.9, §9 "Presence-only changes").

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::actor::ActorID;

/// A presence payload: arbitrary JSON values keyed by string (cursors,
/// selections, display names, ...). The wire form flattens each value to a
/// JSON string (spec §6.1 `map<string,string>`); see
/// [`PresenceData::to_wire_map`] / [`PresenceData::from_wire_map`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceData(BTreeMap<String, serde_json::Value>);

impl PresenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` into `self`, as a partial `Put` would (spec §4.9's
    /// presence example sets `{cursor:{x,y}}` without clearing prior keys).
    pub fn merge(&mut self, other: &PresenceData) {
        for (k, v) in other.0.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Flatten to the wire's `map<string,string>` shape (spec §6.1).
    pub fn to_wire_map(&self) -> BTreeMap<String, String> {
        self.0.iter().map(|(k, v)| (k.clone(), v.to_string())).collect()
    }

    pub fn from_wire_map(map: &BTreeMap<String, String>) -> Self {
        let mut data = PresenceData::new();
        for (k, v) in map {
            let parsed = serde_json::from_str(v).unwrap_or_else(|_| serde_json::Value::String(v.clone()));
            data.set(k.clone(), parsed);
        }
        data
    }
}

/// A pending presence update recorded by a `ChangeContext` (spec §4.8:
/// `{Put(map) | Clear}`). `Clear` is a distinct wire variant, not just the
/// absence of `Put` (SPEC_FULL.md §B.5), so an explicit retraction can be
/// told apart from "this change didn't touch presence at all".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PresenceChange {
    Put(BTreeMap<String, String>),
    Clear,
}

impl PresenceChange {
    pub fn put(data: &PresenceData) -> Self {
        PresenceChange::Put(data.to_wire_map())
    }
}

/// Per-document registry of every actor's last-known presence, plus the
/// set of actors the watch stream currently reports online (spec §4.9,
/// §6.2).
#[derive(Clone, Debug, Default)]
pub struct Presences {
    by_actor: BTreeMap<ActorID, PresenceData>,
    online: HashSet<ActorID>,
}

impl Presences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor: &ActorID) -> Option<&PresenceData> {
        self.by_actor.get(actor)
    }

    pub fn has(&self, actor: &ActorID) -> bool {
        self.by_actor.contains_key(actor)
    }

    /// Online actors' presences only (spec §4.9 `getPresences`).
    pub fn online_presences(&self) -> impl Iterator<Item = (&ActorID, &PresenceData)> {
        self.by_actor.iter().filter(|(actor, _)| self.online.contains(actor))
    }

    pub fn is_online(&self, actor: &ActorID) -> bool {
        self.online.contains(actor)
    }

    pub fn set_online(&mut self, actor: ActorID) {
        self.online.insert(actor);
    }

    pub fn set_offline(&mut self, actor: &ActorID) {
        self.online.remove(actor);
    }

    /// Apply a change's `presence_change` for `actor` (spec §4.8: "for a
    /// `Put`, updates the presence map for the change's actor").
    pub fn apply(&mut self, actor: ActorID, change: &PresenceChange) {
        match change {
            PresenceChange::Put(map) => {
                let incoming = PresenceData::from_wire_map(map);
                self.by_actor.entry(actor).or_default().merge(&incoming);
            }
            PresenceChange::Clear => {
                self.by_actor.remove(&actor);
                self.online.remove(&actor);
            }
        }
    }

    pub fn all(&self) -> impl Iterator<Item = (&ActorID, &PresenceData)> {
        self.by_actor.iter()
    }

    /// Rebuild from a snapshot's flat (actor, presence) list (used when
    /// loading a change pack snapshot; online status isn't part of a
    /// snapshot — it's re-established by the watch stream).
    pub fn from_entries(entries: impl IntoIterator<Item = (ActorID, PresenceData)>) -> Self {
        Presences { by_actor: entries.into_iter().collect(), online: HashSet::new() }
    }

    pub fn entries(&self) -> impl Iterator<Item = (ActorID, PresenceData)> + '_ {
        self.by_actor.iter().map(|(a, d)| (*a, d.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(b: u8) -> ActorID {
        ActorID::from_bytes([b; 12])
    }

    #[test]
    fn s6_put_merges_without_clobbering_other_keys() {
        let mut presences = Presences::new();
        let a = actor(1);
        let mut data = PresenceData::new();
        data.set("name", serde_json::json!("alice"));
        presences.apply(a, &PresenceChange::put(&data));

        let mut cursor = PresenceData::new();
        cursor.set("cursor", serde_json::json!({"x": 1, "y": 2}));
        presences.apply(a, &PresenceChange::put(&cursor));

        let merged = presences.get(&a).unwrap();
        assert_eq!(merged.get("name"), Some(&serde_json::json!("alice")));
        assert_eq!(merged.get("cursor"), Some(&serde_json::json!({"x": 1, "y": 2})));
    }

    #[test]
    fn clear_removes_actor_entirely() {
        let mut presences = Presences::new();
        let a = actor(1);
        let mut data = PresenceData::new();
        data.set("x", serde_json::json!(1));
        presences.apply(a, &PresenceChange::put(&data));
        presences.set_online(a);
        assert!(presences.has(&a));

        presences.apply(a, &PresenceChange::Clear);
        assert!(!presences.has(&a));
        assert!(!presences.is_online(&a));
    }

    #[test]
    fn online_presences_excludes_offline_actors() {
        let mut presences = Presences::new();
        let a = actor(1);
        let b = actor(2);
        let mut data = PresenceData::new();
        data.set("x", serde_json::json!(1));
        presences.apply(a, &PresenceChange::put(&data));
        presences.apply(b, &PresenceChange::put(&data));
        presences.set_online(a);

        let online: Vec<_> = presences.online_presences().map(|(actor, _)| *actor).collect();
        assert_eq!(online, vec![a]);
    }
}
