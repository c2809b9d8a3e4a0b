//! Replicated hash table — ordered key→element map with tombstones
//! (spec §4.3).

use std::collections::BTreeMap;

use crate::time_ticket::TimeTicket;

/// One key's entry. Multiple entries may share a key (concurrent `set`s);
/// `get` resolves ties by largest `created_at` (Lamport-max wins) among the
/// entries that aren't tombstoned.
#[derive(Clone, Debug, PartialEq)]
struct Entry<V> {
    created_at: TimeTicket,
    removed_at: Option<TimeTicket>,
    value: V,
}

/// Maps `String` keys to elements with RHT (last-writer-wins by creation
/// time) semantics.
///
/// Iteration yields live entries in lexicographic key order — fixed as the
/// deterministic order spec.md leaves unspecified (SPEC_FULL.md §B.2), which
/// is what makes two converged replicas' sorted-JSON projections comparable
/// at all.
#[derive(Clone, Debug, Default)]
pub struct Rht<V> {
    // Key -> entries for that key, each created_at-unique. Kept as a Vec
    // because any one key rarely has more than a couple of concurrent
    // entries; a BTreeMap<TimeTicket, V> would be overkill.
    entries: BTreeMap<String, Vec<Entry<V>>>,
}

impl<V> Rht<V> {
    pub fn new() -> Self {
        Rht { entries: BTreeMap::new() }
    }

    /// Insert `value` under `key` with identity `created_at`. Idempotent:
    /// inserting an entry whose `created_at` already exists for this key is
    /// a no-op (spec §4.3 invariant).
    pub fn set(&mut self, key: &str, created_at: TimeTicket, value: V) {
        let bucket = self.entries.entry(key.to_owned()).or_default();
        if bucket.iter().any(|e| e.created_at == created_at) {
            return;
        }
        bucket.push(Entry { created_at, removed_at: None, value });
    }

    /// The live entry with the largest `created_at` for `key`, if any
    /// (spec §4.3: `get` never returns a tombstoned entry).
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries
            .get(key)?
            .iter()
            .filter(|e| e.removed_at.is_none())
            .max_by_key(|e| e.created_at)
            .map(|e| &e.value)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Tombstone the entry identified by `created_at`, wherever it lives.
    /// Returns `true` if an entry was found and newly tombstoned.
    pub fn remove(&mut self, created_at: TimeTicket, executed_at: TimeTicket) -> bool {
        for bucket in self.entries.values_mut() {
            if let Some(entry) = bucket.iter_mut().find(|e| e.created_at == created_at) {
                if entry.removed_at.map(|r| executed_at > r).unwrap_or(true) {
                    entry.removed_at = Some(executed_at);
                    return true;
                }
                return false;
            }
        }
        false
    }

    /// Tombstone the currently-live entry for `key` (spec §4.3
    /// `removeByKey`). Returns the `created_at` of the tombstoned entry.
    pub fn remove_by_key(&mut self, key: &str, executed_at: TimeTicket) -> Option<TimeTicket> {
        let bucket = self.entries.get_mut(key)?;
        let target = bucket
            .iter_mut()
            .filter(|e| e.removed_at.is_none())
            .max_by_key(|e| e.created_at)?;
        let created_at = target.created_at;
        target.removed_at = Some(executed_at);
        Some(created_at)
    }

    /// Live entries in lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().filter_map(|(k, bucket)| {
            bucket
                .iter()
                .filter(|e| e.removed_at.is_none())
                .max_by_key(|e| e.created_at)
                .map(|e| (k.as_str(), &e.value))
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry (tombstoned included), for snapshotting. Order is
    /// unspecified beyond being stable for a given in-memory instance.
    pub fn all_entries(&self) -> impl Iterator<Item = (&str, TimeTicket, Option<TimeTicket>, &V)> {
        self.entries
            .iter()
            .flat_map(|(k, bucket)| bucket.iter().map(move |e| (k.as_str(), e.created_at, e.removed_at, &e.value)))
    }

    /// Rebuild an `Rht` from a flat entry list (snapshot load). Entries may
    /// be given in any order; ties on `created_at` are resolved the same
    /// way `set` resolves them (idempotent, first writer wins).
    pub fn from_entries(entries: impl IntoIterator<Item = (String, TimeTicket, Option<TimeTicket>, V)>) -> Self {
        let mut rht = Rht::new();
        for (key, created_at, removed_at, value) in entries {
            rht.set(&key, created_at, value);
            if let Some(r) = removed_at {
                rht.remove(created_at, r);
            }
        }
        rht
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorID;

    fn ticket(l: u64) -> TimeTicket {
        TimeTicket::new(l, 0, ActorID::from_bytes([1; 12]))
    }

    #[test]
    fn get_returns_lamport_max_among_live_entries() {
        let mut rht: Rht<i32> = Rht::new();
        rht.set("a", ticket(1), 1);
        rht.set("a", ticket(3), 3);
        rht.set("a", ticket(2), 2);
        assert_eq!(rht.get("a"), Some(&3));
    }

    #[test]
    fn set_is_idempotent_on_same_created_at() {
        let mut rht: Rht<i32> = Rht::new();
        rht.set("a", ticket(1), 1);
        rht.set("a", ticket(1), 99); // same created_at: ignored
        assert_eq!(rht.get("a"), Some(&1));
    }

    #[test]
    fn remove_hides_entry_from_get() {
        let mut rht: Rht<i32> = Rht::new();
        rht.set("a", ticket(1), 1);
        rht.remove(ticket(1), ticket(2));
        assert_eq!(rht.get("a"), None);
    }

    #[test]
    fn remove_by_key_falls_back_to_older_live_entry() {
        let mut rht: Rht<i32> = Rht::new();
        rht.set("a", ticket(1), 1);
        rht.set("a", ticket(2), 2);
        let removed = rht.remove_by_key("a", ticket(3)).unwrap();
        assert_eq!(removed, ticket(2));
        assert_eq!(rht.get("a"), Some(&1));
    }

    #[test]
    fn iteration_order_is_lexicographic_by_key() {
        let mut rht: Rht<i32> = Rht::new();
        rht.set("z", ticket(1), 1);
        rht.set("a", ticket(1), 2);
        rht.set("m", ticket(1), 3);
        let keys: Vec<&str> = rht.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "m", "z"]);
    }

    #[test]
    fn snapshot_roundtrip_preserves_live_and_tombstoned_entries() {
        let mut rht: Rht<i32> = Rht::new();
        rht.set("a", ticket(1), 1);
        rht.set("b", ticket(2), 2);
        rht.remove(ticket(2), ticket(3));

        let entries: Vec<_> = rht
            .all_entries()
            .map(|(k, c, r, v)| (k.to_owned(), c, r, *v))
            .collect();
        let rebuilt = Rht::from_entries(entries);
        assert_eq!(rebuilt.get("a"), Some(&1));
        assert_eq!(rebuilt.get("b"), None);
    }
}
