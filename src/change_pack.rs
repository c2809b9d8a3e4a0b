//! `ChangePack`: the client↔server sync envelope (spec §6.1).
//!
//! A pack carries either a list of changes (the common incremental path) or
//! a full snapshot (sent when the server decides replay would cost more
//! than a fresh copy) — never expected to carry both, though nothing here
//! enforces that; `Document::apply_change_pack` decides which to use.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::change::Change;
use crate::presence::{PresenceData, Presences};
use crate::root::{Root, RootSnapshot};
use crate::time_ticket::TimeTicket;
use crate::version_vector::{Checkpoint, VersionVector};

/// A snapshot's full payload: the element registry plus the presence
/// registry as it stood at the moment the snapshot was taken (spec §6.1,
/// §6.2).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub root: RootSnapshot,
    pub presences: Vec<(crate::actor::ActorID, PresenceData)>,
}

impl SnapshotPayload {
    pub fn capture(root: &Root, presences: &Presences) -> Self {
        SnapshotPayload { root: root.to_snapshot(), presences: presences.entries().collect() }
    }

    pub fn into_parts(self) -> (Root, Presences) {
        let root = Root::from_snapshot(self.root);
        let presences = Presences::from_entries(self.presences);
        (root, presences)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangePack {
    doc_key: String,
    checkpoint: Checkpoint,
    is_removed: bool,
    changes: Vec<Change>,
    snapshot: Option<SnapshotPayload>,
    /// Wire form of a `VersionVector` (actor hex -> lamport): `ActorID`
    /// doesn't serialize to a JSON-object-key-shaped string on its own, so
    /// the map is flattened the same way `VersionVector::to_wire_map` does
    /// for its own callers.
    version_vector: Option<BTreeMap<String, i64>>,
    min_synced_ticket: Option<TimeTicket>,
}

impl ChangePack {
    /// Build an incremental pack carrying local changes (spec §4.9
    /// `createChangePack`).
    pub fn with_changes(doc_key: impl Into<String>, checkpoint: Checkpoint, changes: Vec<Change>) -> Self {
        ChangePack { doc_key: doc_key.into(), checkpoint, is_removed: false, changes, snapshot: None, version_vector: None, min_synced_ticket: None }
    }

    /// Build a full-snapshot pack (spec §6.1 "snapshot present").
    pub fn with_snapshot(doc_key: impl Into<String>, checkpoint: Checkpoint, snapshot: SnapshotPayload) -> Self {
        ChangePack {
            doc_key: doc_key.into(),
            checkpoint,
            is_removed: false,
            changes: Vec::new(),
            snapshot: Some(snapshot),
            version_vector: None,
            min_synced_ticket: None,
        }
    }

    pub fn doc_key(&self) -> &str {
        &self.doc_key
    }
    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }
    pub fn is_removed(&self) -> bool {
        self.is_removed
    }
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }
    pub fn snapshot(&self) -> Option<&SnapshotPayload> {
        self.snapshot.as_ref()
    }
    pub fn version_vector(&self) -> Option<VersionVector> {
        self.version_vector.as_ref().and_then(VersionVector::from_wire_map)
    }
    pub fn min_synced_ticket(&self) -> Option<TimeTicket> {
        self.min_synced_ticket
    }

    pub fn with_is_removed(mut self, is_removed: bool) -> Self {
        self.is_removed = is_removed;
        self
    }
    pub fn with_version_vector(mut self, vv: &VersionVector) -> Self {
        self.version_vector = Some(vv.to_wire_map());
        self
    }
    pub fn with_min_synced_ticket(mut self, ticket: TimeTicket) -> Self {
        self.min_synced_ticket = Some(ticket);
        self
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// JSON-encode for transport, trailing a CRC-32 of the payload (spec
    /// §6.1 "wire bytes"); `from_bytes` verifies it before handing the
    /// payload to `serde_json`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::error::DocError> {
        let payload = serde_json::to_vec(self).map_err(|e| crate::error::DocError::Decode(e.to_string()))?;
        let payload = maybe_compress(payload);
        Ok(append_checksum(payload))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::error::DocError> {
        let payload = verify_checksum(bytes)?;
        let payload = maybe_decompress(payload)?;
        serde_json::from_slice(&payload).map_err(|e| crate::error::DocError::Decode(e.to_string()))
    }
}

const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

fn append_checksum(mut payload: Vec<u8>) -> Vec<u8> {
    let checksum = CRC.checksum(&payload);
    payload.extend_from_slice(&checksum.to_be_bytes());
    payload
}

fn verify_checksum(bytes: &[u8]) -> Result<&[u8], crate::error::DocError> {
    if bytes.len() < 4 {
        return Err(crate::error::DocError::Decode("change pack shorter than its checksum".into()));
    }
    let (payload, tail) = bytes.split_at(bytes.len() - 4);
    let expected = u32::from_be_bytes(tail.try_into().expect("split_at guarantees 4 bytes"));
    let actual = CRC.checksum(payload);
    if actual != expected {
        return Err(crate::error::DocError::Decode(format!("change pack checksum mismatch: expected {expected:#x}, got {actual:#x}")));
    }
    Ok(payload)
}

#[cfg(feature = "snapshot-compression")]
fn maybe_compress(payload: Vec<u8>) -> Vec<u8> {
    lz4_flex::compress_prepend_size(&payload)
}

#[cfg(not(feature = "snapshot-compression"))]
fn maybe_compress(payload: Vec<u8>) -> Vec<u8> {
    payload
}

#[cfg(feature = "snapshot-compression")]
fn maybe_decompress(payload: &[u8]) -> Result<Vec<u8>, crate::error::DocError> {
    lz4_flex::decompress_size_prepended(payload).map_err(|e| crate::error::DocError::Decode(e.to_string()))
}

#[cfg(not(feature = "snapshot-compression"))]
fn maybe_decompress(payload: &[u8]) -> Result<Vec<u8>, crate::error::DocError> {
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorID;
    use crate::change_id::ChangeID;

    #[test]
    fn round_trips_an_incremental_pack_through_bytes() {
        let change = Change::new(ChangeID::initial().with_actor(ActorID::from_bytes([1; 12])).next(), Vec::new(), None, Some("hi".into()));
        let pack = ChangePack::with_changes("doc-1", Checkpoint::new(3, 1), vec![change]).with_version_vector(&VersionVector::new());
        let bytes = pack.to_bytes().unwrap();
        let back = ChangePack::from_bytes(&bytes).unwrap();
        assert_eq!(back.doc_key(), "doc-1");
        assert_eq!(back.changes().len(), 1);
        assert_eq!(back.changes()[0].message(), Some("hi"));
    }

    #[test]
    fn corrupted_bytes_fail_checksum_verification() {
        let change = Change::new(ChangeID::initial().with_actor(ActorID::from_bytes([1; 12])).next(), Vec::new(), None, None);
        let pack = ChangePack::with_changes("doc-1", Checkpoint::new(0, 1), vec![change]);
        let mut bytes = pack.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = ChangePack::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, crate::error::DocError::Decode(_)));
    }

    #[test]
    fn snapshot_payload_captures_and_restores_presences() {
        let root = Root::new();
        let mut presences = Presences::new();
        let actor = ActorID::from_bytes([7; 12]);
        presences.set_online(actor);
        let mut data = PresenceData::new();
        data.set("cursor", serde_json::json!(3));
        presences.apply(actor, &crate::presence::PresenceChange::put(&data));

        let payload = SnapshotPayload::capture(&root, &presences);
        let bytes = serde_json::to_vec(&payload).unwrap();
        let restored: SnapshotPayload = serde_json::from_slice(&bytes).unwrap();
        let (_root, restored_presences) = restored.into_parts();
        assert_eq!(restored_presences.get(&actor).unwrap().get("cursor"), Some(&serde_json::json!(3)));
    }
}
