//! `Document`: the state machine tying together root, presences,
//! subscriptions and GC into one single-threaded cooperative actor (spec
//! §3.4, §4.9).
//!
//! A host never touches the canonical root directly. `update` clones it
//! into a `ChangeContext`, runs the host's closure against proxies over
//! that clone, and on a non-empty result promotes the mutated clone to be
//! the new canonical root — equivalent to (and simpler than) replaying the
//! recorded operations a second time, since the clone started as an exact
//! copy of the root those operations were built against (DESIGN.md).

use serde::{Deserialize, Serialize};
use tracing::{info, trace, warn};

use crate::actor::ActorID;
use crate::change::Change;
use crate::change_context::ChangeContext;
use crate::change_id::ChangeID;
use crate::change_pack::{ChangePack, SnapshotPayload};
use crate::element::ElementValue;
use crate::error::{DocError, DocResult};
use crate::json_view;
use crate::operation::Operation;
use crate::presence::{PresenceChange, PresenceData, Presences};
use crate::proxy::ObjectProxy;
use crate::root::Root;
use crate::rope::SplitNodeId;
use crate::subscription::{self, ChangeInfo, DocEvent, OperationDetail, OperationInfo, SubscriptionId, SubscriptionRegistry};
use crate::time_ticket::TimeTicket;
use crate::version_vector::{Checkpoint, VersionVector};

/// A document's lifecycle (spec §3.4): `Detached` has no server-assigned
/// actor and accepts only local, unsynced edits; `Attached` can send and
/// receive change packs; `Removed` accepts no further edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocStatus {
    Detached,
    Attached,
    Removed,
}

/// One message off the transport's watch stream (spec §6.2). The wire
/// shape is `{type, publisher_actor, document_id}`; `document_id` is the
/// transport's routing concern and doesn't appear here. `Initialized`
/// carries the full online-peer snapshot a transport typically sends on
/// first subscribe, ahead of any individual `Watched`/`Unwatched` deltas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchStreamEvent {
    Initialized(Vec<ActorID>),
    Changed(ActorID),
    Watched(ActorID),
    Unwatched(ActorID),
    Broadcast(ActorID),
}

/// Construction-time configuration (SPEC_FULL.md §A.4).
#[derive(Clone, Debug, Default)]
pub struct DocumentOptions {
    /// Server-assigned actor, if already known (e.g. restoring a
    /// previously-attached document). `None` starts the document
    /// `Detached`.
    pub actor: Option<ActorID>,
    /// Disables `garbage_collect` entirely; a host-driven debugging knob,
    /// not a CRDT feature.
    pub disable_gc: bool,
}

enum PresenceIntent {
    None,
    Put,
    Clear,
}

/// The host's view of the current actor's own presence inside an `update`
/// closure (spec §4.9 "a presence object").
pub struct Presence<'a> {
    data: &'a mut PresenceData,
    intent: &'a mut PresenceIntent,
}

impl<'a> Presence<'a> {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.set(key, value);
        *self.intent = PresenceIntent::Put;
    }

    pub fn clear(&mut self) {
        *self.data = PresenceData::new();
        *self.intent = PresenceIntent::Clear;
    }
}

pub struct Document {
    doc_key: String,
    status: DocStatus,
    disable_gc: bool,
    root: Root,
    presences: Presences,
    change_id: ChangeID,
    checkpoint: Checkpoint,
    local_changes: Vec<Change>,
    subscriptions: SubscriptionRegistry,
}

impl Document {
    pub fn new(doc_key: impl Into<String>, options: DocumentOptions) -> Self {
        let (status, change_id) = match options.actor {
            Some(actor) => (DocStatus::Attached, ChangeID::initial().with_actor(actor)),
            None => (DocStatus::Detached, ChangeID::initial()),
        };
        Document {
            doc_key: doc_key.into(),
            status,
            disable_gc: options.disable_gc,
            root: Root::new(),
            presences: Presences::new(),
            change_id,
            checkpoint: Checkpoint::INITIAL,
            local_changes: Vec::new(),
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    pub fn doc_key(&self) -> &str {
        &self.doc_key
    }

    pub fn status(&self) -> DocStatus {
        self.status
    }

    pub fn actor(&self) -> ActorID {
        self.change_id.actor()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn local_changes_len(&self) -> usize {
        self.local_changes.len()
    }

    /// Bind a server-assigned actor and move from `Detached` to `Attached`
    /// (spec §3.4). A no-op if already `Attached`.
    pub fn attach(&mut self, actor: ActorID) {
        if self.status == DocStatus::Detached {
            self.change_id = self.change_id.with_actor(actor);
            self.status = DocStatus::Attached;
            info!(doc_key = %self.doc_key, "document attached");
            self.subscriptions.dispatch(&DocEvent::StatusChanged(self.status));
        }
    }

    /// Read-only JSON projection of the current root (spec §6.3 `getRoot`).
    pub fn get_root(&self) -> serde_json::Value {
        json_view::object_to_json(&self.root, self.root.root_created_at())
    }

    pub fn get_presence(&self, actor: &ActorID) -> Option<&PresenceData> {
        self.presences.get(actor)
    }

    pub fn get_presences(&self) -> impl Iterator<Item = (&ActorID, &PresenceData)> {
        self.presences.online_presences()
    }

    pub fn has_presence(&self, actor: &ActorID) -> bool {
        self.presences.has(actor)
    }

    pub fn subscribe(&mut self, path: Option<&str>, callback: impl Fn(&DocEvent) + 'static) -> DocResult<SubscriptionId> {
        self.subscriptions.subscribe(path, callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    /// Run `updater` against a proxy view of a cloned root and this
    /// actor's presence; on a non-empty result, commit to the canonical
    /// root, append to the local change log, and fire `local-change`/
    /// `presence-changed` events (spec §4.9 `update`).
    pub fn update<F>(&mut self, message: Option<&str>, updater: F) -> DocResult<()>
    where
        F: FnOnce(&mut ObjectProxy, &mut Presence),
    {
        if self.status == DocStatus::Removed {
            return Err(DocError::DocumentRemoved);
        }

        let mut ctx = ChangeContext::new(self.root.clone(), self.change_id.clone());
        let mut presence_data = self.presences.get(&self.actor()).cloned().unwrap_or_default();
        let mut intent = PresenceIntent::None;
        {
            let root_created_at = ctx.root().root_created_at();
            let mut root_proxy = ObjectProxy::new(&mut ctx, root_created_at);
            let mut presence = Presence { data: &mut presence_data, intent: &mut intent };
            updater(&mut root_proxy, &mut presence);
        }
        match intent {
            PresenceIntent::Put => ctx.set_presence_change(PresenceChange::put(&presence_data)),
            PresenceIntent::Clear => ctx.set_presence_change(PresenceChange::Clear),
            PresenceIntent::None => {}
        }
        if let Some(m) = message {
            ctx.set_message(m.to_owned());
        }

        let Some((change, new_root)) = ctx.finish() else { return Ok(()) };
        self.change_id = change.id().clone();
        self.root = new_root;
        let actor = self.actor();
        if let Some(pc) = change.presence_change() {
            self.presences.apply(actor, pc);
            self.subscriptions.dispatch(&DocEvent::PresenceChanged { actor, presence: presence_data });
        }

        let info = self.build_change_info(&change);
        self.local_changes.push(change);
        self.subscriptions.dispatch_change(&DocEvent::LocalChange(info.clone()), &info);
        Ok(())
    }

    /// Apply a received change pack (spec §4.9 `applyChangePack`):
    /// snapshot replaces root+presences wholesale; otherwise changes
    /// replay against the canonical root in order. Atomic per pack: a
    /// `Reference`/`Unsupported` failure on one operation is logged and
    /// skipped (spec §7 propagation policy), but a malformed snapshot
    /// aborts the whole call leaving the Document untouched.
    pub fn apply_change_pack(&mut self, pack: ChangePack) -> DocResult<()> {
        if let Some(snapshot) = pack.snapshot() {
            let (root, presences) = snapshot.clone().into_parts();
            self.root = root;
            self.presences = presences;
            // Advance our own clock past every Lamport time embedded in the
            // snapshot, merging in its version vector rather than our own
            // (spec §4.1/§8 total order) — not the checkpoint's client_seq,
            // which is a change-count, not a Lamport time.
            let incoming_vv = pack.version_vector().unwrap_or_default();
            let max_lamport = incoming_vv.iter().map(|(_, lamport)| *lamport).max().unwrap_or(0);
            self.change_id = self.change_id.set_clocks(max_lamport, &incoming_vv);
            self.subscriptions.dispatch(&DocEvent::Snapshot);
        } else {
            for change in pack.changes() {
                self.change_id = self.change_id.sync_clocks(change.id());
                let errors = change.execute_lenient(&mut self.root);
                for e in &errors {
                    warn!(error = %e, "remote operation failed during apply_change_pack");
                }
                if let Some(pc) = change.presence_change() {
                    let actor = change.id().actor();
                    self.presences.apply(actor, pc);
                    self.subscriptions.dispatch(&DocEvent::PresenceChanged { actor, presence: self.presences.get(&actor).cloned().unwrap_or_default() });
                }
                let info = self.build_change_info(change);
                self.subscriptions.dispatch_change(&DocEvent::RemoteChange(info.clone()), &info);
            }
        }

        self.local_changes.retain(|c| c.id().client_seq() > pack.checkpoint().client_seq());
        self.checkpoint.forward(&pack.checkpoint());

        if !self.disable_gc {
            if let Some(vv) = pack.version_vector() {
                self.garbage_collect_by_version_vector(&vv);
            } else if let Some(ticket) = pack.min_synced_ticket() {
                self.garbage_collect_by_ticket(ticket);
            }
        }

        if pack.is_removed() {
            self.status = DocStatus::Removed;
            info!(doc_key = %self.doc_key, "document removed");
            self.subscriptions.dispatch(&DocEvent::StatusChanged(self.status));
        }
        Ok(())
    }

    /// Produce a pack carrying pending local changes, advancing the
    /// checkpoint by the pending count (spec §4.9 `createChangePack`).
    pub fn create_change_pack(&mut self, force_removed: bool) -> ChangePack {
        let changes = self.local_changes.clone();
        self.checkpoint = self.checkpoint.increased_client_seq(changes.len() as u32);
        ChangePack::with_changes(self.doc_key.clone(), self.checkpoint, changes)
            .with_is_removed(force_removed)
            .with_version_vector(self.change_id.vector())
    }

    /// A full-snapshot pack, for transports that decide replay would cost
    /// more than a fresh copy (spec §6.1).
    pub fn create_snapshot_pack(&self) -> ChangePack {
        ChangePack::with_snapshot(self.doc_key.clone(), self.checkpoint, SnapshotPayload::capture(&self.root, &self.presences))
            .with_version_vector(self.change_id.vector())
    }

    /// Purge tombstones dominated by `min_synced` (spec §4.9
    /// `garbageCollect`, legacy ticket path).
    pub fn garbage_collect_by_ticket(&mut self, min_synced: TimeTicket) -> usize {
        let top = self.root.collect_garbage_by_ticket(min_synced);
        let internal = self.root.collect_internal_garbage(|removed_at| removed_at.lamport() <= min_synced.lamport());
        trace!(top, internal, "garbage collected by ticket");
        top + internal
    }

    /// Purge tombstones dominated by `vv` (spec §4.9 `garbageCollect`,
    /// preferred path when a `VersionVector` is available).
    pub fn garbage_collect_by_version_vector(&mut self, vv: &VersionVector) -> usize {
        let top = self.root.collect_garbage_by_version_vector(vv);
        let internal = self.root.collect_internal_garbage(|removed_at| vv.after_or_equal(&removed_at));
        trace!(top, internal, "garbage collected by version vector");
        top + internal
    }

    /// Apply one message off the transport's watch stream (spec §6.2):
    /// `DOCUMENT_WATCHED`/`DOCUMENT_UNWATCHED` update `onlineClients`
    /// membership and fire the matching subscriber event;
    /// `DOCUMENT_CHANGED`/`DOCUMENT_BROADCAST` carry no state change of
    /// their own here — the transport is expected to follow up with a
    /// change pack pull — but still reach subscribers so a host can react
    /// (e.g. a "peer is typing" indicator) without waiting on that pull.
    pub fn handle_watch_event(&mut self, event: WatchStreamEvent) {
        match event {
            WatchStreamEvent::Initialized(actors) => {
                for actor in &actors {
                    self.presences.set_online(*actor);
                }
                self.subscriptions.dispatch(&DocEvent::Initialized);
            }
            WatchStreamEvent::Watched(actor) => {
                self.presences.set_online(actor);
                self.subscriptions.dispatch(&DocEvent::Watched(actor));
            }
            WatchStreamEvent::Unwatched(actor) => {
                self.presences.set_offline(&actor);
                self.subscriptions.dispatch(&DocEvent::Unwatched(actor));
            }
            WatchStreamEvent::Changed(_) | WatchStreamEvent::Broadcast(_) => {
                trace!(?event, "watch stream signal received");
            }
        }
    }

    /// Host-reported transport connectivity (spec §6.3 `connection-changed`).
    pub fn set_connected(&mut self, connected: bool) {
        self.subscriptions.dispatch(&DocEvent::ConnectionChanged(connected));
    }

    fn build_change_info(&mut self, change: &Change) -> ChangeInfo {
        let operations = change.operations().iter().map(|op| describe_operation(&mut self.root, op)).collect();
        ChangeInfo { message: change.message().map(str::to_owned), operations, actor: change.id().actor() }
    }
}

fn array_position(root: &Root, parent: TimeTicket, target: TimeTicket) -> Option<usize> {
    let el = root.get(parent).ok()?;
    let ElementValue::Array(arr) = &el.value else { return None };
    arr.items.iter_all().position(|(c, _)| c == target)
}

fn object_key_of(root: &Root, parent: TimeTicket, target: TimeTicket) -> Option<String> {
    let el = root.get(parent).ok()?;
    let ElementValue::Object(obj) = &el.value else { return None };
    obj.members.all_entries().find(|(_, c, _, _)| *c == target).map(|(k, ..)| k.to_owned())
}

fn remove_label(root: &Root, parent: TimeTicket, target: TimeTicket) -> String {
    if let Some(key) = object_key_of(root, parent, target) {
        return key;
    }
    array_position(root, parent, target).map(|i| i.to_string()).unwrap_or_default()
}

fn text_range(root: &mut Root, parent: TimeTicket, from: SplitNodeId, to: SplitNodeId) -> (usize, usize) {
    let Ok(el) = root.get_mut(parent) else { return (0, 0) };
    let ElementValue::Text(text) = &mut el.value else { return (0, 0) };
    let f = text.rope.char_index_of(from).unwrap_or(0);
    let t = text.rope.char_index_of(to).unwrap_or(f);
    (f, t)
}

fn describe_operation(root: &mut Root, op: &Operation) -> OperationInfo {
    let parent = op.parent_created_at();
    let path = subscription::path_of(root, parent).unwrap_or_else(|| "$".to_string());
    let detail = match op {
        Operation::Set { key, .. } => OperationDetail::Set { key: key.clone() },
        Operation::Add { created_at, .. } => OperationDetail::Add { index: array_position(root, parent, *created_at).unwrap_or(0) },
        Operation::Move { created_at, .. } => OperationDetail::Move { index: array_position(root, parent, *created_at).unwrap_or(0) },
        Operation::Remove { created_at, .. } => OperationDetail::Remove { key_or_index: remove_label(root, parent, *created_at) },
        Operation::Edit { from, to, content, .. } => {
            let (f, t) = text_range(root, parent, *from, *to);
            OperationDetail::Edit { from: f, to: t, content: content.clone() }
        }
        Operation::Style { from, to, .. } => {
            let (f, t) = text_range(root, parent, *from, *to);
            OperationDetail::Style { from: f, to: t }
        }
        Operation::Increase { value, .. } => OperationDetail::Increase { value: value.to_json().to_string() },
        Operation::TreeEdit { from, to, .. } => OperationDetail::TreeEdit { from: *from, to: *to },
        Operation::TreeStyle { .. } => OperationDetail::TreeStyle,
    };
    OperationInfo { path, detail }
}
