//! Local Reactive Store
//!
//! Holds the latest snapshot per subscribed key together with the ledger of
//! optimistic edits, and notifies listeners when either changes.
//!
//! ## Delivery
//!
//! Every key has a delivery lock. A snapshot is swapped in and its listeners
//! are run while that lock is held, so listeners of one key never overlap and
//! always observe snapshots in arrival order. The lock is reentrant: a
//! listener may read the store, start a toggle or detach its own handle from
//! inside the callback.
//!
//! Channel teardown takes the same lock, so a delivery that already started
//! finishes before the key is closed.
//!
//! ## Lock order
//!
//! delivery → ledger → slots. Listeners are invoked with only the delivery
//! lock held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use feedline_core::{
    ChannelError, Record, RecordId, RecordRef, ResourceKey, Snapshot, SyncError, UserId,
};
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::edits::{Baseline, EditId, EditLedger, EditStatus, OptimisticEdit, ToggleTarget, WriteResolution};

/// Something a listener of one key is told about.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A new authoritative snapshot replaced the cached one
    Snapshot(Arc<Snapshot>),
    /// The effective value of a record in this key changed locally
    Edited(ToggleTarget),
    /// The key's channel failed and was closed
    Failed(ChannelError),
}

/// Identity of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;
type DeliveryLock = Arc<ReentrantMutex<()>>;

struct Slot {
    snapshot: Option<Arc<Snapshot>>,
    failure: Option<ChannelError>,
    listeners: Vec<(ListenerId, Listener)>,
    delivery: DeliveryLock,
    /// Generation of the channel currently feeding this key
    channel: Option<u64>,
    /// Store-wide arrival order of the cached snapshot
    arrival: u64,
}

impl Slot {
    fn new() -> Self {
        Self {
            snapshot: None,
            failure: None,
            listeners: Vec::new(),
            delivery: Arc::new(ReentrantMutex::new(())),
            channel: None,
            arrival: 0,
        }
    }

    fn is_unused(&self) -> bool {
        self.channel.is_none() && self.listeners.is_empty() && self.failure.is_none()
    }

    fn listeners(&self) -> Vec<Listener> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}

struct StoreInner {
    slots: RwLock<HashMap<ResourceKey, Slot>>,
    ledger: Mutex<EditLedger>,
    next_listener: AtomicU64,
    next_arrival: AtomicU64,
}

/// Per-key cache of authoritative snapshots merged with optimistic edits.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending_edits = self.inner.ledger.lock().pending_count();
        let keys = self.inner.slots.read().len();
        f.debug_struct("LocalStore")
            .field("keys", &keys)
            .field("pending_edits", &pending_edits)
            .finish()
    }
}

impl LocalStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                slots: RwLock::new(HashMap::new()),
                ledger: Mutex::new(EditLedger::default()),
                next_listener: AtomicU64::new(1),
                next_arrival: AtomicU64::new(1),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// The last snapshot delivered for `key`, exactly as delivered.
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<Snapshot>> {
        self.inner
            .slots
            .read()
            .get(key)
            .and_then(|slot| slot.snapshot.clone())
    }

    /// The channel failure reported for `key`, until it is re-attached.
    pub fn failure(&self, key: &ResourceKey) -> Option<ChannelError> {
        self.inner
            .slots
            .read()
            .get(key)
            .and_then(|slot| slot.failure.clone())
    }

    /// The cached snapshot of `key` with optimistic edits applied.
    pub fn effective_snapshot(&self, key: &ResourceKey) -> Option<Snapshot> {
        let ledger = self.inner.ledger.lock();
        let snapshot = self.get(key)?;
        let records = snapshot
            .records()
            .iter()
            .map(|record| overlay_record(&ledger, key, record))
            .collect();
        Some(Snapshot::new(key.clone(), snapshot.version(), records))
    }

    /// One record of `key` with optimistic edits applied.
    pub fn effective_record(&self, key: &ResourceKey, id: &RecordId) -> Option<Record> {
        let ledger = self.inner.ledger.lock();
        let snapshot = self.get(key)?;
        snapshot
            .record(id)
            .map(|record| overlay_record(&ledger, key, record))
    }

    /// Whether `record_id.field` in `key` contains `member`, with optimistic
    /// edits taking precedence over the cached snapshot.
    ///
    /// A record that is not cached counts as not containing the member.
    pub fn is_member(
        &self,
        key: &ResourceKey,
        record_id: &RecordId,
        field: &str,
        member: &str,
    ) -> bool {
        let target = ToggleTarget::new(RecordRef::new(key.kind(), record_id.clone()), field, member);
        let ledger = self.inner.ledger.lock();
        if let Some(desired) = ledger.overlay(&target) {
            return desired;
        }
        self.get(key)
            .and_then(|snapshot| snapshot.record(record_id).map(|r| target.observed_in(r)))
            .unwrap_or(false)
    }

    /// Effective membership of a target, looked up in whichever cached key
    /// carries its record most recently.
    pub fn effective_membership(&self, target: &ToggleTarget) -> bool {
        let ledger = self.inner.ledger.lock();
        self.baseline(&ledger, target).effective
    }

    /// Status of the edit currently tracked for `target`.
    pub fn edit_status(&self, target: &ToggleTarget) -> Option<EditStatus> {
        self.inner.ledger.lock().status(target)
    }

    /// The edit currently tracked for `target`.
    pub fn edit(&self, target: &ToggleTarget) -> Option<OptimisticEdit> {
        self.inner.ledger.lock().get(target)
    }

    /// Number of edits awaiting their remote write or a snapshot.
    pub fn pending_edit_count(&self) -> usize {
        self.inner.ledger.lock().pending_count()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────

    /// Run `callback` for every change to `key`, serialized per key.
    pub fn subscribe_to_changes<F>(&self, key: &ResourceKey, callback: F) -> ListenerId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner
            .slots
            .write()
            .entry(key.clone())
            .or_insert_with(Slot::new)
            .listeners
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, key: &ResourceKey, id: ListenerId) -> bool {
        let mut slots = self.inner.slots.write();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        let before = slot.listeners.len();
        slot.listeners.retain(|(listener, _)| *listener != id);
        let removed = slot.listeners.len() != before;
        if slot.is_unused() {
            slots.remove(key);
        }
        removed
    }

    /// Number of listeners registered on `key`.
    pub fn listener_count(&self, key: &ResourceKey) -> usize {
        self.inner
            .slots
            .read()
            .get(key)
            .map_or(0, |slot| slot.listeners.len())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channel lifecycle (driven by the registry)
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn open_slot(&self, key: &ResourceKey, generation: u64) {
        let mut slots = self.inner.slots.write();
        let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
        slot.channel = Some(generation);
        slot.failure = None;
    }

    /// Stop accepting pushes from `generation` and drop its cached snapshot.
    ///
    /// Waits for a delivery of this key that is already running.
    pub(crate) fn close_slot(&self, key: &ResourceKey, generation: u64) {
        let Some(delivery) = self.delivery_lock(key) else {
            return;
        };
        let _delivering = delivery.lock();
        let mut slots = self.inner.slots.write();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        if slot.channel != Some(generation) {
            return;
        }
        slot.channel = None;
        slot.snapshot = None;
        if slot.is_unused() {
            slots.remove(key);
        }
    }

    /// Replace the cached snapshot of the key and notify its listeners.
    ///
    /// Pushes from a generation that is no longer current are dropped.
    /// Returns whether the snapshot was applied.
    pub(crate) fn apply_snapshot(&self, generation: u64, snapshot: Snapshot) -> bool {
        let key = snapshot.key().clone();
        let Some(delivery) = self.delivery_lock(&key) else {
            return false;
        };
        let _delivering = delivery.lock();

        let snapshot = Arc::new(snapshot);
        let listeners = {
            let mut ledger = self.inner.ledger.lock();
            let mut slots = self.inner.slots.write();
            let Some(slot) = slots.get_mut(&key) else {
                return false;
            };
            if slot.channel != Some(generation) {
                tracing::trace!(key = %key, generation, "dropping push from closed channel");
                return false;
            }
            slot.snapshot = Some(snapshot.clone());
            slot.arrival = self.inner.next_arrival.fetch_add(1, Ordering::Relaxed);

            for record in snapshot.records() {
                for (target, id, status) in ledger.reconcile(key.kind(), record) {
                    tracing::debug!(toggle = %target, edit = %id, ?status, "edit reconciled by snapshot");
                }
            }
            slot.listeners()
        };

        tracing::debug!(
            key = %key,
            version = %snapshot.version(),
            records = snapshot.len(),
            "snapshot delivered"
        );
        let event = StoreEvent::Snapshot(snapshot);
        for listener in listeners {
            listener(&event);
        }
        true
    }

    /// Record a channel failure and tell the key's listeners.
    pub(crate) fn fail(&self, key: &ResourceKey, generation: u64, error: ChannelError) {
        let Some(delivery) = self.delivery_lock(key) else {
            return;
        };
        let _delivering = delivery.lock();
        let listeners = {
            let mut slots = self.inner.slots.write();
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            if slot.channel != Some(generation) {
                return;
            }
            slot.channel = None;
            slot.failure = Some(error.clone());
            slot.listeners()
        };

        tracing::warn!(key = %key, reason = %error.reason, "subscription channel failed");
        let event = StoreEvent::Failed(error);
        for listener in listeners {
            listener(&event);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Edits (driven by the coordinator)
    // ─────────────────────────────────────────────────────────────────────

    /// Flip every target toward the opposite of the first target's effective
    /// membership, atomically.
    pub(crate) fn begin_edits(
        &self,
        acting_user: &UserId,
        targets: &[ToggleTarget],
    ) -> Result<Vec<OptimisticEdit>, SyncError> {
        let edits = {
            let mut ledger = self.inner.ledger.lock();
            let baselines: Vec<Baseline> = targets
                .iter()
                .map(|target| self.baseline(&ledger, target))
                .collect();
            ledger.begin(targets, &baselines, acting_user)?
        };

        for edit in &edits {
            tracing::debug!(
                toggle = %edit.target,
                edit = %edit.id,
                kind = ?edit.kind,
                user = %edit.acting_user,
                "optimistic edit applied"
            );
            self.notify_edited(&edit.target);
        }
        Ok(edits)
    }

    /// Absorb the remote write result for edit `id`.
    pub(crate) fn resolve_write(&self, target: &ToggleTarget, id: EditId, ok: bool) -> WriteResolution {
        let resolution = self.inner.ledger.lock().resolve_write(target, id, ok);
        tracing::debug!(toggle = %target, edit = %id, ?resolution, "remote write resolved");
        if resolution == WriteResolution::RolledBack {
            self.notify_edited(target);
        }
        resolution
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn delivery_lock(&self, key: &ResourceKey) -> Option<DeliveryLock> {
        self.inner
            .slots
            .read()
            .get(key)
            .map(|slot| slot.delivery.clone())
    }

    fn baseline(&self, ledger: &EditLedger, target: &ToggleTarget) -> Baseline {
        let slots = self.inner.slots.read();
        let latest = slots
            .iter()
            .filter(|(key, _)| key.kind() == target.record.kind)
            .filter_map(|(_, slot)| {
                let snapshot = slot.snapshot.as_ref()?;
                let record = snapshot.record(&target.record.id)?;
                Some((record.version(), slot.arrival, record))
            })
            .max_by_key(|(version, arrival, _)| (*version, *arrival))
            .map(|(_, _, record)| record.clone());

        let observed = latest.as_ref().is_some_and(|record| target.observed_in(record));
        Baseline {
            effective: ledger.overlay(target).unwrap_or(observed),
            base_version: latest.and_then(|record| record.version()),
        }
    }

    fn notify_edited(&self, target: &ToggleTarget) {
        let affected: Vec<(DeliveryLock, Vec<Listener>)> = self
            .inner
            .slots
            .read()
            .iter()
            .filter(|(key, slot)| {
                key.kind() == target.record.kind
                    && !slot.listeners.is_empty()
                    && slot
                        .snapshot
                        .as_ref()
                        .is_some_and(|snapshot| snapshot.contains(&target.record.id))
            })
            .map(|(_, slot)| (slot.delivery.clone(), slot.listeners()))
            .collect();

        let event = StoreEvent::Edited(target.clone());
        for (delivery, listeners) in affected {
            let _delivering = delivery.lock();
            for listener in listeners {
                listener(&event);
            }
        }
    }
}

fn overlay_record(ledger: &EditLedger, key: &ResourceKey, record: &Record) -> Record {
    let address = RecordRef::new(key.kind(), record.id().clone());
    let mut effective = record.clone();
    for (target, desired) in ledger.overlays_for(&address) {
        target.operation(desired).apply(&mut effective);
    }
    effective
}
