//! In-memory authoritative remote store
//!
//! Keeps one collection per [`ResourceKind`], evaluates subscription
//! predicates itself and pushes a fresh full snapshot to every live
//! subscriber of a kind whenever a record of that kind changes. Every change
//! bumps the record's version.
//!
//! Failure and timing are scriptable: refuse subscriptions, delay them, fail
//! or stall mutations, break a channel, or push a hand-made snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedline_core::{
    ChannelError, MutationOp, Record, RecordId, RecordRef, RemoteError, RemoteStoreEffects,
    ResourceKey, ResourceKind, Snapshot, SnapshotChannel, SnapshotVersion,
};
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;

type PushSender = mpsc::UnboundedSender<Result<Snapshot, ChannelError>>;

struct Subscriber {
    key: ResourceKey,
    version: u64,
    sender: PushSender,
}

impl Subscriber {
    fn push(&mut self, records: Vec<Record>) -> bool {
        self.version += 1;
        let snapshot = Snapshot::new(self.key.clone(), SnapshotVersion(self.version), records);
        self.sender.unbounded_send(Ok(snapshot)).is_ok()
    }
}

#[derive(Default)]
struct RemoteState {
    collections: HashMap<ResourceKind, BTreeMap<RecordId, Record>>,
    subscribers: Vec<Subscriber>,
    next_record_version: u64,
    failing_mutations: usize,
    refuse_subscriptions: Option<String>,
    subscribe_latency: Duration,
    channels_opened: usize,
    mutations: Vec<(RecordRef, MutationOp)>,
}

impl RemoteState {
    fn query(&self, key: &ResourceKey) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .collections
            .get(&key.kind())
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|record| key.predicate().matches(record))
            .cloned()
            .collect();
        key.predicate().sort(&mut records);
        records
    }

    fn store(&mut self, kind: ResourceKind, mut record: Record) {
        self.next_record_version += 1;
        record.set_version(Some(self.next_record_version));
        self.collections
            .entry(kind)
            .or_default()
            .insert(record.id().clone(), record);
        self.publish(kind);
    }

    fn publish(&mut self, kind: ResourceKind) {
        let mut subscribers = std::mem::take(&mut self.subscribers);
        subscribers.retain_mut(|subscriber| {
            if subscriber.key.kind() != kind {
                return !subscriber.sender.is_closed();
            }
            let records = self.query(&subscriber.key);
            subscriber.push(records)
        });
        self.subscribers = subscribers;
    }
}

/// Shared, cloneable in-memory remote store.
#[derive(Clone)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<RemoteState>>,
    channels_closed: Arc<AtomicUsize>,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("open_channels", &self.open_channel_count())
            .finish_non_exhaustive()
    }
}

impl MemoryRemoteStore {
    /// An empty store.
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(RemoteState::default())),
            channels_closed: Arc::new(AtomicUsize::new(0)),
            paused: Arc::new(paused),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Data
    // ─────────────────────────────────────────────────────────────────────

    /// Insert or replace a record and push to subscribers of its kind.
    pub fn upsert(&self, kind: ResourceKind, record: Record) {
        self.state.lock().store(kind, record);
    }

    /// Builder form of [`upsert`](Self::upsert).
    #[must_use]
    pub fn with_record(self, kind: ResourceKind, record: Record) -> Self {
        self.upsert(kind, record);
        self
    }

    /// Delete a record and push to subscribers of its kind.
    pub fn remove(&self, kind: ResourceKind, id: &RecordId) -> bool {
        let mut state = self.state.lock();
        let removed = state
            .collections
            .get_mut(&kind)
            .and_then(|records| records.remove(id))
            .is_some();
        if removed {
            state.publish(kind);
        }
        removed
    }

    /// Current authoritative value of a record.
    pub fn record(&self, kind: ResourceKind, id: &RecordId) -> Option<Record> {
        self.state
            .lock()
            .collections
            .get(&kind)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// All records of a kind.
    pub fn records(&self, kind: ResourceKind) -> Vec<Record> {
        self.state
            .lock()
            .collections
            .get(&kind)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every mutation received, accepted or not, in arrival order.
    pub fn mutations(&self) -> Vec<(RecordRef, MutationOp)> {
        self.state.lock().mutations.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────────────

    /// Push a hand-made snapshot to every subscriber of its key.
    pub fn push_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.state.lock();
        state.subscribers.retain(|subscriber| {
            if &subscriber.key != snapshot.key() {
                return true;
            }
            subscriber.sender.unbounded_send(Ok(snapshot.clone())).is_ok()
        });
    }

    /// Push the current result again to every subscriber of `key`.
    pub fn redeliver(&self, key: &ResourceKey) {
        let mut state = self.state.lock();
        let records = state.query(key);
        for subscriber in state.subscribers.iter_mut().filter(|s| &s.key == key) {
            subscriber.push(records.clone());
        }
    }

    /// Break every channel of `key` with a transport error.
    pub fn fail_channel(&self, key: &ResourceKey, reason: &str) {
        let mut state = self.state.lock();
        state.subscribers.retain(|subscriber| {
            if &subscriber.key != key {
                return true;
            }
            let _ = subscriber
                .sender
                .unbounded_send(Err(ChannelError::new(key.clone(), reason)));
            false
        });
    }

    /// Refuse new subscriptions with `reason`, or accept them again.
    pub fn refuse_subscriptions(&self, reason: Option<&str>) {
        self.state.lock().refuse_subscriptions = reason.map(str::to_string);
    }

    /// Delay every subscribe call.
    pub fn set_subscribe_latency(&self, latency: Duration) {
        self.state.lock().subscribe_latency = latency;
    }

    /// Number of subscribe calls that returned a channel.
    pub fn channels_opened(&self) -> usize {
        self.state.lock().channels_opened
    }

    /// Number of channels the client dropped or that were broken.
    pub fn channels_closed(&self) -> usize {
        self.channels_closed.load(Ordering::Acquire)
    }

    /// Channels currently held by the client.
    pub fn open_channel_count(&self) -> usize {
        self.channels_opened()
            .saturating_sub(self.channels_closed())
    }

    /// Live channels for one key.
    pub fn subscriber_count(&self, key: &ResourceKey) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|subscriber| &subscriber.key == key && !subscriber.sender.is_closed())
            .count()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Fail the next `count` mutations with `Unavailable`.
    pub fn fail_next_mutations(&self, count: usize) {
        self.state.lock().failing_mutations = count;
    }

    /// Hold every mutation until [`resume_mutations`](Self::resume_mutations).
    pub fn pause_mutations(&self) {
        self.paused.send_replace(true);
    }

    /// Release held mutations.
    pub fn resume_mutations(&self) {
        self.paused.send_replace(false);
    }

    async fn wait_until_resumed(&self) {
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|paused| !*paused).await;
    }
}

/// Counts a channel as closed when the client drops its stream.
struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl RemoteStoreEffects for MemoryRemoteStore {
    async fn subscribe(&self, key: &ResourceKey) -> Result<SnapshotChannel, ChannelError> {
        let latency = self.state.lock().subscribe_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if let Some(reason) = &state.refuse_subscriptions {
            return Err(ChannelError::new(key.clone(), reason.clone()));
        }

        let (sender, receiver) = mpsc::unbounded();
        let mut subscriber = Subscriber {
            key: key.clone(),
            version: 0,
            sender,
        };
        subscriber.push(state.query(key));
        state.subscribers.push(subscriber);
        state.channels_opened += 1;
        tracing::trace!(key = %key, "memory store channel opened");

        let guard = CloseGuard(self.channels_closed.clone());
        let stream = receiver.map(move |push| {
            let _open = &guard;
            push
        });
        Ok(SnapshotChannel::new(key.clone(), stream.boxed()))
    }

    async fn mutate(&self, target: &RecordRef, op: &MutationOp) -> Result<(), RemoteError> {
        self.wait_until_resumed().await;

        let mut state = self.state.lock();
        state.mutations.push((target.clone(), op.clone()));
        if state.failing_mutations > 0 {
            state.failing_mutations -= 1;
            return Err(RemoteError::Unavailable("injected failure".into()));
        }

        let Some(mut record) = state
            .collections
            .get(&target.kind)
            .and_then(|records| records.get(&target.id))
            .cloned()
        else {
            return Err(RemoteError::Rejected(format!("no document {target}")));
        };
        if op.apply(&mut record) {
            state.store(target.kind, record);
        }
        Ok(())
    }

    async fn insert(&self, kind: ResourceKind, record: Record) -> Result<RecordId, RemoteError> {
        self.wait_until_resumed().await;

        let mut state = self.state.lock();
        if state.failing_mutations > 0 {
            state.failing_mutations -= 1;
            return Err(RemoteError::Unavailable("injected failure".into()));
        }

        let id = RecordId::new(uuid::Uuid::new_v4().simple().to_string());
        let mut stored = Record::new(id.clone());
        for (field, value) in record.fields() {
            stored.set_field(field.clone(), value.clone());
        }
        state.store(kind, stored);
        Ok(id)
    }
}
