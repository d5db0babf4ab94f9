//! Subscription Registry
//!
//! Deduplicates live subscriptions by [`ResourceKey`] and reference-counts
//! their consumers. Between the first attach and the last detach of a key
//! exactly one channel is open for it.
//!
//! ## Lifecycle of one key
//!
//! 1. `attach` registers the consumer under the map lock, then takes the
//!    entry's single-entry opening lock. The first consumer through the lock
//!    opens the channel and spawns its pump task; later ones find it open.
//! 2. The pump forwards every push into the [`LocalStore`] under the key's
//!    current generation.
//! 3. Dropping the last [`SubscriptionHandle`] removes the entry, closes the
//!    store slot (waiting for a running delivery) and signals the pump to
//!    drop the channel.
//! 4. A transport error or end of stream removes the entry as well and
//!    reports a [`ChannelError`] to the key's listeners. Existing handles are
//!    closed; consumers re-attach if they want to.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use feedline_core::{ChannelError, RemoteStoreEffects, ResourceKey, Snapshot, SnapshotChannel};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::store::LocalStore;

/// Opening progress of one channel.
#[derive(Debug)]
enum OpenState {
    NotStarted,
    Open,
    Failed(ChannelError),
}

struct ChannelEntry {
    generation: u64,
    /// Only modified under the registry's map lock
    ref_count: AtomicUsize,
    opening: async_lock::Mutex<OpenState>,
    shutdown: watch::Sender<bool>,
}

impl ChannelEntry {
    fn new(generation: u64) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            generation,
            ref_count: AtomicUsize::new(0),
            opening: async_lock::Mutex::new(OpenState::NotStarted),
            shutdown,
        }
    }
}

struct RegistryInner {
    remote: Arc<dyn RemoteStoreEffects>,
    store: LocalStore,
    entries: Mutex<HashMap<ResourceKey, Arc<ChannelEntry>>>,
    next_generation: AtomicU64,
    next_handle: AtomicU64,
    open_channels: Arc<AtomicUsize>,
}

impl RegistryInner {
    fn release(&self, key: &ResourceKey, generation: u64) {
        let closed = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if entry.generation == generation => {
                    if entry.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                        entries.remove(key)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(entry) = closed {
            self.store.close_slot(key, generation);
            let _ = entry.shutdown.send(true);
            tracing::debug!(key = %key, generation, "last consumer detached, closing channel");
        }
    }

    /// Forget a failed channel and tell its consumers.
    fn fail_entry(&self, key: &ResourceKey, generation: u64, error: ChannelError) {
        {
            let mut entries = self.entries.lock();
            if entries
                .get(key)
                .is_some_and(|entry| entry.generation == generation)
            {
                entries.remove(key);
            }
        }
        self.store.fail(key, generation, error);
    }

    fn is_live(&self, key: &ResourceKey, generation: u64) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
    }
}

/// Owner of every live subscription.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &self.inner.entries.lock().len())
            .field("open_channels", &self.open_channel_count())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create a registry delivering into `store`.
    pub fn new(remote: Arc<dyn RemoteStoreEffects>, store: LocalStore) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                remote,
                store,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                next_handle: AtomicU64::new(1),
                open_channels: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// The store this registry delivers into.
    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    /// Register a consumer of `key`, opening its channel if none is open.
    ///
    /// Concurrent attaches for one key share a single channel. The handle's
    /// [`snapshot`](SubscriptionHandle::snapshot) is available immediately
    /// when the key was already live.
    pub async fn attach(&self, key: ResourceKey) -> Result<SubscriptionHandle, ChannelError> {
        let entry = {
            let mut entries = self.inner.entries.lock();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    Arc::new(ChannelEntry::new(generation))
                })
                .clone();
            entry.ref_count.fetch_add(1, Ordering::AcqRel);
            entry
        };

        // Created before the first await so a cancelled attach still releases.
        let handle = SubscriptionHandle {
            id: self.inner.next_handle.fetch_add(1, Ordering::Relaxed),
            key: key.clone(),
            generation: entry.generation,
            registry: Arc::downgrade(&self.inner),
            store: self.inner.store.clone(),
        };

        let mut state = entry.opening.lock().await;
        if let OpenState::Failed(error) = &*state {
            return Err(error.clone());
        }
        if matches!(*state, OpenState::Open) {
            tracing::trace!(key = %key, handle = handle.id, "attached to live channel");
            return Ok(handle);
        }

        self.inner.store.open_slot(&key, entry.generation);
        match self.inner.remote.subscribe(&key).await {
            Ok(channel) => {
                self.inner.open_channels.fetch_add(1, Ordering::AcqRel);
                self.spawn_pump(channel, &entry);
                *state = OpenState::Open;
                tracing::debug!(key = %key, generation = entry.generation, "channel opened");
            }
            Err(error) => {
                *state = OpenState::Failed(error.clone());
                drop(state);
                self.inner.fail_entry(&key, entry.generation, error.clone());
                return Err(error);
            }
        }
        Ok(handle)
    }

    /// Release a consumer. Equivalent to dropping the handle.
    pub fn detach(&self, handle: SubscriptionHandle) {
        drop(handle);
    }

    /// Number of channels currently open against the remote store.
    pub fn open_channel_count(&self) -> usize {
        self.inner.open_channels.load(Ordering::Acquire)
    }

    /// Number of consumers attached to `key`.
    pub fn ref_count(&self, key: &ResourceKey) -> usize {
        self.inner
            .entries
            .lock()
            .get(key)
            .map_or(0, |entry| entry.ref_count.load(Ordering::Acquire))
    }

    /// Keys with at least one consumer.
    pub fn attached_keys(&self) -> Vec<ResourceKey> {
        self.inner.entries.lock().keys().cloned().collect()
    }

    fn spawn_pump(&self, mut channel: SnapshotChannel, entry: &ChannelEntry) {
        let key = channel.key().clone();
        let generation = entry.generation;
        let mut shutdown = entry.shutdown.subscribe();
        let registry = Arc::downgrade(&self.inner);
        let store = self.inner.store.clone();
        let open_channels = self.inner.open_channels.clone();

        tokio::spawn(async move {
            let failure = loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break None,
                    push = channel.next() => match push {
                        Some(Ok(snapshot)) => deliver(&store, &key, generation, snapshot),
                        Some(Err(error)) => break Some(error),
                        None => break Some(ChannelError::new(key.clone(), "stream ended")),
                    },
                }
            };
            drop(channel);
            open_channels.fetch_sub(1, Ordering::AcqRel);

            match (failure, registry.upgrade()) {
                (Some(error), Some(registry)) => registry.fail_entry(&key, generation, error),
                (Some(error), None) => {
                    tracing::debug!(key = %key, reason = %error.reason, "channel failed after shutdown");
                }
                (None, _) => tracing::trace!(key = %key, generation, "channel pump stopped"),
            }
        });
    }
}

fn deliver(store: &LocalStore, key: &ResourceKey, generation: u64, snapshot: Snapshot) {
    if snapshot.key() != key {
        tracing::warn!(key = %key, pushed = %snapshot.key(), "ignoring push for another key");
        return;
    }
    store.apply_snapshot(generation, snapshot);
}

/// One consumer's claim on a live key.
///
/// Dropping the handle detaches it; the channel closes with the last handle.
pub struct SubscriptionHandle {
    id: u64,
    key: ResourceKey,
    generation: u64,
    registry: Weak<RegistryInner>,
    store: LocalStore,
}

impl SubscriptionHandle {
    /// The key this handle is attached to.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The last snapshot delivered for the key.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.store.get(&self.key)
    }

    /// Whether the channel behind this handle has failed or been closed.
    pub fn is_closed(&self) -> bool {
        self.registry
            .upgrade()
            .map_or(true, |registry| !registry.is_live(&self.key, self.generation))
    }

    /// The failure that closed this handle's channel, if any.
    pub fn failure(&self) -> Option<ChannelError> {
        self.store.failure(&self.key)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &self.key.to_string())
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.key, self.generation);
        }
    }
}
