//! Attaches that follow another key's snapshots
//!
//! Some views only learn which keys they need from the data of another key:
//! a profile tab knows its user by username, so it reads the profile first
//! and then attaches the posts that profile liked or saved.
//!
//! A [`DerivedAttach`] holds the base key's attach plus a store listener.
//! Every base snapshot recomputes the dependent keys: keys that dropped out
//! are released at once, new keys are attached in the background. An attach
//! that finishes after its key dropped out is released on arrival.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use feedline_core::{ChannelError, ResourceKey, Snapshot};
use parking_lot::Mutex;

use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::store::{ListenerId, StoreEvent};

/// Computes dependent keys from a base snapshot.
pub type DeriveKeys = Arc<dyn Fn(&Snapshot) -> Vec<ResourceKey> + Send + Sync>;

#[derive(Default)]
struct DerivedState {
    wanted: Vec<ResourceKey>,
    attached: HashMap<ResourceKey, SubscriptionHandle>,
    in_flight: HashSet<ResourceKey>,
    closed: bool,
}

struct DerivedInner {
    registry: SubscriptionRegistry,
    base: ResourceKey,
    derive: DeriveKeys,
    state: Mutex<DerivedState>,
}

impl DerivedInner {
    /// Bring the dependent attaches in line with `snapshot`.
    ///
    /// With `replace_closed`, dependents whose channel failed are attached
    /// again as well.
    fn follow(self: &Arc<Self>, snapshot: &Snapshot, replace_closed: bool) {
        let wanted = (self.derive)(snapshot);
        let (released, to_attach) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let stale: Vec<ResourceKey> = state
                .attached
                .iter()
                .filter(|(key, handle)| !wanted.contains(key) || (replace_closed && handle.is_closed()))
                .map(|(key, _)| key.clone())
                .collect();
            let released: Vec<SubscriptionHandle> = stale
                .iter()
                .filter_map(|key| state.attached.remove(key))
                .collect();
            let to_attach: Vec<ResourceKey> = wanted
                .iter()
                .filter(|key| !state.attached.contains_key(*key) && !state.in_flight.contains(*key))
                .cloned()
                .collect();
            state.in_flight.extend(to_attach.iter().cloned());
            state.wanted = wanted;
            (released, to_attach)
        };

        if !released.is_empty() || !to_attach.is_empty() {
            tracing::debug!(
                base = %self.base,
                released = released.len(),
                attaching = to_attach.len(),
                "dependent keys changed"
            );
        }
        drop(released);
        for key in to_attach {
            self.spawn_attach(key);
        }
    }

    fn spawn_attach(self: &Arc<Self>, key: ResourceKey) {
        let registry = self.registry.clone();
        let owner = Arc::downgrade(self);
        tokio::spawn(async move {
            let result = registry.attach(key.clone()).await;
            // A gone owner drops the handle here, which detaches it.
            if let Some(owner) = owner.upgrade() {
                owner.settle(key, result);
            }
        });
    }

    fn settle(&self, key: ResourceKey, result: Result<SubscriptionHandle, ChannelError>) {
        let unwanted = {
            let mut state = self.state.lock();
            state.in_flight.remove(&key);
            match result {
                Ok(handle) if !state.closed && state.wanted.contains(&key) => {
                    state.attached.insert(key, handle);
                    None
                }
                Ok(handle) => Some(handle),
                Err(error) => {
                    tracing::warn!(base = %self.base, key = %error.key, reason = %error.reason, "dependent attach failed");
                    None
                }
            }
        };
        drop(unwanted);
    }

    fn close(&self) -> Vec<SubscriptionHandle> {
        let mut state = self.state.lock();
        state.closed = true;
        state.wanted.clear();
        state.attached.drain().map(|(_, handle)| handle).collect()
    }
}

/// A base attach plus the attaches derived from its snapshots.
///
/// Dropping it releases every attach it holds.
pub struct DerivedAttach {
    inner: Arc<DerivedInner>,
    base: SubscriptionHandle,
    listener: ListenerId,
}

impl DerivedAttach {
    /// Attach `base` and keep the keys `derive` computes from its snapshots
    /// attached.
    ///
    /// Fails only when the base key cannot be attached. Dependent attaches
    /// that fail are logged and tried again on [`retry`](Self::retry).
    pub async fn attach(
        registry: &SubscriptionRegistry,
        base: ResourceKey,
        derive: DeriveKeys,
    ) -> Result<Self, ChannelError> {
        let inner = Arc::new(DerivedInner {
            registry: registry.clone(),
            base: base.clone(),
            derive,
            state: Mutex::new(DerivedState::default()),
        });

        let store = registry.store().clone();
        let follower: Weak<DerivedInner> = Arc::downgrade(&inner);
        let listener = store.subscribe_to_changes(&base, move |event| {
            if let (StoreEvent::Snapshot(snapshot), Some(inner)) = (event, follower.upgrade()) {
                inner.follow(snapshot, false);
            }
        });

        let handle = match registry.attach(base.clone()).await {
            Ok(handle) => handle,
            Err(error) => {
                store.unsubscribe(&base, listener);
                return Err(error);
            }
        };
        // The base may already have been live with a snapshot.
        if let Some(snapshot) = store.get(&base) {
            inner.follow(&snapshot, false);
        }

        Ok(Self {
            inner,
            base: handle,
            listener,
        })
    }

    /// The base attach.
    pub fn base(&self) -> &SubscriptionHandle {
        &self.base
    }

    /// Dependent keys currently attached.
    pub fn dependent_keys(&self) -> Vec<ResourceKey> {
        self.inner.state.lock().attached.keys().cloned().collect()
    }

    /// Attach dependents that failed or whose channel closed.
    pub fn retry(&self) {
        if let Some(snapshot) = self.inner.registry.store().get(&self.inner.base) {
            self.inner.follow(&snapshot, true);
        }
    }
}

impl fmt::Debug for DerivedAttach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedAttach")
            .field("base", &self.inner.base.to_string())
            .field("dependents", &self.inner.state.lock().attached.len())
            .finish()
    }
}

impl Drop for DerivedAttach {
    fn drop(&mut self) {
        self.inner
            .registry
            .store()
            .unsubscribe(&self.inner.base, self.listener);
        drop(self.inner.close());
    }
}
