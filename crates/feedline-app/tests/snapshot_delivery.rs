//! Snapshot replacement and per-key delivery order.

mod common;

use std::sync::Arc;

use common::settle;
use feedline_app::{LocalStore, StoreEvent, SubscriptionRegistry};
use feedline_core::{fields, Record, ResourceKey, Snapshot, SnapshotVersion};
use feedline_testkit::{seeded_world, MemoryRemoteStore};
use parking_lot::Mutex;
use proptest::collection::vec;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn snapshot(version: u64, likes: &[String]) -> Snapshot {
    Snapshot::new(
        ResourceKey::post("p1"),
        SnapshotVersion(version),
        vec![Record::new("p1").with_members(fields::LIKES, likes.iter().cloned())],
    )
}

proptest! {
    #[test]
    fn get_always_equals_the_last_delivered_snapshot(
        pushes in vec(vec("u[1-4]", 0..4), 1..10)
    ) {
        runtime().block_on(async {
            let remote = seeded_world();
            let store = LocalStore::new();
            let registry = SubscriptionRegistry::new(Arc::new(remote.clone()), store.clone());
            let key = ResourceKey::post("p1");
            let _handle = registry.attach(key.clone()).await.unwrap();
            settle().await;

            for (i, likes) in pushes.iter().enumerate() {
                let pushed = snapshot(100 + i as u64, likes);
                remote.push_snapshot(pushed.clone());
                settle().await;
                let current = store.get(&key).unwrap();
                assert_eq!(*current, pushed, "cache must be replaced, never merged");
            }
        });
    }
}

#[tokio::test]
async fn listeners_observe_pushes_in_arrival_order() {
    let remote = MemoryRemoteStore::new();
    let store = LocalStore::new();
    let registry = SubscriptionRegistry::new(Arc::new(remote.clone()), store.clone());
    let key = ResourceKey::post("p1");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.subscribe_to_changes(&key, move |event| {
        if let StoreEvent::Snapshot(snapshot) = event {
            sink.lock().push(snapshot.version().0);
        }
    });

    let _handle = registry.attach(key.clone()).await.unwrap();
    for version in 10..30 {
        remote.push_snapshot(snapshot(version, &[]));
    }
    settle().await;

    let seen = seen.lock().clone();
    assert_eq!(seen.first(), Some(&1), "initial result comes first");
    assert_eq!(&seen[1..], (10..30).collect::<Vec<_>>().as_slice());
}

#[tokio::test]
async fn listeners_may_detach_from_inside_a_delivery() {
    let remote = seeded_world();
    let store = LocalStore::new();
    let registry = SubscriptionRegistry::new(Arc::new(remote.clone()), store.clone());
    let key = ResourceKey::post("p1");

    let handle = Arc::new(Mutex::new(Some(registry.attach(key.clone()).await.unwrap())));
    let slot = handle.clone();
    let deliveries = Arc::new(Mutex::new(0));
    let count = deliveries.clone();
    store.subscribe_to_changes(&key, move |event| {
        if matches!(event, StoreEvent::Snapshot(_)) {
            *count.lock() += 1;
            slot.lock().take();
        }
    });

    settle().await;
    remote.push_snapshot(snapshot(50, &[]));
    settle().await;

    assert_eq!(*deliveries.lock(), 1, "no push after the handle was dropped");
    assert!(handle.lock().is_none());
    assert_eq!(remote.open_channel_count(), 0);
}
