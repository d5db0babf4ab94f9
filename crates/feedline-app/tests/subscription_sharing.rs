//! Channel deduplication and failure surfacing against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{client, settle};
use feedline_app::{LocalStore, ResourceState, StoreEvent, SubscriptionRegistry};
use feedline_core::{RecordId, ResourceKey, ResourceKind};
use feedline_testkit::{post, seeded_world, MemoryRemoteStore};
use futures::future::join_all;
use parking_lot::Mutex;

fn registry(remote: &MemoryRemoteStore) -> SubscriptionRegistry {
    SubscriptionRegistry::new(Arc::new(remote.clone()), LocalStore::new())
}

#[tokio::test(start_paused = true)]
async fn concurrent_attaches_open_one_channel_and_close_it_once() {
    let remote = seeded_world();
    remote.set_subscribe_latency(Duration::from_millis(50));
    let registry = registry(&remote);
    let key = ResourceKey::home_feed();

    let mut handles: Vec<_> = join_all((0..8).map(|_| registry.attach(key.clone())))
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(remote.channels_opened(), 1, "eight consumers must share one channel");
    assert_eq!(registry.open_channel_count(), 1);
    assert_eq!(registry.ref_count(&key), 8);

    let second_half = handles.split_off(4);
    drop(handles);
    settle().await;
    assert_eq!(remote.channels_closed(), 0, "channel must outlive partial detach");

    drop(second_half);
    settle().await;
    assert_eq!(remote.channels_closed(), 1);
    assert_eq!(remote.open_channel_count(), 0);
    assert_eq!(registry.open_channel_count(), 0);
}

#[tokio::test]
async fn late_attach_sees_current_snapshot_immediately() {
    let remote = seeded_world();
    let registry = registry(&remote);
    let key = ResourceKey::home_feed();

    let _first = registry.attach(key.clone()).await.unwrap();
    settle().await;

    let second = registry.attach(key.clone()).await.unwrap();
    let snapshot = second.snapshot().expect("snapshot of a live key");
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.records()[0].id(), &RecordId::new("p1"), "newest first");
}

#[tokio::test]
async fn reattach_after_full_detach_opens_a_new_channel() {
    let remote = seeded_world();
    let registry = registry(&remote);
    let key = ResourceKey::post("p1");

    drop(registry.attach(key.clone()).await.unwrap());
    settle().await;
    let _again = registry.attach(key.clone()).await.unwrap();
    settle().await;

    assert_eq!(remote.channels_opened(), 2);
    assert_eq!(remote.channels_closed(), 1);
    assert_eq!(remote.subscriber_count(&key), 1);
}

#[tokio::test]
async fn transport_error_reaches_every_consumer_without_retry() {
    let remote = seeded_world();
    let client = client(&remote);
    let key = ResourceKey::post("p1");
    let a = client.attach(key.clone()).await.unwrap();
    let b = client.attach(key.clone()).await.unwrap();
    settle().await;

    let failures = Arc::new(Mutex::new(0));
    let sink = failures.clone();
    client.store().subscribe_to_changes(&key, move |event| {
        if matches!(event, StoreEvent::Failed(_)) {
            *sink.lock() += 1;
        }
    });

    remote.fail_channel(&key, "connection reset");
    settle().await;

    assert!(a.is_closed() && b.is_closed());
    assert_eq!(*failures.lock(), 1);
    assert!(matches!(client.use_resource(&key), ResourceState::Failed(e) if e.reason == "connection reset"));
    assert_eq!(remote.channels_opened(), 1, "registry must not retry on its own");

    let _retry = client.attach(key.clone()).await.unwrap();
    settle().await;
    assert!(matches!(client.use_resource(&key), ResourceState::Ready(_)));
}

#[tokio::test]
async fn refused_subscription_is_an_error_for_the_caller() {
    let remote = seeded_world();
    remote.refuse_subscriptions(Some("permission denied"));
    let client = client(&remote);

    let err = client.attach(ResourceKey::home_feed()).await.unwrap_err();
    assert_eq!(err.category(), feedline_core::ErrorCategory::Network);
    assert!(matches!(
        client.use_resource(&ResourceKey::home_feed()),
        ResourceState::Failed(_)
    ));
}

#[tokio::test]
async fn deleted_document_is_not_found() {
    let remote = seeded_world();
    let client = client(&remote);
    let key = ResourceKey::post("p1");
    let _handle = client.attach(key.clone()).await.unwrap();
    settle().await;
    assert!(matches!(client.use_resource(&key), ResourceState::Ready(_)));

    remote.remove(ResourceKind::Post, &RecordId::new("p1"));
    settle().await;
    assert!(matches!(client.use_resource(&key), ResourceState::NotFound));

    remote.upsert(ResourceKind::Post, post("p1", "bo", 3_000, &[]));
    settle().await;
    assert!(matches!(client.use_resource(&key), ResourceState::Ready(_)));
}

#[tokio::test]
async fn unknown_document_is_not_found_rather_than_an_error() {
    let remote = seeded_world();
    let client = client(&remote);
    let key = ResourceKey::post("missing");
    let _handle = client.attach(key.clone()).await.unwrap();

    assert!(matches!(client.use_resource(&key), ResourceState::Loading));
    settle().await;
    assert!(matches!(client.use_resource(&key), ResourceState::NotFound));
}
