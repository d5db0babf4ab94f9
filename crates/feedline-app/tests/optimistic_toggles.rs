//! Optimistic toggles end to end: flip, confirm, roll back, compensate.

mod common;

use std::sync::Arc;

use common::{client, client_as, settle};
use feedline_app::{EditStatus, StoreEvent, ToggleOutcome, ToggleTarget};
use feedline_core::{
    fields, RecordId, RemoteError, ResourceKey, ResourceKind, Session, Snapshot,
    SnapshotVersion, SyncError, UserId,
};
use feedline_testkit::{post, profile, seeded_world, StaticSession};
use parking_lot::Mutex;

fn p1() -> RecordId {
    RecordId::new("p1")
}

fn u1() -> UserId {
    UserId::new("u1")
}

fn likes_p1(client: &feedline_app::FeedClient) -> bool {
    client
        .store()
        .is_member(&ResourceKey::post("p1"), &p1(), fields::LIKES, "u1")
}

#[tokio::test]
async fn like_is_visible_immediately_and_confirmed_by_the_next_snapshot() {
    let remote = seeded_world();
    let client = client(&remote);
    let key = ResourceKey::post("p1");
    let _handle = client.attach(key.clone()).await.unwrap();
    settle().await;
    assert!(!likes_p1(&client));

    remote.pause_mutations();
    let pending = client.toggle_like(&p1()).unwrap();
    assert!(likes_p1(&client), "flip must be visible without awaiting");
    assert_eq!(client.store().edit_status(&ToggleTarget::like(&p1(), &u1())), Some(EditStatus::Pending));

    // The server state catches up before the write call returns.
    let base = remote.record(ResourceKind::Post, &p1()).unwrap().version().unwrap();
    remote.push_snapshot(Snapshot::new(
        key.clone(),
        SnapshotVersion(99),
        vec![post("p1", "bo", 2_000, &["u1"]).with_version(base + 1)],
    ));
    settle().await;
    assert_eq!(
        client.store().edit_status(&ToggleTarget::like(&p1(), &u1())),
        Some(EditStatus::Confirmed)
    );
    assert!(likes_p1(&client));

    remote.resume_mutations();
    assert_eq!(pending.outcome().await.unwrap(), ToggleOutcome::Confirmed);
    settle().await;
    assert!(likes_p1(&client));
    assert!(remote
        .record(ResourceKind::Post, &p1())
        .unwrap()
        .has_member(fields::LIKES, "u1"));
    assert_eq!(client.store().pending_edit_count(), 0);
}

#[tokio::test]
async fn unrelated_change_to_the_post_does_not_flicker_a_pending_like() {
    let remote = seeded_world();
    let client = client(&remote);
    let key = ResourceKey::post("p1");
    let _handle = client.attach(key.clone()).await.unwrap();
    settle().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reader = client.store().clone();
    client.store().subscribe_to_changes(&key, move |_| {
        sink.lock()
            .push(reader.is_member(&ResourceKey::post("p1"), &RecordId::new("p1"), fields::LIKES, "u1"));
    });

    remote.pause_mutations();
    let pending = client.toggle_like(&p1()).unwrap();

    // Someone comments before the like reaches the server.
    let base = remote.record(ResourceKind::Post, &p1()).unwrap().version().unwrap();
    remote.push_snapshot(Snapshot::new(
        key.clone(),
        SnapshotVersion(99),
        vec![post("p1", "bo", 2_000, &[])
            .with_field(fields::COMMENT_COUNT, 1_i64)
            .with_version(base + 1)],
    ));
    settle().await;
    assert!(likes_p1(&client));
    assert_eq!(
        client.store().edit_status(&ToggleTarget::like(&p1(), &u1())),
        Some(EditStatus::Pending)
    );

    remote.resume_mutations();
    assert_eq!(pending.outcome().await.unwrap(), ToggleOutcome::Confirmed);
    settle().await;
    assert!(likes_p1(&client));
    assert!(seen.lock().iter().all(|liked| *liked), "membership never dropped back");
}

#[tokio::test]
async fn failed_like_reverts_and_only_the_caller_hears_about_it() {
    let remote = seeded_world();
    let client = client(&remote);
    let key = ResourceKey::post("p1");
    let _handle = client.attach(key.clone()).await.unwrap();
    settle().await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client.store().subscribe_to_changes(&key, move |event| {
        sink.lock().push(match event {
            StoreEvent::Snapshot(_) => "snapshot",
            StoreEvent::Edited(_) => "edited",
            StoreEvent::Failed(_) => "failed",
        });
    });

    remote.fail_next_mutations(1);
    let pending = client.toggle_like(&p1()).unwrap();
    assert!(likes_p1(&client));

    let err = pending.outcome().await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::MutationFailed { source: RemoteError::Unavailable(_), .. }
    ));
    assert!(!likes_p1(&client), "rollback restores the pre-toggle value");
    assert_eq!(*events.lock(), vec!["edited", "edited"], "listeners see the flip and the revert, no error");
}

#[tokio::test]
async fn double_toggle_is_refused_and_the_first_flip_lands_once() {
    let remote = seeded_world();
    let client = client(&remote);
    let _handle = client.attach(ResourceKey::post("p1")).await.unwrap();
    settle().await;

    remote.pause_mutations();
    let first = client.toggle_like(&p1()).unwrap();
    let second = client.toggle_like(&p1()).unwrap_err();
    assert!(matches!(second, SyncError::MutationInFlight { .. }));
    assert_eq!(second.category().label(), "Busy");

    remote.resume_mutations();
    first.outcome().await.unwrap();
    settle().await;

    assert_eq!(remote.mutations().len(), 1);
    assert!(likes_p1(&client));
    assert!(client.has_liked(&p1()).unwrap());
}

#[tokio::test]
async fn rollback_restores_the_pre_toggle_membership_either_way() {
    for liked_before in [false, true] {
        let remote = seeded_world();
        let likes: &[&str] = if liked_before { &["u1"] } else { &[] };
        remote.upsert(ResourceKind::Post, post("p1", "bo", 2_000, likes));
        let client = client(&remote);
        let _handle = client.attach(ResourceKey::post("p1")).await.unwrap();
        settle().await;
        assert_eq!(likes_p1(&client), liked_before);

        remote.fail_next_mutations(1);
        let pending = client.toggle_like(&p1()).unwrap();
        assert_eq!(pending.optimistic_value(), !liked_before);
        assert!(pending.outcome().await.is_err());
        assert_eq!(likes_p1(&client), liked_before);
    }
}

#[tokio::test]
async fn toggling_without_a_session_is_refused() {
    let remote = seeded_world();
    let client = client_as(&remote, StaticSession::signed_out());

    assert!(matches!(
        client.toggle_like(&p1()).unwrap_err(),
        SyncError::SessionUnavailable
    ));
    assert!(remote.mutations().is_empty());
}

#[tokio::test]
async fn save_toggles_the_users_own_profile() {
    let remote = seeded_world();
    let client = client(&remote);
    let _profile = client.attach(ResourceKey::user_profile(&u1())).await.unwrap();
    settle().await;

    client.toggle_save(&p1()).unwrap().outcome().await.unwrap();
    settle().await;

    assert!(client.has_saved(&p1()).unwrap());
    let me = remote
        .record(ResourceKind::UserProfile, &u1().profile_record())
        .unwrap();
    assert!(me.has_member(fields::SAVED_POSTS, "p1"));
}

#[tokio::test]
async fn follow_updates_both_profiles() {
    let remote = seeded_world();
    let client = client(&remote);
    let bo = UserId::new("u2");
    let _followers = client.attach(ResourceKey::followers_of(&bo)).await.unwrap();
    let _theirs = client.attach(ResourceKey::user_profile(&bo)).await.unwrap();
    settle().await;

    let pending = client.toggle_follow(&bo).unwrap();
    assert!(client.follows(&bo).unwrap());
    assert_eq!(pending.edits().len(), 2);
    pending.outcome().await.unwrap();
    settle().await;

    let them = remote.record(ResourceKind::UserProfile, &bo.profile_record()).unwrap();
    let me = remote.record(ResourceKind::UserProfile, &u1().profile_record()).unwrap();
    assert!(them.has_member(fields::FOLLOWERS, "u1"));
    assert!(me.has_member(fields::FOLLOWING, "u2"));

    let followers = client.store().get(&ResourceKey::followers_of(&bo)).unwrap();
    assert_eq!(followers.len(), 1, "ana now appears among bo's followers");
}

#[tokio::test]
async fn follow_half_failure_is_compensated() {
    let remote = seeded_world();
    // bo's profile exists, ana's does not: the second write is rejected.
    remote.remove(ResourceKind::UserProfile, &u1().profile_record());
    remote.upsert(ResourceKind::UserProfile, profile("u2", "bo", &[], &[]));
    let client = client(&remote);
    let bo = UserId::new("u2");

    let err = client.toggle_follow(&bo).unwrap().outcome().await.unwrap_err();
    assert!(matches!(err, SyncError::MutationFailed { source: RemoteError::Rejected(_), .. }));

    let them = remote.record(ResourceKind::UserProfile, &bo.profile_record()).unwrap();
    assert!(!them.has_member(fields::FOLLOWERS, "u1"), "first half undone");
    assert!(!client.follows(&bo).unwrap());
    assert_eq!(client.store().pending_edit_count(), 0);
}

#[tokio::test]
async fn comment_is_inserted_and_counted() {
    let remote = seeded_world();
    let client = client(&remote);
    let comments = ResourceKey::comments_for(&p1());
    let _comments = client.attach(comments.clone()).await.unwrap();
    settle().await;
    assert!(client.store().get(&comments).unwrap().is_empty());

    let id = client.post_comment(&p1(), "  great shot  ").await.unwrap();
    settle().await;

    let listed = client.store().get(&comments).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed.records()[0].id(), &id);
    assert_eq!(listed.records()[0].text(fields::TEXT), Some("great shot"));
    assert_eq!(
        remote.record(ResourceKind::Post, &p1()).unwrap().counter(fields::COMMENT_COUNT),
        1
    );

    assert!(matches!(
        client.post_comment(&p1(), "").await.unwrap_err(),
        SyncError::InvalidInput(_)
    ));
}

#[tokio::test]
async fn comment_carries_the_authors_avatar_when_there_is_one() {
    let remote = seeded_world();
    let session = StaticSession::signed_out();
    session.sign_in(Session::new("u1", "ana").with_image("https://img.example/ana.png"));
    let client = client_as(&remote, session);

    let with_avatar = client.post_comment(&p1(), "hello").await.unwrap();
    let comment = remote.record(ResourceKind::CommentSet, &with_avatar).unwrap();
    assert_eq!(comment.text(fields::USER_IMAGE), Some("https://img.example/ana.png"));
    assert_eq!(comment.text(fields::USERNAME), Some("ana"));

    let plain = client_as(&remote, StaticSession::signed_in("u2", "bo"))
        .post_comment(&p1(), "hi")
        .await
        .unwrap();
    let comment = remote.record(ResourceKind::CommentSet, &plain).unwrap();
    assert_eq!(comment.field(fields::USER_IMAGE), None);
}
