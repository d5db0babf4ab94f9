//! Optimistic Mutation Coordinator
//!
//! Runs toggle actions (like, save, follow) as an immediate local flip
//! followed by an asynchronous remote write:
//!
//! 1. The effective membership (snapshot merged with edits) is read and the
//!    flip registered as a `Pending` edit, synchronously. A target that
//!    already has a pending edit is refused with `MutationInFlight`.
//! 2. A spawned task issues the write for the new value, bounded by the
//!    configured mutation timeout.
//! 3. Success confirms the edit; it stays visible until the next snapshot of
//!    the record. Failure removes the edit, restoring the snapshot value, and
//!    reports `MutationFailed` to the caller that started the toggle.
//!
//! A follow touches two records. Both edits are registered together and the
//! writes are issued in order; when the second fails the first is undone
//! with its inverse operation.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use feedline_core::types::fields;
use feedline_core::{
    FieldValue, MutationOp, Record, RecordId, RecordRef, RemoteError, RemoteStoreEffects,
    ResourceKind, Session, SyncConfig, SyncError, UserId,
};
use tokio::sync::oneshot;

use crate::edits::{EditStatus, OptimisticEdit, ToggleTarget, WriteResolution};
use crate::store::LocalStore;

/// How a toggle settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The remote store holds the toggled value
    Confirmed,
    /// A newer toggle of the same target took over after a snapshot had
    /// settled this one; the newer toggle decides the value
    Superseded,
}

/// A toggle whose remote write is running in the background.
///
/// Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingToggle {
    edits: Vec<OptimisticEdit>,
    receiver: oneshot::Receiver<Result<ToggleOutcome, SyncError>>,
}

impl PendingToggle {
    /// The primary edit (the only one, except for follows).
    pub fn edit(&self) -> &OptimisticEdit {
        &self.edits[0]
    }

    /// Every edit registered by this toggle.
    pub fn edits(&self) -> &[OptimisticEdit] {
        &self.edits
    }

    /// The membership shown while the write is pending.
    pub fn optimistic_value(&self) -> bool {
        self.edit().desired()
    }

    /// Wait for the write to settle.
    pub async fn outcome(self) -> Result<ToggleOutcome, SyncError> {
        self.receiver
            .await
            .map_err(|_| SyncError::internal("toggle task ended without a result"))?
    }
}

/// Executes optimistic toggles and plain writes against the remote store.
#[derive(Clone)]
pub struct MutationCoordinator {
    remote: Arc<dyn RemoteStoreEffects>,
    store: LocalStore,
    timeout: Duration,
}

impl std::fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MutationCoordinator {
    /// Create a coordinator writing through `remote` and flipping in `store`.
    pub fn new(remote: Arc<dyn RemoteStoreEffects>, store: LocalStore, config: &SyncConfig) -> Self {
        Self {
            remote,
            store,
            timeout: config.mutation_timeout(),
        }
    }

    /// Flip one membership optimistically.
    ///
    /// Returns as soon as the local flip is visible. Must be called from
    /// within a Tokio runtime.
    pub fn toggle(&self, target: ToggleTarget, acting_user: &UserId) -> Result<PendingToggle, SyncError> {
        self.toggle_group(vec![target], acting_user)
    }

    /// Follow or unfollow `followed`, updating both profiles.
    pub fn toggle_follow(&self, me: &UserId, followed: &UserId) -> Result<PendingToggle, SyncError> {
        if me == followed {
            return Err(SyncError::invalid_input("users cannot follow themselves"));
        }
        self.toggle_group(
            vec![
                ToggleTarget::follower(followed, me),
                ToggleTarget::following(me, followed),
            ],
            me,
        )
    }

    fn toggle_group(
        &self,
        targets: Vec<ToggleTarget>,
        acting_user: &UserId,
    ) -> Result<PendingToggle, SyncError> {
        let edits = self.store.begin_edits(acting_user, &targets)?;
        if edits.is_empty() {
            return Err(SyncError::internal("toggle without targets"));
        }

        let (sender, receiver) = oneshot::channel();
        let write = GroupWrite {
            remote: self.remote.clone(),
            store: self.store.clone(),
            timeout: self.timeout,
            edits: edits.clone(),
        };
        tokio::spawn(async move {
            let _ = sender.send(write.run().await);
        });

        Ok(PendingToggle { edits, receiver })
    }

    /// Add a comment to a post and bump its comment counter.
    pub async fn post_comment(
        &self,
        author: &Session,
        post: &RecordId,
        text: &str,
    ) -> Result<RecordId, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::invalid_input("comment text is empty"));
        }
        let posted_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SyncError::internal(format!("clock before epoch: {e}")))?;

        // The store assigns the id on insert.
        let mut comment = Record::new("")
            .with_field(fields::POST_ID, post.as_str())
            .with_field(fields::USER_ID, author.user_id.as_str())
            .with_field(fields::USERNAME, author.username.as_str())
            .with_field(fields::TEXT, text)
            .with_field(
                fields::TIMESTAMP,
                FieldValue::Timestamp(posted_at.as_millis().try_into().unwrap_or(u64::MAX)),
            )
            .with_members(fields::LIKES, std::iter::empty::<&str>());
        if let Some(image) = &author.image {
            comment.set_field(fields::USER_IMAGE, FieldValue::Text(image.clone()));
        }

        let id = bounded(self.timeout, self.remote.insert(ResourceKind::CommentSet, comment))
            .await
            .map_err(|source| SyncError::MutationFailed {
                kind: ResourceKind::CommentSet,
                record: post.clone(),
                field: fields::POST_ID.into(),
                source,
            })?;

        let counter = RecordRef::new(ResourceKind::Post, post.clone());
        let increment = MutationOp::Increment {
            field: fields::COMMENT_COUNT.into(),
            by: 1,
        };
        bounded(self.timeout, self.remote.mutate(&counter, &increment))
            .await
            .map_err(|source| SyncError::MutationFailed {
                kind: ResourceKind::Post,
                record: post.clone(),
                field: fields::COMMENT_COUNT.into(),
                source,
            })?;

        tracing::info!(post = %post, comment = %id, "comment posted");
        Ok(id)
    }
}

/// Remote writes of one toggle, issued in order.
struct GroupWrite {
    remote: Arc<dyn RemoteStoreEffects>,
    store: LocalStore,
    timeout: Duration,
    edits: Vec<OptimisticEdit>,
}

impl GroupWrite {
    async fn run(self) -> Result<ToggleOutcome, SyncError> {
        let mut written = Vec::with_capacity(self.edits.len());
        for edit in &self.edits {
            let op = edit.target.operation(edit.desired());
            match bounded(self.timeout, self.remote.mutate(&edit.target.record, &op)).await {
                Ok(()) => written.push(op),
                Err(error) => return self.fail(edit, written, error).await,
            }
        }

        let mut outcome = ToggleOutcome::Confirmed;
        for edit in &self.edits {
            match self.store.resolve_write(&edit.target, edit.id, true) {
                WriteResolution::Confirmed | WriteResolution::Reconciled(EditStatus::Confirmed) => {}
                _ => outcome = ToggleOutcome::Superseded,
            }
        }
        Ok(outcome)
    }

    async fn fail(
        &self,
        failed: &OptimisticEdit,
        written: Vec<MutationOp>,
        error: RemoteError,
    ) -> Result<ToggleOutcome, SyncError> {
        match self.store.resolve_write(&failed.target, failed.id, false) {
            WriteResolution::RolledBack => {}
            // A snapshot already settled this edit; nothing to undo.
            WriteResolution::Reconciled(EditStatus::Confirmed) => {
                self.settle_rest(failed, true);
                return Ok(ToggleOutcome::Confirmed);
            }
            _ => {
                self.settle_rest(failed, true);
                return Ok(ToggleOutcome::Superseded);
            }
        }

        for (edit, op) in self.edits.iter().zip(written) {
            let undo = op.inverse();
            if let Err(undo_error) = bounded(self.timeout, self.remote.mutate(&edit.target.record, &undo)).await {
                tracing::warn!(
                    toggle = %edit.target,
                    op = %undo,
                    error = %undo_error,
                    "compensating write failed"
                );
            }
        }
        self.settle_rest(failed, false);

        tracing::info!(toggle = %failed.target, error = %error, "toggle rolled back");
        Err(SyncError::MutationFailed {
            kind: failed.target.record.kind,
            record: failed.target.record.id.clone(),
            field: failed.target.field.clone(),
            source: error,
        })
    }

    fn settle_rest(&self, failed: &OptimisticEdit, ok: bool) {
        for edit in self.edits.iter().filter(|edit| edit.id != failed.id) {
            self.store.resolve_write(&edit.target, edit.id, ok);
        }
    }
}

async fn bounded<T, F>(limit: Duration, write: F) -> Result<T, RemoteError>
where
    F: std::future::Future<Output = Result<T, RemoteError>>,
{
    tokio::time::timeout(limit, write)
        .await
        .map_err(|_| RemoteError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_core::{
        ChannelError, ResourceKey, Snapshot, SnapshotChannel, SnapshotVersion,
    };
    use parking_lot::Mutex;

    /// Remote that records writes and fails the ones it is told to.
    #[derive(Default)]
    struct RecordingRemote {
        writes: Mutex<Vec<(RecordRef, MutationOp)>>,
        reject_field: Mutex<Option<String>>,
        hang: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl RemoteStoreEffects for RecordingRemote {
        async fn subscribe(&self, key: &ResourceKey) -> Result<SnapshotChannel, ChannelError> {
            Err(ChannelError::new(key.clone(), "not used"))
        }

        async fn mutate(&self, target: &RecordRef, op: &MutationOp) -> Result<(), RemoteError> {
            if *self.hang.lock() {
                futures::future::pending::<()>().await;
            }
            self.writes.lock().push((target.clone(), op.clone()));
            if self.reject_field.lock().as_deref() == Some(op.field()) {
                return Err(RemoteError::Rejected("rules".into()));
            }
            Ok(())
        }

        async fn insert(&self, _: ResourceKind, _: Record) -> Result<RecordId, RemoteError> {
            Ok(RecordId::new("c1"))
        }
    }

    fn setup() -> (Arc<RecordingRemote>, LocalStore, MutationCoordinator) {
        let remote = Arc::new(RecordingRemote::default());
        let store = LocalStore::new();
        let coordinator = MutationCoordinator::new(remote.clone(), store.clone(), &SyncConfig::default());
        (remote, store, coordinator)
    }

    fn like() -> ToggleTarget {
        ToggleTarget::like(&RecordId::new("p1"), &UserId::new("u1"))
    }

    #[tokio::test]
    async fn toggle_flips_locally_before_the_write() {
        let (remote, store, coordinator) = setup();
        let pending = coordinator.toggle(like(), &UserId::new("u1")).unwrap();

        assert!(pending.optimistic_value());
        assert!(store.effective_membership(&like()));
        assert!(remote.writes.lock().is_empty());

        assert_eq!(pending.outcome().await.unwrap(), ToggleOutcome::Confirmed);
        assert_eq!(
            remote.writes.lock()[0].1,
            MutationOp::set_membership(fields::LIKES, "u1", true)
        );
    }

    #[tokio::test]
    async fn second_toggle_while_pending_is_refused() {
        let (_remote, _store, coordinator) = setup();
        let first = coordinator.toggle(like(), &UserId::new("u1")).unwrap();
        let err = coordinator.toggle(like(), &UserId::new("u1")).unwrap_err();

        assert!(matches!(err, SyncError::MutationInFlight { .. }));
        first.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_write_rolls_back() {
        let (remote, store, coordinator) = setup();
        *remote.reject_field.lock() = Some(fields::LIKES.into());

        let pending = coordinator.toggle(like(), &UserId::new("u1")).unwrap();
        let err = pending.outcome().await.unwrap_err();

        assert!(matches!(err, SyncError::MutationFailed { source: RemoteError::Rejected(_), .. }));
        assert!(!store.effective_membership(&like()));
        assert_eq!(store.edit_status(&like()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_write_times_out() {
        let (remote, store, coordinator) = setup();
        *remote.hang.lock() = true;

        let pending = coordinator.toggle(like(), &UserId::new("u1")).unwrap();
        let err = pending.outcome().await.unwrap_err();

        assert!(matches!(err, SyncError::MutationFailed { source: RemoteError::Timeout(10_000), .. }));
        assert!(!store.effective_membership(&like()));
    }

    #[tokio::test]
    async fn failed_follow_half_is_compensated() {
        let (remote, store, coordinator) = setup();
        *remote.reject_field.lock() = Some(fields::FOLLOWING.into());
        let (me, them) = (UserId::new("u1"), UserId::new("u2"));

        let err = coordinator.toggle_follow(&me, &them).unwrap().outcome().await.unwrap_err();
        assert!(matches!(err, SyncError::MutationFailed { .. }));

        let writes = remote.writes.lock().clone();
        let ops: Vec<_> = writes.iter().map(|(_, op)| op.clone()).collect();
        assert_eq!(
            ops,
            vec![
                MutationOp::set_membership(fields::FOLLOWERS, "u1", true),
                MutationOp::set_membership(fields::FOLLOWING, "u2", true),
                MutationOp::set_membership(fields::FOLLOWERS, "u1", false),
            ]
        );
        assert!(!store.effective_membership(&ToggleTarget::follower(&them, &me)));
        assert!(!store.effective_membership(&ToggleTarget::following(&me, &them)));
    }

    #[tokio::test]
    async fn self_follow_is_rejected() {
        let (_remote, _store, coordinator) = setup();
        let me = UserId::new("u1");
        assert!(matches!(
            coordinator.toggle_follow(&me, &me).unwrap_err(),
            SyncError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn unrelated_snapshot_keeps_pending_toggle_visible() {
        let (remote, store, coordinator) = setup();
        *remote.hang.lock() = true;
        let key = ResourceKey::post("p1");
        store.open_slot(&key, 1);
        store.apply_snapshot(
            1,
            Snapshot::new(key.clone(), SnapshotVersion(1), vec![Record::new("p1").with_version(1)]),
        );

        let pending = coordinator.toggle(like(), &UserId::new("u1")).unwrap();
        store.apply_snapshot(
            1,
            Snapshot::new(
                key.clone(),
                SnapshotVersion(2),
                vec![Record::new("p1")
                    .with_field(fields::COMMENT_COUNT, 1_i64)
                    .with_version(2)],
            ),
        );

        assert_eq!(store.edit_status(&like()), Some(EditStatus::Pending));
        assert!(store.is_member(&key, &RecordId::new("p1"), fields::LIKES, "u1"));
        drop(pending);
    }

    #[tokio::test]
    async fn empty_comment_is_rejected() {
        let (_remote, _store, coordinator) = setup();
        let err = coordinator
            .post_comment(&Session::new("u1", "ana"), &RecordId::new("p1"), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn comment_bumps_the_counter() {
        let (remote, _store, coordinator) = setup();
        let id = coordinator
            .post_comment(&Session::new("u1", "ana"), &RecordId::new("p1"), "nice")
            .await
            .unwrap();

        assert_eq!(id, RecordId::new("c1"));
        assert_eq!(
            remote.writes.lock()[0],
            (
                RecordRef::new(ResourceKind::Post, "p1"),
                MutationOp::Increment {
                    field: fields::COMMENT_COUNT.into(),
                    by: 1
                }
            )
        );
    }
}
