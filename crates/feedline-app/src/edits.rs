//! # Optimistic Edit Ledger
//!
//! Bookkeeping for speculative membership flips that have been shown locally
//! but not yet settled against the remote store.
//!
//! ## Lifecycle
//!
//! ```text
//!            write ok                  fresh snapshot
//! Pending ──────────▶ Confirmed(overlay) ──────────▶ (dropped)
//!    │
//!    │ fresh snapshot agrees           write settles
//!    ├──────────────────▶ Confirmed ─────────────────▶ (dropped)
//!    │ write failed
//!    └──────────────────▶ RolledBack (dropped immediately)
//! ```
//!
//! An entry carries an *overlay* while its desired value must win over the
//! cached snapshot. A pending edit keeps its overlay through snapshots that
//! do not show it yet: the server may simply not have seen the write. Once
//! the write is acknowledged, the next fresh snapshot of the record is the
//! sole truth, so a revert by another client shows up there.
//!
//! At most one entry per [`ToggleTarget`] is `Pending`. A `Confirmed` entry
//! may be replaced by a new toggle; the late write result of the replaced
//! edit is then ignored because its [`EditId`] no longer matches.

use std::collections::HashMap;
use std::fmt;

use feedline_core::types::fields;
use feedline_core::{MutationOp, Record, RecordId, RecordRef, ResourceKind, SyncError, UserId};
use tokio::time::Instant;

/// A toggleable membership: `record.field` contains `member` or not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToggleTarget {
    /// Record holding the membership set
    pub record: RecordRef,
    /// Membership field
    pub field: String,
    /// Member added or removed
    pub member: String,
}

impl ToggleTarget {
    /// Build a target.
    pub fn new(record: RecordRef, field: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            record,
            field: field.into(),
            member: member.into(),
        }
    }

    /// `posts/{post}.likes ∋ user`
    pub fn like(post: &RecordId, user: &UserId) -> Self {
        Self::new(
            RecordRef::new(ResourceKind::Post, post.clone()),
            fields::LIKES,
            user.as_str(),
        )
    }

    /// `users/{user}.savedPosts ∋ post`
    pub fn save(user: &UserId, post: &RecordId) -> Self {
        Self::new(
            RecordRef::new(ResourceKind::UserProfile, user.profile_record()),
            fields::SAVED_POSTS,
            post.as_str(),
        )
    }

    /// `users/{followed}.followers ∋ follower`
    pub fn follower(followed: &UserId, follower: &UserId) -> Self {
        Self::new(
            RecordRef::new(ResourceKind::UserProfile, followed.profile_record()),
            fields::FOLLOWERS,
            follower.as_str(),
        )
    }

    /// `users/{follower}.following ∋ followed`
    pub fn following(follower: &UserId, followed: &UserId) -> Self {
        Self::new(
            RecordRef::new(ResourceKind::UserProfile, follower.profile_record()),
            fields::FOLLOWING,
            followed.as_str(),
        )
    }

    /// Whether a record shows the member as present.
    pub fn observed_in(&self, record: &Record) -> bool {
        record.has_member(&self.field, &self.member)
    }

    /// The remote operation making the membership equal `present`.
    pub fn operation(&self, present: bool) -> MutationOp {
        MutationOp::set_membership(self.field.clone(), self.member.clone(), present)
    }

    pub(crate) fn in_flight_error(&self) -> SyncError {
        SyncError::MutationInFlight {
            kind: self.record.kind,
            record: self.record.id.clone(),
            field: self.field.clone(),
            member: self.member.clone(),
        }
    }
}

impl fmt::Display for ToggleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}∋{}", self.record, self.field, self.member)
    }
}

/// Ledger-assigned identity of one edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditId(u64);

impl fmt::Display for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edit-{}", self.0)
    }
}

/// Direction of an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Member becomes present
    SetAdd,
    /// Member becomes absent
    SetRemove,
}

impl EditKind {
    fn toward(present: bool) -> Self {
        if present {
            Self::SetAdd
        } else {
            Self::SetRemove
        }
    }

    /// Membership after the edit.
    pub fn desired(&self) -> bool {
        matches!(self, Self::SetAdd)
    }
}

/// Settlement state of an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditStatus {
    /// Shown locally, remote write outstanding
    Pending,
    /// The remote write succeeded or a snapshot already reflects the edit
    Confirmed,
    /// The remote write failed; the local value was restored
    RolledBack,
}

/// A locally applied, not yet settled membership flip.
#[derive(Debug, Clone)]
pub struct OptimisticEdit {
    /// Ledger identity
    pub id: EditId,
    /// What is being toggled
    pub target: ToggleTarget,
    /// Direction
    pub kind: EditKind,
    /// User who initiated the toggle
    pub acting_user: UserId,
    /// When the toggle was invoked
    pub submitted_at: Instant,
    /// Settlement state when this copy was taken
    pub status: EditStatus,
}

impl OptimisticEdit {
    /// Membership after the edit.
    pub fn desired(&self) -> bool {
        self.kind.desired()
    }
}

/// How a remote write result was absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResolution {
    /// The edit stays visible until the next snapshot replaces it
    Confirmed,
    /// The edit was removed and the snapshot value restored
    RolledBack,
    /// A snapshot had already settled the edit with this status; no-op
    Reconciled(EditStatus),
    /// The edit was replaced by a newer toggle; no-op
    Stale,
}

#[derive(Debug)]
struct LedgerEntry {
    edit: OptimisticEdit,
    /// Causality token of the record when the edit began
    base_version: Option<u64>,
    overlay: bool,
}

impl LedgerEntry {
    fn is_fresh(&self, record: &Record) -> bool {
        match (record.version(), self.base_version) {
            (Some(seen), Some(base)) => seen > base,
            _ => true,
        }
    }
}

/// Membership state of one target before an edit begins.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Baseline {
    pub effective: bool,
    pub base_version: Option<u64>,
}

/// All outstanding edits, keyed by target.
#[derive(Debug, Default)]
pub(crate) struct EditLedger {
    entries: HashMap<ToggleTarget, LedgerEntry>,
    next_id: u64,
}

impl EditLedger {
    /// The desired value of an edit that currently overrides the snapshot.
    pub fn overlay(&self, target: &ToggleTarget) -> Option<bool> {
        self.entries
            .get(target)
            .filter(|entry| entry.overlay)
            .map(|entry| entry.edit.desired())
    }

    pub fn status(&self, target: &ToggleTarget) -> Option<EditStatus> {
        self.entries.get(target).map(|entry| entry.edit.status)
    }

    pub fn get(&self, target: &ToggleTarget) -> Option<OptimisticEdit> {
        self.entries.get(target).map(|entry| entry.edit.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.edit.status == EditStatus::Pending)
            .count()
    }

    /// Overlays touching one record, for materializing its effective state.
    pub fn overlays_for<'a>(
        &'a self,
        record: &'a RecordRef,
    ) -> impl Iterator<Item = (&'a ToggleTarget, bool)> + 'a {
        self.entries.iter().filter_map(move |(target, entry)| {
            (entry.overlay && &target.record == record).then(|| (target, entry.edit.desired()))
        })
    }

    /// Start flipping every target toward `!baselines[0].effective`.
    ///
    /// All targets must be free of pending edits, otherwise nothing is
    /// recorded and the first conflict is reported.
    pub fn begin(
        &mut self,
        targets: &[ToggleTarget],
        baselines: &[Baseline],
        acting_user: &UserId,
    ) -> Result<Vec<OptimisticEdit>, SyncError> {
        if let Some(busy) = targets.iter().find(|target| {
            self.status(target) == Some(EditStatus::Pending)
        }) {
            return Err(busy.in_flight_error());
        }
        let Some(primary) = baselines.first() else {
            return Ok(Vec::new());
        };
        let kind = EditKind::toward(!primary.effective);
        let submitted_at = Instant::now();

        let mut begun = Vec::with_capacity(targets.len());
        for (target, baseline) in targets.iter().zip(baselines) {
            self.next_id += 1;
            let edit = OptimisticEdit {
                id: EditId(self.next_id),
                target: target.clone(),
                kind,
                acting_user: acting_user.clone(),
                submitted_at,
                status: EditStatus::Pending,
            };
            self.entries.insert(
                target.clone(),
                LedgerEntry {
                    edit: edit.clone(),
                    base_version: baseline.base_version,
                    overlay: true,
                },
            );
            begun.push(edit);
        }
        Ok(begun)
    }

    /// Absorb the result of the remote write issued for `id`.
    pub fn resolve_write(&mut self, target: &ToggleTarget, id: EditId, ok: bool) -> WriteResolution {
        let Some(entry) = self.entries.get_mut(target) else {
            return WriteResolution::Stale;
        };
        if entry.edit.id != id {
            return WriteResolution::Stale;
        }

        match (entry.edit.status, ok) {
            (EditStatus::Pending, true) => {
                entry.edit.status = EditStatus::Confirmed;
                WriteResolution::Confirmed
            }
            (EditStatus::Pending, false) => {
                self.entries.remove(target);
                WriteResolution::RolledBack
            }
            (EditStatus::Confirmed, _) if entry.overlay => WriteResolution::Stale,
            (status, _) => {
                self.entries.remove(target);
                WriteResolution::Reconciled(status)
            }
        }
    }

    /// Settle edits against a record from a newly delivered snapshot.
    ///
    /// Returns the transitions that happened, for logging.
    pub fn reconcile(
        &mut self,
        kind: ResourceKind,
        record: &Record,
    ) -> Vec<(ToggleTarget, EditId, EditStatus)> {
        let mut transitions = Vec::new();
        let mut dropped = Vec::new();

        for (target, entry) in self.entries.iter_mut() {
            if target.record.kind != kind || &target.record.id != record.id() {
                continue;
            }
            if !entry.is_fresh(record) {
                continue;
            }
            match (entry.edit.status, entry.overlay) {
                // A snapshot lacking the value may predate the write; only
                // agreement settles a pending edit.
                (EditStatus::Pending, _) if target.observed_in(record) == entry.edit.desired() => {
                    entry.overlay = false;
                    entry.edit.status = EditStatus::Confirmed;
                    transitions.push((target.clone(), entry.edit.id, EditStatus::Confirmed));
                }
                (EditStatus::Confirmed, true) => dropped.push(target.clone()),
                _ => {}
            }
        }

        for target in dropped {
            if let Some(entry) = self.entries.remove(&target) {
                transitions.push((target, entry.edit.id, EditStatus::Confirmed));
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u1() -> UserId {
        UserId::new("u1")
    }

    fn like_p1() -> ToggleTarget {
        ToggleTarget::like(&RecordId::new("p1"), &u1())
    }

    fn absent() -> Baseline {
        Baseline {
            effective: false,
            base_version: None,
        }
    }

    fn post(likes: &[&str]) -> Record {
        Record::new("p1").with_members(fields::LIKES, likes.iter().copied())
    }

    #[test]
    fn begin_flips_and_blocks_second_toggle() {
        let mut ledger = EditLedger::default();
        let edits = ledger.begin(&[like_p1()], &[absent()], &u1()).unwrap();

        assert_eq!(edits[0].kind, EditKind::SetAdd);
        assert_eq!(ledger.overlay(&like_p1()), Some(true));

        let err = ledger.begin(&[like_p1()], &[absent()], &u1()).unwrap_err();
        assert!(matches!(err, SyncError::MutationInFlight { .. }));
        assert_eq!(ledger.pending_count(), 1);
    }

    #[test]
    fn group_begin_is_all_or_nothing() {
        let mut ledger = EditLedger::default();
        let a = ToggleTarget::follower(&UserId::new("u2"), &u1());
        let b = ToggleTarget::following(&u1(), &UserId::new("u2"));
        ledger.begin(&[b.clone()], &[absent()], &u1()).unwrap();

        assert!(ledger.begin(&[a.clone(), b], &[absent(), absent()], &u1()).is_err());
        assert_eq!(ledger.status(&a), None);
    }

    #[test]
    fn failed_write_drops_overlay() {
        let mut ledger = EditLedger::default();
        let edit = ledger.begin(&[like_p1()], &[absent()], &u1()).unwrap().remove(0);

        assert_eq!(ledger.resolve_write(&like_p1(), edit.id, false), WriteResolution::RolledBack);
        assert_eq!(ledger.overlay(&like_p1()), None);
    }

    #[test]
    fn confirmed_overlay_survives_until_next_snapshot() {
        let mut ledger = EditLedger::default();
        let edit = ledger.begin(&[like_p1()], &[absent()], &u1()).unwrap().remove(0);
        assert_eq!(ledger.resolve_write(&like_p1(), edit.id, true), WriteResolution::Confirmed);
        assert_eq!(ledger.overlay(&like_p1()), Some(true));

        // The next snapshot wins even if it lags behind the write.
        ledger.reconcile(ResourceKind::Post, &post(&[]));
        assert_eq!(ledger.overlay(&like_p1()), None);
        assert_eq!(ledger.status(&like_p1()), None);
    }

    #[test]
    fn agreeing_snapshot_confirms_pending_edit() {
        let mut ledger = EditLedger::default();
        let edit = ledger.begin(&[like_p1()], &[absent()], &u1()).unwrap().remove(0);

        let transitions = ledger.reconcile(ResourceKind::Post, &post(&["u1"]));
        assert_eq!(transitions[0].2, EditStatus::Confirmed);
        assert_eq!(ledger.status(&like_p1()), Some(EditStatus::Confirmed));

        assert_eq!(
            ledger.resolve_write(&like_p1(), edit.id, true),
            WriteResolution::Reconciled(EditStatus::Confirmed)
        );
        assert_eq!(ledger.status(&like_p1()), None);
    }

    #[test]
    fn disagreeing_snapshot_leaves_pending_overlay_in_place() {
        let mut ledger = EditLedger::default();
        let baseline = Baseline {
            effective: false,
            base_version: Some(4),
        };
        let edit = ledger.begin(&[like_p1()], &[baseline], &u1()).unwrap().remove(0);

        // Newer record, changed by someone else, written before ours landed.
        let unrelated = post(&[]).with_field(fields::COMMENT_COUNT, 1_i64).with_version(5);
        assert!(ledger.reconcile(ResourceKind::Post, &unrelated).is_empty());
        assert_eq!(ledger.status(&like_p1()), Some(EditStatus::Pending));
        assert_eq!(ledger.overlay(&like_p1()), Some(true));

        assert_eq!(ledger.resolve_write(&like_p1(), edit.id, true), WriteResolution::Confirmed);
        assert_eq!(ledger.overlay(&like_p1()), Some(true));
    }

    #[test]
    fn revert_after_acknowledged_write_wins() {
        let mut ledger = EditLedger::default();
        let edit = ledger.begin(&[like_p1()], &[absent()], &u1()).unwrap().remove(0);
        ledger.resolve_write(&like_p1(), edit.id, true);

        // Another client unliked right after our write.
        ledger.reconcile(ResourceKind::Post, &post(&[]));
        assert_eq!(ledger.overlay(&like_p1()), None);
        assert_eq!(ledger.status(&like_p1()), None);
    }

    #[test]
    fn settled_edit_can_be_replaced_and_its_late_result_ignored() {
        let mut ledger = EditLedger::default();
        let first = ledger.begin(&[like_p1()], &[absent()], &u1()).unwrap().remove(0);
        ledger.reconcile(ResourceKind::Post, &post(&["u1"]));

        let present = Baseline {
            effective: true,
            base_version: None,
        };
        let second = ledger.begin(&[like_p1()], &[present], &u1()).unwrap().remove(0);
        assert_eq!(second.kind, EditKind::SetRemove);
        assert_eq!(ledger.resolve_write(&like_p1(), first.id, true), WriteResolution::Stale);
        assert_eq!(ledger.status(&like_p1()), Some(EditStatus::Pending));
    }

    #[test]
    fn redelivered_record_versions_are_ignored() {
        let mut ledger = EditLedger::default();
        let baseline = Baseline {
            effective: false,
            base_version: Some(4),
        };
        ledger.begin(&[like_p1()], &[baseline], &u1()).unwrap();

        assert!(ledger
            .reconcile(ResourceKind::Post, &post(&[]).with_version(4))
            .is_empty());
        assert_eq!(ledger.status(&like_p1()), Some(EditStatus::Pending));

        ledger.reconcile(ResourceKind::Post, &post(&["u1"]).with_version(5));
        assert_eq!(ledger.status(&like_p1()), Some(EditStatus::Confirmed));
    }

    #[test]
    fn other_kinds_do_not_reconcile() {
        let mut ledger = EditLedger::default();
        ledger.begin(&[like_p1()], &[absent()], &u1()).unwrap();

        ledger.reconcile(ResourceKind::CommentSet, &post(&[]));
        assert_eq!(ledger.status(&like_p1()), Some(EditStatus::Pending));
    }
}
