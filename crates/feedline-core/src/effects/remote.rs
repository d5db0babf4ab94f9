//! Remote store effects
//!
//! The remote store is authoritative. A subscription yields a lazy, infinite
//! sequence of full-state snapshots for one key; the sequence ends only when
//! the consumer drops it or the transport fails. Mutations are idempotent set
//! and counter operations addressed to a single record.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::errors::{ChannelError, RemoteError};
use crate::types::{FieldValue, Record, RecordId, ResourceKey, ResourceKind, Snapshot};

/// Push sequence of one live subscription.
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, ChannelError>>;

/// One open live subscription.
///
/// Dropping the channel closes the underlying subscription.
pub struct SnapshotChannel {
    key: ResourceKey,
    stream: SnapshotStream,
}

impl SnapshotChannel {
    /// Wrap a transport stream.
    pub fn new(key: ResourceKey, stream: SnapshotStream) -> Self {
        Self { key, stream }
    }

    /// The key this channel serves.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Wait for the next push. `None` means the transport ended the stream.
    pub async fn next(&mut self) -> Option<Result<Snapshot, ChannelError>> {
        self.stream.next().await
    }
}

impl fmt::Debug for SnapshotChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotChannel")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Address of one record in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    /// Collection
    pub kind: ResourceKind,
    /// Record id
    pub id: RecordId,
}

impl RecordRef {
    /// Build a record reference.
    pub fn new(kind: ResourceKind, id: impl Into<RecordId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// An idempotent field operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationOp {
    /// Add a member to a set field ("arrayUnion")
    SetAdd {
        /// Membership field
        field: String,
        /// Member to add
        member: String,
    },
    /// Remove a member from a set field ("arrayRemove")
    SetRemove {
        /// Membership field
        field: String,
        /// Member to remove
        member: String,
    },
    /// Add to a counter field
    Increment {
        /// Counter field
        field: String,
        /// Signed delta
        by: i64,
    },
}

impl MutationOp {
    /// Add or remove `member` depending on the desired membership.
    pub fn set_membership(field: impl Into<String>, member: impl Into<String>, present: bool) -> Self {
        let (field, member) = (field.into(), member.into());
        if present {
            Self::SetAdd { field, member }
        } else {
            Self::SetRemove { field, member }
        }
    }

    /// The field this operation touches.
    pub fn field(&self) -> &str {
        match self {
            Self::SetAdd { field, .. } | Self::SetRemove { field, .. } | Self::Increment { field, .. } => {
                field
            }
        }
    }

    /// The operation undoing this one.
    pub fn inverse(&self) -> Self {
        match self {
            Self::SetAdd { field, member } => Self::SetRemove {
                field: field.clone(),
                member: member.clone(),
            },
            Self::SetRemove { field, member } => Self::SetAdd {
                field: field.clone(),
                member: member.clone(),
            },
            Self::Increment { field, by } => Self::Increment {
                field: field.clone(),
                by: -by,
            },
        }
    }

    /// Apply to a record. Returns whether the record changed.
    pub fn apply(&self, record: &mut Record) -> bool {
        match self {
            Self::SetAdd { field, member } => {
                let mut set = record.members(field).cloned().unwrap_or_default();
                let changed = set.insert(member.clone());
                if changed {
                    record.set_field(field.clone(), FieldValue::Members(set));
                }
                changed
            }
            Self::SetRemove { field, member } => {
                let Some(mut set) = record.members(field).cloned() else {
                    return false;
                };
                let changed = set.remove(member);
                if changed {
                    record.set_field(field.clone(), FieldValue::Members(set));
                }
                changed
            }
            Self::Increment { field, by } => {
                if *by == 0 {
                    return false;
                }
                let next = record.counter(field).saturating_add(*by);
                record.set_field(field.clone(), FieldValue::Integer(next));
                true
            }
        }
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetAdd { field, member } => write!(f, "{field} += {member}"),
            Self::SetRemove { field, member } => write!(f, "{field} -= {member}"),
            Self::Increment { field, by } => write!(f, "{field} += {by}"),
        }
    }
}

/// Realtime remote store operations.
#[async_trait]
pub trait RemoteStoreEffects: Send + Sync {
    /// Open a live subscription for `key`.
    ///
    /// The channel pushes the full result set after every change, in order,
    /// possibly skipping or redelivering intermediate states.
    async fn subscribe(&self, key: &ResourceKey) -> Result<SnapshotChannel, ChannelError>;

    /// Apply an idempotent operation to one record.
    async fn mutate(&self, target: &RecordRef, op: &MutationOp) -> Result<(), RemoteError>;

    /// Create a record, letting the store assign its id.
    async fn insert(&self, kind: ResourceKind, record: Record) -> Result<RecordId, RemoteError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Blanket Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Blanket implementation for Arc<T> where T: RemoteStoreEffects
#[async_trait]
impl<T: RemoteStoreEffects + ?Sized> RemoteStoreEffects for Arc<T> {
    async fn subscribe(&self, key: &ResourceKey) -> Result<SnapshotChannel, ChannelError> {
        (**self).subscribe(key).await
    }

    async fn mutate(&self, target: &RecordRef, op: &MutationOp) -> Result<(), RemoteError> {
        (**self).mutate(target, op).await
    }

    async fn insert(&self, kind: ResourceKind, record: Record) -> Result<RecordId, RemoteError> {
        (**self).insert(kind, record).await
    }
}
