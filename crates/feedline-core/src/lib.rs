//! Feedline Core - Shared Vocabulary of the Live Feed Client
//!
//! This crate holds the pure types and collaborator interfaces that the
//! synchronization layer in `feedline-app` is written against. It contains no
//! scheduling and no state beyond value types.
//!
//! # Contents
//!
//! ## Resource Addressing
//! - [`ResourceKind`]: which remote collection a subscription reads from
//! - [`Predicate`]: an order-insensitive filter over records of that kind
//! - [`ResourceKey`]: `(kind, normalized predicate)`, the deduplication key
//!
//! ## Data
//! - [`Record`] and [`FieldValue`]: one document of the remote store
//! - [`Snapshot`]: the full result set of a key at one point in time
//!
//! ## Collaborator Effects
//! - [`RemoteStoreEffects`]: subscribe to a key, mutate a record
//! - [`SessionEffects`]: the signed-in user, once known
//!
//! ## Errors and Configuration
//! - [`SyncError`], [`ChannelError`], [`RemoteError`]
//! - [`FeedlineConfig`]

#![forbid(unsafe_code)]

/// Collaborator effect traits (remote store, identity)
pub mod effects;

/// Unified error handling
pub mod errors;

/// Configuration loading and validation
pub mod config;

/// Identifiers, resource keys, records and snapshots
pub mod types;

pub use config::{FeedlineConfig, LoggingConfig, RoutingConfig, SyncConfig};
pub use effects::{
    MutationOp, RecordRef, RemoteStoreEffects, Session, SessionEffects, SnapshotChannel,
};
pub use errors::{ChannelError, ErrorCategory, RemoteError, SyncError};
pub use types::{
    fields, Clause, FieldValue, OrderBy, Predicate, Record, RecordId, ResourceKey, ResourceKind,
    Snapshot, SnapshotVersion, SortDirection, UserId,
};
