//! Feedline App - Live View Synchronization and Contextual Routing
//!
//! Keeps an in-memory view of a remotely authoritative social feed consistent
//! under continuous pushes, applies toggles optimistically, and shows the same
//! resource either as a page or as an overlay without duplicating its
//! subscription.
//!
//! # Components
//!
//! - [`SubscriptionRegistry`]: one live channel per [`ResourceKey`],
//!   reference-counted by [`SubscriptionHandle`]s
//! - [`LocalStore`]: latest snapshot per key, serialized change delivery, and
//!   the ledger of optimistic edits
//! - [`DerivedAttach`]: attaches that follow another key's snapshots, for
//!   pages addressed by username
//! - [`MutationCoordinator`]: optimistic toggles with rollback and
//!   compensation
//! - [`ContextualRouter`]: page/overlay state machine with navigation history
//! - [`FeedClient`]: the facade presentation code talks to
//!
//! Collaborators are injected as [`RemoteStoreEffects`] and
//! [`SessionEffects`] implementations.
//!
//! [`ResourceKey`]: feedline_core::ResourceKey
//! [`RemoteStoreEffects`]: feedline_core::RemoteStoreEffects
//! [`SessionEffects`]: feedline_core::SessionEffects

#![forbid(unsafe_code)]

pub mod client;
pub mod coordinator;
pub mod derived;
pub mod edits;
pub mod logging;
pub mod registry;
pub mod routing;
pub mod store;

pub use client::{FeedClient, ResourceState};
pub use coordinator::{MutationCoordinator, PendingToggle, ToggleOutcome};
pub use derived::{DeriveKeys, DerivedAttach};
pub use edits::{EditId, EditKind, EditStatus, OptimisticEdit, ToggleTarget, WriteResolution};
pub use registry::{SubscriptionHandle, SubscriptionRegistry};
pub use routing::{
    ContextualRouter, HistoryEntry, NavigationHistory, OverlayState, PageData, ProfileTab,
    RouteContext, RouteTarget, RouterState, Surface, ViewportClass,
};
pub use store::{ListenerId, LocalStore, StoreEvent};
