//! Collaborator Effect Trait Definitions
//!
//! Pure trait definitions for the two external collaborators of the client.
//! This module defines **what** can be asked of them; handlers (a realtime
//! database SDK, an identity provider, or the in-memory doubles in
//! `feedline-testkit`) define **how**.
//!
//! - [`RemoteStoreEffects`]: filtered live subscriptions and idempotent
//!   set/counter mutations with at-least-once delivery
//! - [`SessionEffects`]: the signed-in user, available synchronously once the
//!   session is established

pub mod remote;
pub mod session;

pub use remote::{MutationOp, RecordRef, RemoteStoreEffects, SnapshotChannel, SnapshotStream};
pub use session::{Session, SessionEffects};
