//! Value types shared by every component of the client.

mod identifiers;
mod record;
mod resource;

pub use identifiers::{RecordId, UserId};
pub use record::{FieldValue, Record, Snapshot, SnapshotVersion};
pub use resource::{fields, Clause, OrderBy, Predicate, ResourceKey, ResourceKind, SortDirection};
