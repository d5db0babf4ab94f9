//! Feedline Testing Infrastructure
//!
//! In-memory stand-ins for the client's collaborators plus fixtures.
//!
//! - [`MemoryRemoteStore`]: authoritative store with realtime push and
//!   failure injection
//! - [`StaticSession`]: identity provider set by the test
//! - [`fixtures`]: record builders and a seeded world
//!
//! ```toml
//! [dev-dependencies]
//! feedline-testkit = { path = "../feedline-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod remote;
pub mod session;

pub use fixtures::*;
pub use remote::MemoryRemoteStore;
pub use session::StaticSession;
