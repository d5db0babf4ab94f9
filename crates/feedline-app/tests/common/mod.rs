//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use feedline_app::FeedClient;
use feedline_core::FeedlineConfig;
use feedline_testkit::{MemoryRemoteStore, StaticSession};

/// Let spawned pump and write tasks run to quiescence.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// A client over `remote`, signed in as `u1` (`ana`).
pub fn client(remote: &MemoryRemoteStore) -> FeedClient {
    client_as(remote, StaticSession::signed_in("u1", "ana"))
}

/// A client over `remote` with the given session.
pub fn client_as(remote: &MemoryRemoteStore, session: StaticSession) -> FeedClient {
    FeedClient::new(
        FeedlineConfig::default(),
        Arc::new(remote.clone()),
        Arc::new(session),
    )
    .expect("default config is valid")
}
