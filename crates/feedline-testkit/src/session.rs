//! Scriptable identity provider

use std::sync::Arc;

use feedline_core::{Session, SessionEffects};
use parking_lot::RwLock;

/// Session provider whose user is set by the test.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    current: Arc<RwLock<Option<Session>>>,
}

impl StaticSession {
    /// Signed in as `user_id` with handle `username`.
    pub fn signed_in(user_id: &str, username: &str) -> Self {
        let session = Self::default();
        session.sign_in(Session::new(user_id, username));
        session
    }

    /// No user yet.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Replace the current user.
    pub fn sign_in(&self, session: Session) {
        *self.current.write() = Some(session);
    }

    /// Drop the current user.
    pub fn sign_out(&self) {
        *self.current.write() = None;
    }
}

impl SessionEffects for StaticSession {
    fn current_session(&self) -> Option<Session> {
        self.current.read().clone()
    }
}
