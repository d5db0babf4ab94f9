//! Identity effects
//!
//! The identity provider is a black box. All the client needs is the current
//! user's id and handle, readable synchronously once sign-in completed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::SyncError;
use crate::types::UserId;

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque user id
    pub user_id: UserId,
    /// Public handle, also the profile path segment
    pub username: String,
    /// Avatar URL, if the provider has one
    pub image: Option<String>,
}

impl Session {
    /// Build a session without an avatar.
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            username: username.into(),
            image: None,
        }
    }

    /// Attach an avatar URL.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Access to the current session.
pub trait SessionEffects: Send + Sync {
    /// The signed-in user, or `None` while the session is pending or absent.
    fn current_session(&self) -> Option<Session>;

    /// The signed-in user, or [`SyncError::SessionUnavailable`].
    fn require_session(&self) -> Result<Session, SyncError> {
        self.current_session().ok_or(SyncError::SessionUnavailable)
    }
}

impl<T: SessionEffects + ?Sized> SessionEffects for Arc<T> {
    fn current_session(&self) -> Option<Session> {
        (**self).current_session()
    }
}
