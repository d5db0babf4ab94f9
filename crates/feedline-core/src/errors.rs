//! Categorized errors of the synchronization layer
//!
//! Every failure is resolved at the boundary that caused it:
//! - [`ChannelError`] is raised by one subscription channel and surfaced to the
//!   consumers of that key only
//! - [`RemoteError`] is the outcome of one remote write
//! - [`SyncError`] is what callers of the client API see
//!
//! A missing resource is not an error: it is delivered as an empty snapshot.

use std::fmt;

use crate::types::{RecordId, ResourceKey, ResourceKind};

/// Transport-level failure of one live subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("channel for {key} failed: {reason}")]
pub struct ChannelError {
    /// The key whose channel failed
    pub key: ResourceKey,
    /// Transport message
    pub reason: String,
}

impl ChannelError {
    /// Build a channel error.
    pub fn new(key: ResourceKey, reason: impl Into<String>) -> Self {
        Self {
            key,
            reason: reason.into(),
        }
    }
}

/// Outcome of a rejected or lost remote write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The store refused the write (rules, missing document)
    #[error("rejected: {0}")]
    Rejected(String),

    /// No answer within the configured mutation timeout
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// The store could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// High-level error categories for frontend handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Subscription transport failures (retry affordance)
    Network,
    /// A competing local action is still in flight (disabled control)
    Conflict,
    /// The remote store rejected a write (transient indicator)
    Remote,
    /// No signed-in user
    Session,
    /// Caller input rejected before any remote call
    Input,
    /// Invalid configuration
    Config,
    /// Broken internal invariant
    Internal,
}

impl ErrorCategory {
    /// Whether retrying the same action may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Conflict | Self::Remote)
    }

    /// Short label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "Network",
            Self::Conflict => "Busy",
            Self::Remote => "Remote",
            Self::Session => "Session",
            Self::Input => "Input",
            Self::Config => "Config",
            Self::Internal => "Internal",
        }
    }

    /// A hint for the user on how to resolve this category of error.
    #[must_use]
    pub fn resolution_hint(&self) -> &'static str {
        match self {
            Self::Network => "Check your connection and retry",
            Self::Conflict => "Wait for the previous action to finish",
            Self::Remote => "Your change was not saved, try again",
            Self::Session => "Sign in to continue",
            Self::Input => "Check your input and try again",
            Self::Config => "Review your configuration settings",
            Self::Internal => "An unexpected error occurred",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors returned by the client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A subscription channel failed; the consumer decides whether to re-attach.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A toggle on the same (record, field, member) is still pending.
    #[error("{field} on {kind}/{record} for {member} is already pending")]
    MutationInFlight {
        /// Collection of the toggled record
        kind: ResourceKind,
        /// Toggled record
        record: RecordId,
        /// Membership field
        field: String,
        /// Member being added or removed
        member: String,
    },

    /// The remote write was rejected or timed out and the edit was rolled back.
    #[error("{field} on {kind}/{record} was rolled back: {source}")]
    MutationFailed {
        /// Collection of the toggled record
        kind: ResourceKind,
        /// Toggled record
        record: RecordId,
        /// Membership field
        field: String,
        /// Underlying remote failure
        source: RemoteError,
    },

    /// The identity collaborator has not produced a session yet.
    #[error("no signed-in user")]
    SessionUnavailable,

    /// Caller input rejected locally.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Category for UI treatment.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Channel(_) => ErrorCategory::Network,
            Self::MutationInFlight { .. } => ErrorCategory::Conflict,
            Self::MutationFailed { .. } => ErrorCategory::Remote,
            Self::SessionUnavailable => ErrorCategory::Session,
            Self::InvalidInput(_) => ErrorCategory::Input,
            Self::Config(_) => ErrorCategory::Config,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether retrying may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.category().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_route_to_expected_treatment() {
        let key = ResourceKey::post("p1");
        assert_eq!(
            SyncError::from(ChannelError::new(key, "reset")).category(),
            ErrorCategory::Network
        );

        let in_flight = SyncError::MutationInFlight {
            kind: ResourceKind::Post,
            record: RecordId::new("p1"),
            field: "likes".into(),
            member: "u1".into(),
        };
        assert!(in_flight.is_transient());
        assert_eq!(in_flight.category().label(), "Busy");

        assert!(!SyncError::SessionUnavailable.is_transient());
    }

    #[test]
    fn mutation_failed_names_the_field_and_cause() {
        let err = SyncError::MutationFailed {
            kind: ResourceKind::Post,
            record: RecordId::new("p1"),
            field: "likes".into(),
            source: RemoteError::Timeout(250),
        };
        assert_eq!(
            err.to_string(),
            "likes on posts/p1 was rolled back: timed out after 250 ms"
        );
    }
}
