//! Record builders and a small seeded world
//!
//! The seeded world has two users and two posts:
//!
//! | id   | kind    | notes                                   |
//! |------|---------|-----------------------------------------|
//! | `u1` | profile | `ana`, follows nobody                   |
//! | `u2` | profile | `bo`, followed by nobody                |
//! | `p1` | post    | by `bo`, no likes, newest               |
//! | `p2` | post    | by `ana`, liked by `u2`                 |

use feedline_core::{fields, FieldValue, Record, ResourceKind, UserId};

use crate::remote::MemoryRemoteStore;

/// A post record.
pub fn post(id: &str, author: &str, posted_at: u64, likes: &[&str]) -> Record {
    Record::new(id)
        .with_field(fields::USERNAME, author)
        .with_field(fields::TIMESTAMP, FieldValue::Timestamp(posted_at))
        .with_field(fields::COMMENT_COUNT, 0_i64)
        .with_members(fields::LIKES, likes.iter().copied())
}

/// A profile record keyed by the user id.
pub fn profile(user: &str, username: &str, followers: &[&str], following: &[&str]) -> Record {
    Record::new(UserId::new(user).profile_record())
        .with_field(fields::USER_ID, user)
        .with_field(fields::USERNAME, username)
        .with_members(fields::FOLLOWERS, followers.iter().copied())
        .with_members(fields::FOLLOWING, following.iter().copied())
        .with_members(fields::SAVED_POSTS, std::iter::empty::<&str>())
}

/// A notification record.
pub fn notification(id: &str, recipient: &str, text: &str, at: u64) -> Record {
    Record::new(id)
        .with_field(fields::RECIPIENT_ID, recipient)
        .with_field(fields::TEXT, text)
        .with_field(fields::TIMESTAMP, FieldValue::Timestamp(at))
}

/// The seeded two-user world.
pub fn seeded_world() -> MemoryRemoteStore {
    MemoryRemoteStore::new()
        .with_record(ResourceKind::UserProfile, profile("u1", "ana", &[], &[]))
        .with_record(ResourceKind::UserProfile, profile("u2", "bo", &[], &[]))
        .with_record(ResourceKind::Post, post("p1", "bo", 2_000, &[]))
        .with_record(ResourceKind::Post, post("p2", "ana", 1_000, &["u2"]))
        .with_record(
            ResourceKind::NotificationFeed,
            notification("n1", "u1", "bo liked your post", 1_500),
        )
}
