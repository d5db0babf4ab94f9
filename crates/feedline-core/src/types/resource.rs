//! Resource addressing
//!
//! A [`ResourceKey`] identifies one live query against the remote store: a
//! collection ([`ResourceKind`]) and a filter over it ([`Predicate`]). Keys are
//! the unit of subscription deduplication, so two keys must compare equal
//! whenever they select the same records, regardless of the order in which
//! their clauses were written.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use super::identifiers::{RecordId, UserId};
use super::record::{FieldValue, Record};

/// Field names used by the feed's collections.
pub mod fields {
    /// Users who liked a post or comment.
    pub const LIKES: &str = "likes";
    /// Users following a profile.
    pub const FOLLOWERS: &str = "followers";
    /// Profiles a user follows.
    pub const FOLLOWING: &str = "following";
    /// Posts a user bookmarked.
    pub const SAVED_POSTS: &str = "savedPosts";
    /// Number of comments on a post.
    pub const COMMENT_COUNT: &str = "commentCount";
    /// Author or profile handle.
    pub const USERNAME: &str = "username";
    /// Post a comment belongs to.
    pub const POST_ID: &str = "postId";
    /// Author of a comment.
    pub const USER_ID: &str = "userId";
    /// Avatar of a comment's author, when the session has one.
    pub const USER_IMAGE: &str = "userImage";
    /// Comment body.
    pub const TEXT: &str = "text";
    /// Recipient of a notification.
    pub const RECIPIENT_ID: &str = "recipientId";
    /// Server-assigned creation time.
    pub const TIMESTAMP: &str = "timeStamp";
}

/// The remote collection a subscription reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Posts (`posts`)
    Post,
    /// User profiles (`users`)
    UserProfile,
    /// Comments (`comments`)
    CommentSet,
    /// Activity notifications (`notifications`)
    NotificationFeed,
}

impl ResourceKind {
    /// Name of the backing collection in the remote store.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Post => "posts",
            Self::UserProfile => "users",
            Self::CommentSet => "comments",
            Self::NotificationFeed => "notifications",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Clause {
    /// The record's id equals the given id (document subscription).
    Id(RecordId),
    /// A field equals a value. An absent field equals [`FieldValue::Null`].
    Eq(String, FieldValue),
    /// A membership field contains the given member ("array-contains").
    Contains(String, String),
}

impl Clause {
    /// Evaluate this clause against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Id(id) => record.id() == id,
            Self::Eq(field, value) => record.field(field).unwrap_or(&FieldValue::Null) == value,
            Self::Contains(field, member) => record.has_member(field, member),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id=={id}"),
            Self::Eq(field, value) => write!(f, "{field}=={value}"),
            Self::Contains(field, member) => write!(f, "{field} contains {member}"),
        }
    }
}

/// Sort direction of an ordered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first
    Asc,
    /// Largest first
    Desc,
}

/// Result ordering of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to sort on
    pub field: String,
    /// Direction
    pub direction: SortDirection,
}

/// An order-insensitive conjunction of [`Clause`]s with an optional ordering.
///
/// Clauses live in a sorted set, so `a && b` and `b && a` build the same
/// predicate, and duplicate clauses collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    clauses: BTreeSet<Clause>,
    order_by: Option<OrderBy>,
}

impl Predicate {
    /// A predicate matching every record of the kind.
    pub fn all() -> Self {
        Self::default()
    }

    /// A predicate selecting exactly one record.
    pub fn document(id: impl Into<RecordId>) -> Self {
        Self::all().with(Clause::Id(id.into()))
    }

    /// Add a clause.
    #[must_use]
    pub fn with(mut self, clause: Clause) -> Self {
        self.clauses.insert(clause);
        self
    }

    /// Add an equality clause.
    #[must_use]
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.with(Clause::Eq(field.into(), value.into()))
    }

    /// Add an array-contains clause.
    #[must_use]
    pub fn where_contains(self, field: impl Into<String>, member: impl Into<String>) -> Self {
        self.with(Clause::Contains(field.into(), member.into()))
    }

    /// Set the result ordering.
    #[must_use]
    pub fn ordered_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// The clauses in normalized order.
    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter()
    }

    /// The result ordering, if any.
    pub fn order_by(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    /// The record id if this predicate selects a single document.
    pub fn document_id(&self) -> Option<&RecordId> {
        match (self.clauses.len(), self.clauses.first()) {
            (1, Some(Clause::Id(id))) => Some(id),
            _ => None,
        }
    }

    /// Whether a record satisfies every clause.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record))
    }

    /// Sort records according to this predicate's ordering.
    ///
    /// Records without the ordering field sort as [`FieldValue::Null`]. Ties,
    /// and unordered predicates, fall back to record id.
    pub fn sort(&self, records: &mut [Record]) {
        records.sort_by(|a, b| self.compare(a, b));
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let by_field = self.order_by.as_ref().map_or(Ordering::Equal, |order| {
            let left = a.field(&order.field).unwrap_or(&FieldValue::Null);
            let right = b.field(&order.field).unwrap_or(&FieldValue::Null);
            match order.direction {
                SortDirection::Asc => left.cmp(right),
                SortDirection::Desc => right.cmp(left),
            }
        });
        by_field.then_with(|| a.id().cmp(b.id()))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for clause in &self.clauses {
            if !first {
                f.write_str(" && ")?;
            }
            write!(f, "{clause}")?;
            first = false;
        }
        if first {
            f.write_str("*")?;
        }
        if let Some(order) = &self.order_by {
            let dir = match order.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            write!(f, " order by {} {dir}", order.field)?;
        }
        Ok(())
    }
}

/// Identity of a live query: the collection plus its normalized filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    kind: ResourceKind,
    predicate: Predicate,
}

impl ResourceKey {
    /// Build a key from parts.
    pub fn new(kind: ResourceKind, predicate: Predicate) -> Self {
        Self { kind, predicate }
    }

    /// The collection this key reads.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The filter of this key.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// The record id if this key is a document subscription.
    pub fn document_id(&self) -> Option<&RecordId> {
        self.predicate.document_id()
    }

    /// The username if this key looks up a profile by its handle.
    pub fn username_lookup(&self) -> Option<&str> {
        if self.kind != ResourceKind::UserProfile || self.predicate.order_by().is_some() {
            return None;
        }
        let mut clauses = self.predicate.clauses();
        match (clauses.next(), clauses.next()) {
            (Some(Clause::Eq(field, FieldValue::Text(username))), None) if field == fields::USERNAME => {
                Some(username.as_str())
            }
            _ => None,
        }
    }

    /// Whether the key names one record that is expected to exist: a
    /// document, or a profile by its unique username. An empty result for
    /// such a key means the record is gone rather than that nothing matched.
    pub fn is_unique_lookup(&self) -> bool {
        self.document_id().is_some() || self.username_lookup().is_some()
    }

    /// A single post.
    pub fn post(id: impl Into<RecordId>) -> Self {
        Self::new(ResourceKind::Post, Predicate::document(id))
    }

    /// The home feed: every post, newest first.
    pub fn home_feed() -> Self {
        Self::new(
            ResourceKind::Post,
            Predicate::all().ordered_by(fields::TIMESTAMP, SortDirection::Desc),
        )
    }

    /// Posts authored by a username, newest first.
    pub fn posts_by_author(username: impl Into<String>) -> Self {
        Self::new(
            ResourceKind::Post,
            Predicate::all()
                .where_eq(fields::USERNAME, FieldValue::Text(username.into()))
                .ordered_by(fields::TIMESTAMP, SortDirection::Desc),
        )
    }

    /// Posts a user has liked.
    pub fn posts_liked_by(user: &UserId) -> Self {
        Self::new(
            ResourceKind::Post,
            Predicate::all().where_contains(fields::LIKES, user.as_str()),
        )
    }

    /// A user's profile record.
    pub fn user_profile(user: &UserId) -> Self {
        Self::new(ResourceKind::UserProfile, Predicate::document(user.profile_record()))
    }

    /// The profile carrying a username (at most one record).
    pub fn profile_by_username(username: impl Into<String>) -> Self {
        Self::new(
            ResourceKind::UserProfile,
            Predicate::all().where_eq(fields::USERNAME, FieldValue::Text(username.into())),
        )
    }

    /// Profiles following a user.
    pub fn followers_of(user: &UserId) -> Self {
        Self::new(
            ResourceKind::UserProfile,
            Predicate::all().where_contains(fields::FOLLOWING, user.as_str()),
        )
    }

    /// Profiles a user follows.
    pub fn following_of(user: &UserId) -> Self {
        Self::new(
            ResourceKind::UserProfile,
            Predicate::all().where_contains(fields::FOLLOWERS, user.as_str()),
        )
    }

    /// Comments on a post, newest first.
    pub fn comments_for(post: &RecordId) -> Self {
        Self::new(
            ResourceKind::CommentSet,
            Predicate::all()
                .where_eq(fields::POST_ID, FieldValue::Text(post.as_str().to_string()))
                .ordered_by(fields::TIMESTAMP, SortDirection::Desc),
        )
    }

    /// Notifications addressed to a user, newest first.
    pub fn notifications_for(user: &UserId) -> Self {
        Self::new(
            ResourceKind::NotificationFeed,
            Predicate::all()
                .where_eq(fields::RECIPIENT_ID, FieldValue::Text(user.as_str().to_string()))
                .ordered_by(fields::TIMESTAMP, SortDirection::Desc),
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.predicate)
    }
}
