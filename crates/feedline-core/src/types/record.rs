//! Records and snapshots
//!
//! A [`Snapshot`] is the entire current result set for one
//! [`ResourceKey`](super::ResourceKey), never a diff. Consumers replace their
//! cached value with each snapshot they receive.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::identifiers::RecordId;
use super::resource::ResourceKey;

/// A field value of a remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldValue {
    /// Absent or explicit null
    Null,
    /// Boolean flag
    Bool(bool),
    /// Signed counter or number
    Integer(i64),
    /// Free text or identifier
    Text(String),
    /// Milliseconds since the Unix epoch, assigned by the server
    Timestamp(u64),
    /// A membership set (user ids, post ids)
    Members(BTreeSet<String>),
}

impl FieldValue {
    /// Build a membership set from anything yielding strings.
    pub fn members<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Members(members.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Timestamp(ms) => write!(f, "@{ms}"),
            Self::Members(set) => {
                f.write_str("[")?;
                for (i, member) in set.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(member)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One document of the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    fields: BTreeMap<String, FieldValue>,
    /// Per-record causality token, when the store supplies one.
    version: Option<u64>,
}

impl Record {
    /// An empty record.
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
            version: None,
        }
    }

    /// Builder: set a field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Builder: set a membership field.
    #[must_use]
    pub fn with_members<I, S>(self, field: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_field(field, FieldValue::members(members))
    }

    /// Builder: set the causality token.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Record id.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Causality token, if known.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Replace the causality token.
    pub fn set_version(&mut self, version: Option<u64>) {
        self.version = version;
    }

    /// All fields.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// A single field.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Overwrite a field.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// A membership field, if present and set-typed.
    pub fn members(&self, name: &str) -> Option<&BTreeSet<String>> {
        match self.fields.get(name) {
            Some(FieldValue::Members(set)) => Some(set),
            _ => None,
        }
    }

    /// Whether a membership field contains `member`.
    pub fn has_member(&self, name: &str, member: &str) -> bool {
        self.members(name).is_some_and(|set| set.contains(member))
    }

    /// Size of a membership field (0 when absent).
    pub fn member_count(&self, name: &str) -> usize {
        self.members(name).map_or(0, BTreeSet::len)
    }

    /// A counter field (0 when absent or not an integer).
    pub fn counter(&self, name: &str) -> i64 {
        match self.fields.get(name) {
            Some(FieldValue::Integer(n)) => *n,
            _ => 0,
        }
    }

    /// A text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Monotonic per-key sequence marker assigned by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SnapshotVersion(pub u64);

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The full authoritative result set of a key at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    key: ResourceKey,
    version: SnapshotVersion,
    records: Vec<Record>,
}

impl Snapshot {
    /// Build a snapshot.
    pub fn new(key: ResourceKey, version: SnapshotVersion, records: Vec<Record>) -> Self {
        Self {
            key,
            version,
            records,
        }
    }

    /// The key this snapshot answers.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Sequence marker.
    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Records in result order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Look up a record by id.
    pub fn record(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|r| r.id() == id)
    }

    /// Whether a record with this id is part of the result.
    pub fn contains(&self, id: &RecordId) -> bool {
        self.record(id).is_some()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No records matched.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A unique-lookup key whose record does not exist (deleted post,
    /// unknown username).
    pub fn is_not_found(&self) -> bool {
        self.key.is_unique_lookup() && self.records.is_empty()
    }
}
