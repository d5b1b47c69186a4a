//! State version types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::operation::OperationId;
use crate::fingerprint::FingerprintSummary;

/// Identifier of one state version in the dependency graph.
///
/// Ids are assigned densely in recording order, so `Ord` is temporal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateVersionId(u64);

impl StateVersionId {
    /// Create an id from its raw value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sv#{}", self.0)
    }
}

/// One observed version of one named piece of state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVersion {
    /// Unique id.
    pub id: StateVersionId,
    /// Name the value is bound to.
    pub name: String,
    /// Per-name version counter, starting at 1.
    pub version: u32,
    /// Immediately prior version of the same name, if any.
    pub previous: Option<StateVersionId>,
    /// Operation that produced this version.
    pub creator: OperationId,
    /// Estimated serialized size.
    pub size_bytes: u64,
    /// Fingerprint digest at creation time.
    pub fingerprint: FingerprintSummary,
    /// When this version was observed.
    pub created_at: DateTime<Utc>,
}

impl StateVersion {
    /// Whether this value can only be recomputed, never migrated.
    pub fn is_unserializable(&self) -> bool {
        self.fingerprint.unserializable
    }

    /// `name@version` label for logs and errors.
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}
