//! Operation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::StateVersionId;

/// Identifier of one recorded operation.
///
/// Ids are assigned densely in recording (completion) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
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

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Metadata describing an executed unit of work, supplied at record time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMeta {
    /// Source text; opaque to the kernel, replayed by the host.
    pub code: String,
    /// Measured wall-clock runtime in seconds.
    pub runtime_secs: f64,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// False for operations with external side effects that must not be
    /// re-executed.
    pub replayable: bool,
}

impl OperationMeta {
    /// Metadata for a replayable operation started now.
    pub fn new(code: impl Into<String>, runtime_secs: f64) -> Self {
        Self {
            code: code.into(),
            runtime_secs,
            started_at: Utc::now(),
            replayable: true,
        }
    }

    /// Set whether the operation may be replayed.
    pub fn with_replayable(mut self, replayable: bool) -> Self {
        self.replayable = replayable;
        self
    }

    /// Set the start time.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

/// One executed unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique id.
    pub id: OperationId,
    /// Source text.
    pub code: String,
    /// Measured runtime in seconds.
    pub runtime_secs: f64,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// Whether the operation may be replayed.
    pub replayable: bool,
    /// Versions read.
    pub inputs: Vec<StateVersionId>,
    /// Versions created or mutated.
    pub outputs: Vec<StateVersionId>,
    /// Names deleted.
    pub deleted: Vec<String>,
}
