//! # elastic-checkpoint
//!
//! Cost-based checkpointing for interactive session state.
//!
//! An interactive session is a sequence of executed code units that read and
//! write a shared namespace. Checkpointing it answers one question:
//!
//! > For every live variable, is it cheaper to **persist its value** or to
//! > **re-run the operations that produced it**?
//!
//! ## Core Contract
//!
//! 1. Every executed unit is recorded into a bipartite dependency graph of
//!    operations and state versions, with in-place mutations detected by
//!    value fingerprints
//! 2. At checkpoint time the live state versions are split into MIGRATE and
//!    RECOMPUTE so that total estimated cost is minimal
//! 3. The split is closed: everything needed to replay the recomputed
//!    versions is either migrated or itself replayed
//!
//! ## Architecture
//!
//! ```text
//! Executed unit → Fingerprint diff → DependencyGraph::record
//!                                          ↓
//!                     Strategy::select (min-cut) → Partition
//!                                          ↓
//!                     CheckpointArtifact → RestorePlan
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same graph + same cost model + same strategy → identical partition
//! - Ties between migrating and recomputing resolve to migrating
//! - Replay order is recording order

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod object;
pub mod fingerprint;
pub mod types;
pub mod graph;
pub mod cost;
pub mod optimizer;
pub mod restore;
pub mod session;
pub mod artifact;
pub mod config;
pub mod canonical;

// Re-exports
pub use object::{Heap, HeapError, Namespace, Object, ObjectId};
pub use fingerprint::{Change, Comparison, Fingerprint, FingerprintLimits, FingerprintSummary};
pub use types::{
    ClosureViolation, Operation, OperationId, OperationMeta, Partition, PartitionCost,
    StateVersion, StateVersionId,
};
pub use graph::{DependencyGraph, GraphError, OutputState};
pub use cost::{CostError, CostModel};
pub use optimizer::{OptimizerError, Strategy};
pub use restore::{RestoreError, RestorePlan, RestoreStep};
pub use session::{Checkpoint, ExecutedUnit, Session, SessionError};
pub use artifact::{ArtifactError, CheckpointArtifact, Payload, ARTIFACT_SCHEMA_VERSION};
pub use config::{ConfigError, SessionConfig, ThroughputSource, DEFAULT_MIGRATION_THROUGHPUT_BPS};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
