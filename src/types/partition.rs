//! Migrate/recompute partition produced by the optimizer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::operation::OperationId;
use super::state::StateVersionId;
use crate::graph::DependencyGraph;

/// Estimated cost of a partition, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionCost {
    /// Time to persist and reload the migrated payloads.
    pub migration_secs: f64,
    /// α-scaled time to replay the operations.
    pub recomputation_secs: f64,
}

impl PartitionCost {
    /// Total estimated cost.
    pub fn total(&self) -> f64 {
        self.migration_secs + self.recomputation_secs
    }
}

/// Split of the live state into MIGRATE and RECOMPUTE.
///
/// `replay` holds every operation that must be re-executed on restore; this
/// includes operations whose outputs are no longer live but are needed as
/// inputs further down the chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Versions whose payload is persisted.
    pub migrate: BTreeSet<StateVersionId>,
    /// Versions regenerated by replay.
    pub recompute: BTreeSet<StateVersionId>,
    /// Operations to replay, in id (temporal) order.
    pub replay: BTreeSet<OperationId>,
    /// Versions migrated only because they could not be recomputed.
    pub forced_migrate: BTreeSet<StateVersionId>,
    /// Versions recomputed only because they could not be migrated.
    pub forced_recompute: BTreeSet<StateVersionId>,
    /// Estimated cost.
    pub cost: PartitionCost,
}

/// A breach of the recomputability closure invariant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClosureViolation {
    /// A live version is in neither set.
    #[error("Live state version {0} is neither migrated nor recomputed")]
    Uncovered(StateVersionId),
    /// A version is in both sets.
    #[error("State version {0} is both migrated and recomputed")]
    Overlap(StateVersionId),
    /// A partitioned version is not live or does not exist.
    #[error("State version {0} is not live")]
    NotLive(StateVersionId),
    /// An unserializable version was selected for migration.
    #[error("State version {0} is unserializable but marked for migration")]
    UnserializableMigrated(StateVersionId),
    /// A recomputed version's creator is not replayed.
    #[error("Recomputed {state_version} requires {operation}, which is not replayed")]
    CreatorNotReplayed {
        /// Recomputed version.
        state_version: StateVersionId,
        /// Its creator.
        operation: OperationId,
    },
    /// A replayed operation is unknown or marked non-replayable.
    #[error("Operation {0} cannot be replayed")]
    NotReplayable(OperationId),
    /// A replayed operation reads a version nothing provides.
    #[error("Replayed {operation} reads {input}, which is neither migrated nor recomputed")]
    UnresolvedInput {
        /// Replayed operation.
        operation: OperationId,
        /// Unavailable input.
        input: StateVersionId,
    },
}

impl Partition {
    /// Check the recomputability closure against `graph` for all live
    /// state.
    pub fn verify_closure(&self, graph: &DependencyGraph) -> Result<(), ClosureViolation> {
        self.verify_closure_of(graph, &graph.live_ids())
    }

    /// Check the recomputability closure for the `requested` live versions.
    ///
    /// Every requested version must be in exactly one set; every recomputed
    /// version's creator must be replayed; every replayed operation's inputs
    /// must be migrated, recomputed, or produced by another replayed
    /// operation.
    pub fn verify_closure_of(
        &self,
        graph: &DependencyGraph,
        requested: &[StateVersionId],
    ) -> Result<(), ClosureViolation> {
        if let Some(id) = self.migrate.intersection(&self.recompute).next() {
            return Err(ClosureViolation::Overlap(*id));
        }

        for id in requested {
            if !self.migrate.contains(id) && !self.recompute.contains(id) {
                return Err(ClosureViolation::Uncovered(*id));
            }
        }

        for id in &self.migrate {
            let sv = graph
                .state_version(*id)
                .filter(|_| graph.is_live(*id))
                .ok_or(ClosureViolation::NotLive(*id))?;
            if sv.is_unserializable() {
                return Err(ClosureViolation::UnserializableMigrated(*id));
            }
        }

        for id in &self.recompute {
            let sv = graph
                .state_version(*id)
                .filter(|_| graph.is_live(*id))
                .ok_or(ClosureViolation::NotLive(*id))?;
            if !self.replay.contains(&sv.creator) {
                return Err(ClosureViolation::CreatorNotReplayed {
                    state_version: *id,
                    operation: sv.creator,
                });
            }
        }

        for op_id in &self.replay {
            let op = graph
                .operation(*op_id)
                .filter(|op| op.replayable)
                .ok_or(ClosureViolation::NotReplayable(*op_id))?;
            for input in &op.inputs {
                let resolved = self.migrate.contains(input)
                    || self.recompute.contains(input)
                    || graph
                        .state_version(*input)
                        .is_some_and(|sv| self.replay.contains(&sv.creator));
                if !resolved {
                    return Err(ClosureViolation::UnresolvedInput {
                        operation: *op_id,
                        input: *input,
                    });
                }
            }
        }

        Ok(())
    }

    /// Number of partitioned versions.
    pub fn len(&self) -> usize {
        self.migrate.len() + self.recompute.len()
    }

    /// Whether nothing is partitioned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
