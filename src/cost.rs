//! Migration and recomputation cost estimates.
//!
//! Costs are in seconds. Migration throughput is a property of the
//! deployment (profiled or configured) and is supplied, not measured, here.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::graph::DependencyGraph;
use crate::types::{OperationId, PartitionCost, StateVersion, StateVersionId};

/// Error type for cost model construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CostError {
    /// Throughput must be positive and finite.
    #[error("Invalid migration throughput: {0} bytes/s")]
    InvalidThroughput(f64),
    /// α must be positive and finite.
    #[error("Invalid recomputation scaling factor: {0}")]
    InvalidAlpha(f64),
}

/// Cost model parameters.
///
/// `alpha` scales every recomputation cost: values above 1 prefer
/// migration, values below 1 prefer recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    throughput_bps: f64,
    alpha: f64,
}

impl CostModel {
    /// Create a cost model.
    pub fn new(throughput_bps: f64, alpha: f64) -> Result<Self, CostError> {
        if !throughput_bps.is_finite() || throughput_bps <= 0.0 {
            return Err(CostError::InvalidThroughput(throughput_bps));
        }
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(CostError::InvalidAlpha(alpha));
        }
        Ok(Self {
            throughput_bps,
            alpha,
        })
    }

    /// Migration throughput in bytes per second.
    pub fn throughput_bps(&self) -> f64 {
        self.throughput_bps
    }

    /// Recomputation scaling factor.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Time to persist and reload a version, or `None` if it cannot be
    /// serialized.
    pub fn migration_cost(&self, sv: &StateVersion) -> Option<f64> {
        if sv.is_unserializable() {
            return None;
        }
        Some(sv.size_bytes as f64 / self.throughput_bps)
    }

    /// α-scaled replay time of a set of operations, each charged once.
    pub fn replay_cost(&self, graph: &DependencyGraph, ops: &BTreeSet<OperationId>) -> f64 {
        let runtime: f64 = ops
            .iter()
            .filter_map(|id| graph.operation(*id))
            .map(|op| op.runtime_secs)
            .sum();
        self.alpha * runtime
    }

    /// Standalone estimate of regenerating one version, or `None` if it
    /// cannot be regenerated.
    ///
    /// The creator's α-scaled runtime, plus for each of its inputs: the
    /// cheaper of migrating or recomputing it if it is live, otherwise the
    /// cost of recomputing it. Ancestors shared by several inputs are
    /// charged along each path; use [`CostModel::partition_cost`] for the
    /// cost of a whole plan.
    pub fn recomputation_cost(&self, graph: &DependencyGraph, id: StateVersionId) -> Option<f64> {
        let mut memo: HashMap<StateVersionId, Option<f64>> = HashMap::new();
        let mut open: HashSet<StateVersionId> = HashSet::new();
        // Post-order: a version is priced once all of its creator's inputs are.
        let mut stack = vec![(id, false)];

        while let Some((current, inputs_done)) = stack.pop() {
            if memo.contains_key(&current) {
                continue;
            }
            let creator = match graph.creator(current) {
                Some(op) if op.replayable => op,
                _ => {
                    memo.insert(current, None);
                    continue;
                }
            };

            if !inputs_done {
                if !open.insert(current) {
                    // Cyclic history; left unpriced.
                    continue;
                }
                stack.push((current, true));
                stack.extend(
                    creator
                        .inputs
                        .iter()
                        .filter(|input| !memo.contains_key(*input))
                        .map(|input| (*input, false)),
                );
                continue;
            }

            let mut total = Some(self.alpha * creator.runtime_secs);
            for input in &creator.inputs {
                let recompute = memo.get(input).copied().flatten();
                let resolved = if graph.is_live(*input) {
                    let migrate = graph
                        .state_version(*input)
                        .and_then(|sv| self.migration_cost(sv));
                    match (migrate, recompute) {
                        (Some(m), Some(r)) => Some(m.min(r)),
                        (m, r) => m.or(r),
                    }
                } else {
                    recompute
                };
                total = total.zip(resolved).map(|(t, r)| t + r);
            }
            memo.insert(current, total);
        }

        memo.get(&id).copied().flatten()
    }

    /// Cost of a complete plan: migration of every migrated version plus the
    /// α-scaled runtime of every replayed operation, each charged once.
    pub fn partition_cost(
        &self,
        graph: &DependencyGraph,
        migrate: &BTreeSet<StateVersionId>,
        replay: &BTreeSet<OperationId>,
    ) -> PartitionCost {
        let migration_secs = migrate
            .iter()
            .filter_map(|id| graph.state_version(*id))
            .filter_map(|sv| self.migration_cost(sv))
            .sum();
        PartitionCost {
            migration_secs,
            recomputation_secs: self.replay_cost(graph, replay),
        }
    }
}
