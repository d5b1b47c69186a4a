//! Migrate/recompute selection.
//!
//! Every strategy answers the same question: given the live state versions,
//! which should be persisted and which regenerated? All of them return a
//! [`Partition`] satisfying the recomputability closure, and share the cost
//! model and the closure computation; only the selection policy differs.
//!
//! | Strategy | α | Policy |
//! |---|---|---|
//! | `exact` | 1 | minimum total cost |
//! | `exact-conservative` | 20 | minimum cost, biased toward migration |
//! | `exact-aggressive` | 0.05 | minimum cost, biased toward recomputation |
//! | `migrate-all` | - | migrate everything serializable |
//! | `recompute-all` | - | recompute everything resolvable |

pub mod baseline;
pub mod exact;
pub mod mincut;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cost::CostModel;
use crate::graph::DependencyGraph;
use crate::types::{Partition, StateVersion, StateVersionId};

/// Error type for selection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizerError {
    /// A requested id does not exist.
    #[error("Unknown state version: {0}")]
    UnknownStateVersion(StateVersionId),
    /// A requested version is not the live version of its name.
    #[error("State version {0} is not live")]
    NotLive(StateVersionId),
    /// No feasible partition: these versions can be neither migrated nor
    /// recomputed.
    #[error("Unresolvable state versions: {}", names.join(", "))]
    Unresolvable {
        /// Affected versions.
        state_versions: Vec<StateVersionId>,
        /// Their `name@version` labels.
        names: Vec<String>,
    },
}

/// Selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Minimum-cost partition.
    Exact,
    /// Minimum-cost partition with a migration bias (α = 20).
    ExactConservative,
    /// Minimum-cost partition with a recomputation bias (α = 0.05).
    ExactAggressive,
    /// Migrate every live version.
    MigrateAll,
    /// Recompute every live version whose chain is resolvable.
    RecomputeAll,
}

impl Strategy {
    /// Parse a strategy name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "exact-conservative" | "exact_c" => Some(Self::ExactConservative),
            "exact-aggressive" | "exact_r" => Some(Self::ExactAggressive),
            "migrate-all" | "migrate_all" => Some(Self::MigrateAll),
            "recompute-all" | "recompute_all" => Some(Self::RecomputeAll),
            _ => None,
        }
    }

    /// α used when none is configured explicitly.
    pub fn default_alpha(&self) -> f64 {
        match self {
            Self::ExactConservative => 20.0,
            Self::ExactAggressive => 0.05,
            Self::Exact | Self::MigrateAll | Self::RecomputeAll => 1.0,
        }
    }

    /// Partition the `live` versions of `graph`.
    pub fn select(
        &self,
        graph: &DependencyGraph,
        live: &[StateVersionId],
        cost: &CostModel,
    ) -> Result<Partition, OptimizerError> {
        match self {
            Self::Exact | Self::ExactConservative | Self::ExactAggressive => {
                exact::select(graph, live, cost)
            }
            Self::MigrateAll => baseline::migrate_all(graph, live, cost),
            Self::RecomputeAll => baseline::recompute_all(graph, live, cost),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Exact
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::ExactConservative => write!(f, "exact-conservative"),
            Self::ExactAggressive => write!(f, "exact-aggressive"),
            Self::MigrateAll => write!(f, "migrate-all"),
            Self::RecomputeAll => write!(f, "recompute-all"),
        }
    }
}

/// Resolve and deduplicate the requested ids, rejecting unknown or
/// superseded versions.
fn resolve_live<'g>(
    graph: &'g DependencyGraph,
    live: &[StateVersionId],
) -> Result<Vec<&'g StateVersion>, OptimizerError> {
    let ids: BTreeSet<_> = live.iter().copied().collect();
    ids.into_iter()
        .map(|id| {
            let sv = graph
                .state_version(id)
                .ok_or(OptimizerError::UnknownStateVersion(id))?;
            if !graph.is_live(id) {
                return Err(OptimizerError::NotLive(id));
            }
            Ok(sv)
        })
        .collect()
}

fn unresolvable(graph: &DependencyGraph, ids: Vec<StateVersionId>) -> OptimizerError {
    let names = ids
        .iter()
        .filter_map(|id| graph.state_version(*id))
        .map(StateVersion::label)
        .collect();
    OptimizerError::Unresolvable {
        state_versions: ids,
        names,
    }
}

/// Build the final partition: derive the replay set from the recomputed
/// versions and price the plan.
///
/// `migrate ∪ recompute` is the requested set; inputs outside it are
/// regenerated by replay even when live.
fn assemble(
    graph: &DependencyGraph,
    cost: &CostModel,
    migrate: BTreeSet<StateVersionId>,
    recompute: BTreeSet<StateVersionId>,
    forced_migrate: BTreeSet<StateVersionId>,
    forced_recompute: BTreeSet<StateVersionId>,
) -> Result<Partition, OptimizerError> {
    let provided: BTreeSet<StateVersionId> = migrate.union(&recompute).copied().collect();
    let mut replay = BTreeSet::new();
    let mut blocked = Vec::new();
    for id in &recompute {
        match graph.replay_closure_within(*id, &provided) {
            Ok(ops) => replay.extend(ops),
            Err(_) => blocked.push(*id),
        }
    }
    if !blocked.is_empty() {
        return Err(unresolvable(graph, blocked));
    }

    let cost = cost.partition_cost(graph, &migrate, &replay);
    Ok(Partition {
        migrate,
        recompute,
        replay,
        forced_migrate,
        forced_recompute,
        cost,
    })
}
