//! Baseline strategies: migrate everything, or recompute everything.
//!
//! Both keep the closure invariant by falling back per version: an
//! unserializable version cannot be migrated and a version behind a
//! non-replayable operation cannot be recomputed. Inputs outside the
//! requested versions count as unavailable and are replayed.

use std::collections::BTreeSet;

use crate::cost::CostModel;
use crate::graph::DependencyGraph;
use crate::types::{Partition, StateVersionId};

use super::{assemble, resolve_live, unresolvable, OptimizerError};

/// Migrate every live version.
///
/// Unserializable versions are recomputed instead when their chain is
/// resolvable and reported as unresolvable otherwise.
pub fn migrate_all(
    graph: &DependencyGraph,
    live: &[StateVersionId],
    cost: &CostModel,
) -> Result<Partition, OptimizerError> {
    let live_svs = resolve_live(graph, live)?;
    let requested: BTreeSet<StateVersionId> = live_svs.iter().map(|sv| sv.id).collect();

    let mut migrate = BTreeSet::new();
    let mut recompute = BTreeSet::new();
    let mut blocked = Vec::new();

    for sv in live_svs {
        if !sv.is_unserializable() {
            migrate.insert(sv.id);
            continue;
        }
        match graph.replay_closure_within(sv.id, &requested) {
            Ok(_) => {
                tracing::warn!(
                    state_version = %sv.id,
                    name = %sv.name,
                    "unserializable value cannot be migrated, recomputing instead"
                );
                recompute.insert(sv.id);
            }
            Err(_) => blocked.push(sv.id),
        }
    }

    if !blocked.is_empty() {
        return Err(unresolvable(graph, blocked));
    }

    let forced_recompute = recompute.clone();
    assemble(graph, cost, migrate, recompute, BTreeSet::new(), forced_recompute)
}

/// Recompute every live version whose full chain can be replayed.
///
/// Versions behind a non-replayable operation are migrated instead; if
/// they are also unserializable they are reported as unresolvable.
pub fn recompute_all(
    graph: &DependencyGraph,
    live: &[StateVersionId],
    cost: &CostModel,
) -> Result<Partition, OptimizerError> {
    let live_svs = resolve_live(graph, live)?;
    let requested: BTreeSet<StateVersionId> = live_svs.iter().map(|sv| sv.id).collect();

    let mut migrate = BTreeSet::new();
    let mut recompute = BTreeSet::new();
    let mut blocked = Vec::new();

    for sv in live_svs {
        match graph.replay_closure_within(sv.id, &requested) {
            Ok(_) => {
                recompute.insert(sv.id);
            }
            Err(_) if !sv.is_unserializable() => {
                tracing::warn!(
                    state_version = %sv.id,
                    name = %sv.name,
                    "chain not replayable, migrating instead"
                );
                migrate.insert(sv.id);
            }
            Err(_) => blocked.push(sv.id),
        }
    }

    if !blocked.is_empty() {
        return Err(unresolvable(graph, blocked));
    }

    let forced_migrate = migrate.clone();
    assemble(graph, cost, migrate, recompute, forced_migrate, BTreeSet::new())
}
