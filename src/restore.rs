//! Restore planning.
//!
//! A restore replays the selected operations in recording order and
//! re-inserts migrated values. Planning simulates the namespace version by
//! version so that every replayed operation sees exactly the versions it saw
//! originally, and the namespace ends at the checkpointed live versions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::graph::DependencyGraph;
use crate::types::{OperationId, StateVersionId};

/// Error type for restore planning.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RestoreError {
    /// A replayed operation reads a version that is neither migrated nor
    /// produced earlier in the plan.
    #[error(
        "{operation} requires '{name}' version {version}, which the checkpoint does not provide"
    )]
    MissingDependency {
        /// Operation that cannot run.
        operation: OperationId,
        /// Missing name.
        name: String,
        /// Missing version of that name.
        version: u32,
    },
    /// A migrated version's payload is absent from the artifact.
    #[error("Missing payload for migrated {name} ({state_version})")]
    MissingPayload {
        /// Migrated version.
        state_version: StateVersionId,
        /// Its name.
        name: String,
    },
    /// A recomputed version is not produced by the replay.
    #[error("Replay does not produce {0}")]
    NotProduced(StateVersionId),
    /// Unknown operation id.
    #[error("Unknown operation: {0}")]
    UnknownOperation(OperationId),
    /// Unknown state version id.
    #[error("Unknown state version: {0}")]
    UnknownStateVersion(StateVersionId),
}

/// One restore action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RestoreStep {
    /// Insert a migrated payload into the namespace.
    Inject(StateVersionId),
    /// Re-execute an operation.
    Replay(OperationId),
}

/// Ordered restore actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePlan {
    /// Actions in execution order.
    pub steps: Vec<RestoreStep>,
}

impl RestorePlan {
    /// Operations to replay, in order.
    pub fn replay_order(&self) -> Vec<OperationId> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                RestoreStep::Replay(op) => Some(*op),
                RestoreStep::Inject(_) => None,
            })
            .collect()
    }

    /// Distinct migrated versions the plan injects.
    pub fn injected(&self) -> BTreeSet<StateVersionId> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                RestoreStep::Inject(sv) => Some(*sv),
                RestoreStep::Replay(_) => None,
            })
            .collect()
    }
}

/// Plan a restore of `migrate ∪ recompute` by replaying `replay`.
///
/// Migrated values are injected just before the first replayed operation
/// that reads them, and again at the end if a replay overwrote their name.
/// Fails before producing any step if an input cannot be provided.
pub fn plan(
    graph: &DependencyGraph,
    migrate: &BTreeSet<StateVersionId>,
    recompute: &BTreeSet<StateVersionId>,
    replay: &BTreeSet<OperationId>,
) -> Result<RestorePlan, RestoreError> {
    let mut steps = Vec::new();
    // Simulated namespace: name -> version currently bound.
    let mut bound: BTreeMap<String, StateVersionId> = BTreeMap::new();

    for op_id in replay {
        let op = graph
            .operation(*op_id)
            .ok_or(RestoreError::UnknownOperation(*op_id))?;

        for input in &op.inputs {
            let sv = graph
                .state_version(*input)
                .ok_or(RestoreError::UnknownStateVersion(*input))?;
            if bound.get(&sv.name) == Some(input) {
                continue;
            }
            if !migrate.contains(input) {
                return Err(RestoreError::MissingDependency {
                    operation: *op_id,
                    name: sv.name.clone(),
                    version: sv.version,
                });
            }
            steps.push(RestoreStep::Inject(*input));
            bound.insert(sv.name.clone(), *input);
        }

        steps.push(RestoreStep::Replay(*op_id));
        for output in &op.outputs {
            let sv = graph
                .state_version(*output)
                .ok_or(RestoreError::UnknownStateVersion(*output))?;
            bound.insert(sv.name.clone(), *output);
        }
        for name in &op.deleted {
            bound.remove(name);
        }
    }

    for id in recompute {
        let sv = graph
            .state_version(*id)
            .ok_or(RestoreError::UnknownStateVersion(*id))?;
        if bound.get(&sv.name) != Some(id) {
            return Err(RestoreError::NotProduced(*id));
        }
    }

    for id in migrate {
        let sv = graph
            .state_version(*id)
            .ok_or(RestoreError::UnknownStateVersion(*id))?;
        if bound.get(&sv.name) != Some(id) {
            steps.push(RestoreStep::Inject(*id));
            bound.insert(sv.name.clone(), *id);
        }
    }

    tracing::debug!(
        steps = steps.len(),
        replayed = replay.len(),
        "restore plan built"
    );

    Ok(RestorePlan { steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintSummary;
    use crate::graph::OutputState;
    use crate::types::OperationMeta;

    fn record(
        graph: &mut DependencyGraph,
        inputs: &[&str],
        outputs: &[&str],
        deleted: &[&str],
    ) -> OperationId {
        let outs = outputs
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    OutputState {
                        size_bytes: 8,
                        fingerprint: FingerprintSummary {
                            content_hash: "0".repeat(16),
                            identity_count: 1,
                            unserializable: false,
                        },
                    },
                )
            })
            .collect();
        graph
            .record(
                OperationMeta::new("cell", 1.0),
                &inputs.iter().map(|s| s.to_string()).collect(),
                outs,
                &deleted.iter().map(|s| s.to_string()).collect(),
            )
            .unwrap()
    }

    fn set<T: Ord + Copy>(items: &[T]) -> BTreeSet<T> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_injects_migrated_input_before_replay() {
        let mut graph = DependencyGraph::new();
        record(&mut graph, &[], &["x"], &[]);
        let op2 = record(&mut graph, &["x"], &["y"], &[]);
        let x = graph.live_version("x").unwrap().id;
        let y = graph.live_version("y").unwrap().id;

        let plan = plan(&graph, &set(&[x]), &set(&[y]), &set(&[op2])).unwrap();
        assert_eq!(
            plan.steps,
            vec![RestoreStep::Inject(x), RestoreStep::Replay(op2)]
        );
    }

    #[test]
    fn test_reinjects_value_clobbered_by_replay() {
        let mut graph = DependencyGraph::new();
        // op1 produces a and b; b is later overwritten and migrated.
        let op1 = record(&mut graph, &[], &["a", "b"], &[]);
        record(&mut graph, &[], &["b"], &[]);
        let a = graph.live_version("a").unwrap().id;
        let b = graph.live_version("b").unwrap().id;

        let plan = plan(&graph, &set(&[b]), &set(&[a]), &set(&[op1])).unwrap();
        assert_eq!(
            plan.steps,
            vec![RestoreStep::Replay(op1), RestoreStep::Inject(b)]
        );
    }

    #[test]
    fn test_orders_replay_by_recording_order() {
        let mut graph = DependencyGraph::new();
        let op1 = record(&mut graph, &[], &["x"], &[]);
        let op2 = record(&mut graph, &["x"], &["y"], &[]);
        let op3 = record(&mut graph, &["y"], &["z"], &[]);
        let live: Vec<_> = graph.live_ids();

        let recompute: BTreeSet<_> = live.into_iter().collect();
        let plan = plan(&graph, &BTreeSet::new(), &recompute, &set(&[op3, op1, op2])).unwrap();
        assert_eq!(plan.replay_order(), vec![op1, op2, op3]);
        assert!(plan.injected().is_empty());
    }

    #[test]
    fn test_missing_deleted_dependency_is_reported() {
        let mut graph = DependencyGraph::new();
        record(&mut graph, &[], &["x"], &[]);
        let op2 = record(&mut graph, &["x"], &["y"], &[]);
        record(&mut graph, &[], &[], &["x"]);
        let y = graph.live_version("y").unwrap().id;

        // The creator of the deleted x is absent from the replay set.
        let err = plan(&graph, &BTreeSet::new(), &set(&[y]), &set(&[op2])).unwrap_err();
        assert_eq!(
            err,
            RestoreError::MissingDependency {
                operation: op2,
                name: "x".to_string(),
                version: 1,
            }
        );
    }

    #[test]
    fn test_recompute_without_creator_is_rejected() {
        let mut graph = DependencyGraph::new();
        record(&mut graph, &[], &["x"], &[]);
        let x = graph.live_version("x").unwrap().id;
        let err = plan(&graph, &BTreeSet::new(), &set(&[x]), &BTreeSet::new()).unwrap_err();
        assert_eq!(err, RestoreError::NotProduced(x));
    }
}
