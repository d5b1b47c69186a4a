//! Append-only dependency graph of operations and state versions.
//!
//! Operations and state versions are stored densely by id, so an id is also
//! its position in recording order. Superseded and deleted versions stay in
//! the graph: recompute paths recorded before a deletion remain replayable.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fingerprint::FingerprintSummary;
use crate::types::{Operation, OperationId, OperationMeta, StateVersion, StateVersionId};

/// Error type for graph operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Runtime is negative or not finite.
    #[error("Invalid runtime for operation: {0}")]
    InvalidRuntime(f64),
    /// A name is both produced and deleted by one operation.
    #[error("Name '{0}' is both an output and deleted")]
    OutputDeleted(String),
    /// Unknown state version id.
    #[error("Unknown state version: {0}")]
    UnknownStateVersion(StateVersionId),
    /// Unknown operation id.
    #[error("Unknown operation: {0}")]
    UnknownOperation(OperationId),
    /// Regenerating a version requires replaying an operation that must not
    /// be replayed.
    #[error("{state_version} depends on non-replayable {operation}")]
    NotReplayable {
        /// Version being regenerated.
        state_version: StateVersionId,
        /// Blocking operation.
        operation: OperationId,
    },
    /// Structural corruption (dangling edge, temporal cycle).
    #[error("Corrupt dependency graph: {0}")]
    Corrupt(String),
}

/// State of one output name handed to [`DependencyGraph::record`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputState {
    /// Estimated serialized size.
    pub size_bytes: u64,
    /// Fingerprint digest.
    pub fingerprint: FingerprintSummary,
}

/// The session's operation/state-version history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    operations: Vec<Operation>,
    state_versions: Vec<StateVersion>,
    /// Every version ever recorded per name, oldest first.
    history: BTreeMap<String, Vec<StateVersionId>>,
    /// Current version of each live name.
    live: BTreeMap<String, StateVersionId>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one executed operation.
    ///
    /// Inputs are resolved against the live set before any output or
    /// deletion of the same operation is applied. Input names that are not
    /// live are names the graph never tracked and are skipped.
    ///
    /// The caller passes only outputs that were created or changed; each
    /// gets a new version chained after the name's previous one.
    pub fn record(
        &mut self,
        meta: OperationMeta,
        inputs: &BTreeSet<String>,
        outputs: BTreeMap<String, OutputState>,
        deleted: &BTreeSet<String>,
    ) -> Result<OperationId, GraphError> {
        if !meta.runtime_secs.is_finite() || meta.runtime_secs < 0.0 {
            return Err(GraphError::InvalidRuntime(meta.runtime_secs));
        }
        if let Some(name) = outputs.keys().find(|name| deleted.contains(*name)) {
            return Err(GraphError::OutputDeleted(name.clone()));
        }

        let op_id = OperationId::new(self.operations.len() as u64);

        let mut input_ids = Vec::with_capacity(inputs.len());
        for name in inputs {
            match self.live.get(name) {
                Some(id) => input_ids.push(*id),
                None => tracing::debug!(name = %name, operation = %op_id, "input name not tracked"),
            }
        }

        let now = Utc::now();
        let mut output_ids = Vec::with_capacity(outputs.len());
        for (name, state) in outputs {
            let id = StateVersionId::new(self.state_versions.len() as u64);
            let chain = self.history.entry(name.clone()).or_default();
            let previous = chain.last().copied();
            let version = chain.len() as u32 + 1;
            chain.push(id);

            self.state_versions.push(StateVersion {
                id,
                name: name.clone(),
                version,
                previous,
                creator: op_id,
                size_bytes: state.size_bytes,
                fingerprint: state.fingerprint,
                created_at: now,
            });
            self.live.insert(name, id);
            output_ids.push(id);
        }

        let mut deleted_names = Vec::with_capacity(deleted.len());
        for name in deleted {
            if self.live.remove(name).is_some() {
                deleted_names.push(name.clone());
            } else {
                tracing::debug!(name = %name, operation = %op_id, "deleted name not tracked");
            }
        }

        self.operations.push(Operation {
            id: op_id,
            code: meta.code,
            runtime_secs: meta.runtime_secs,
            started_at: meta.started_at,
            replayable: meta.replayable,
            inputs: input_ids,
            outputs: output_ids,
            deleted: deleted_names,
        });

        Ok(op_id)
    }

    /// Look up an operation.
    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(id.index())
    }

    /// Look up a state version.
    pub fn state_version(&self, id: StateVersionId) -> Option<&StateVersion> {
        self.state_versions.get(id.index())
    }

    /// The operation that created a state version.
    pub fn creator(&self, id: StateVersionId) -> Option<&Operation> {
        self.state_version(id)
            .and_then(|sv| self.operation(sv.creator))
    }

    /// Current version of a live name.
    pub fn live_version(&self, name: &str) -> Option<&StateVersion> {
        self.live.get(name).and_then(|id| self.state_version(*id))
    }

    /// Whether `id` is the current version of its name.
    pub fn is_live(&self, id: StateVersionId) -> bool {
        self.state_version(id)
            .and_then(|sv| self.live.get(&sv.name))
            .map(|live| *live == id)
            .unwrap_or(false)
    }

    /// Ids of all live versions, ascending.
    pub fn live_ids(&self) -> Vec<StateVersionId> {
        let mut ids: Vec<_> = self.live.values().copied().collect();
        ids.sort();
        ids
    }

    /// Live names in order.
    pub fn live_names(&self) -> impl Iterator<Item = &str> {
        self.live.keys().map(String::as_str)
    }

    /// All versions ever recorded for a name, oldest first.
    pub fn history(&self, name: &str) -> &[StateVersionId] {
        self.history.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All operations in recording order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// All state versions in recording order.
    pub fn state_versions(&self) -> &[StateVersion] {
        &self.state_versions
    }

    /// Number of operations.
    pub fn num_operations(&self) -> usize {
        self.operations.len()
    }

    /// Number of state versions.
    pub fn num_state_versions(&self) -> usize {
        self.state_versions.len()
    }

    /// Operations that must be replayed to regenerate `id`, assuming every
    /// live version is available (migrated or itself recomputed).
    pub fn replay_closure(&self, id: StateVersionId) -> Result<BTreeSet<OperationId>, GraphError> {
        let live: BTreeSet<StateVersionId> = self.live.values().copied().collect();
        self.replay_closure_within(id, &live)
    }

    /// Operations that must be replayed to regenerate `id` when only the
    /// `provided` versions are restored without replay.
    ///
    /// Any other input, live or not, can only come from replaying its
    /// creator, so the closure follows it transitively.
    pub fn replay_closure_within(
        &self,
        id: StateVersionId,
        provided: &BTreeSet<StateVersionId>,
    ) -> Result<BTreeSet<OperationId>, GraphError> {
        let sv = self
            .state_version(id)
            .ok_or(GraphError::UnknownStateVersion(id))?;

        let mut closure = BTreeSet::new();
        let mut stack = vec![sv.creator];
        while let Some(op_id) = stack.pop() {
            if !closure.insert(op_id) {
                continue;
            }
            let op = self
                .operation(op_id)
                .ok_or(GraphError::UnknownOperation(op_id))?;
            if !op.replayable {
                return Err(GraphError::NotReplayable {
                    state_version: id,
                    operation: op_id,
                });
            }
            for input in &op.inputs {
                if provided.contains(input) {
                    continue;
                }
                let input_sv = self
                    .state_version(*input)
                    .ok_or(GraphError::UnknownStateVersion(*input))?;
                stack.push(input_sv.creator);
            }
        }
        Ok(closure)
    }

    /// Check structural integrity.
    ///
    /// Verifies dense ids, that every edge points at an existing node, that
    /// creators and outputs agree, that version chains are well formed, and
    /// that operations only read versions created by strictly earlier
    /// operations (which rules out cycles).
    pub fn validate(&self) -> Result<(), GraphError> {
        for (index, op) in self.operations.iter().enumerate() {
            if op.id.index() != index {
                return Err(GraphError::Corrupt(format!("{} stored at position {index}", op.id)));
            }
            for input in &op.inputs {
                let sv = self.state_version(*input).ok_or_else(|| {
                    GraphError::Corrupt(format!("{} reads missing {input}", op.id))
                })?;
                if sv.creator >= op.id {
                    return Err(GraphError::Corrupt(format!(
                        "{} reads {input} created by later {}",
                        op.id, sv.creator
                    )));
                }
            }
            for output in &op.outputs {
                let sv = self.state_version(*output).ok_or_else(|| {
                    GraphError::Corrupt(format!("{} writes missing {output}", op.id))
                })?;
                if sv.creator != op.id {
                    return Err(GraphError::Corrupt(format!(
                        "{output} listed by {} but created by {}",
                        op.id, sv.creator
                    )));
                }
            }
        }

        for (index, sv) in self.state_versions.iter().enumerate() {
            if sv.id.index() != index {
                return Err(GraphError::Corrupt(format!("{} stored at position {index}", sv.id)));
            }
            let creator = self.operation(sv.creator).ok_or_else(|| {
                GraphError::Corrupt(format!("{} has missing creator {}", sv.id, sv.creator))
            })?;
            if !creator.outputs.contains(&sv.id) {
                return Err(GraphError::Corrupt(format!(
                    "{} not listed as output of its creator {}",
                    sv.id, sv.creator
                )));
            }
            if let Some(previous) = sv.previous {
                let prev = self.state_version(previous).ok_or_else(|| {
                    GraphError::Corrupt(format!("{} chains to missing {previous}", sv.id))
                })?;
                if prev.name != sv.name || previous >= sv.id {
                    return Err(GraphError::Corrupt(format!(
                        "{} has malformed version chain",
                        sv.id
                    )));
                }
            }
        }

        for (name, chain) in &self.history {
            for id in chain {
                match self.state_version(*id) {
                    Some(sv) if sv.name == *name => {}
                    _ => {
                        return Err(GraphError::Corrupt(format!(
                            "history of '{name}' references {id}"
                        )))
                    }
                }
            }
        }

        for (name, id) in &self.live {
            if self.history(name).last() != Some(id) {
                return Err(GraphError::Corrupt(format!(
                    "live '{name}' is not the latest version"
                )));
            }
        }

        Ok(())
    }
}
