//! Checkpoint/restore orchestration for one interactive session.
//!
//! A [`Session`] owns all per-session tracking state: the dependency graph,
//! the fingerprint of every tracked name, and the set of names bound to
//! user-defined functions. It is driven by a single writer in the order
//! "operation executes → [`Session::record`] → eventually
//! [`Session::checkpoint`]".

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::artifact::{ArtifactError, CheckpointArtifact};
use crate::config::{ConfigError, SessionConfig};
use crate::fingerprint::{self, Change, Fingerprint};
use crate::graph::{DependencyGraph, GraphError, OutputState};
use crate::object::{Namespace, Object, ObjectId};
use crate::optimizer::{OptimizerError, Strategy};
use crate::restore::RestorePlan;
use crate::types::{ClosureViolation, OperationId, OperationMeta, Partition};

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Graph update failed.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    /// Selection failed.
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A selected partition breaks the closure invariant. Fatal for the
    /// checkpoint.
    #[error("Partition violates recomputability closure: {0}")]
    Closure(#[from] ClosureViolation),
    /// Artifact could not be used.
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// One executed unit of work, as reported by the execution environment.
#[derive(Debug, Clone)]
pub struct ExecutedUnit<'a> {
    /// Source text of the unit.
    pub code: &'a str,
    /// Names bound before execution.
    pub pre_names: &'a BTreeSet<String>,
    /// Namespace after execution.
    pub namespace: &'a Namespace,
    /// Names the unit may have read, as inferred by the host.
    pub input_names: BTreeSet<String>,
    /// Elapsed wall-clock time in seconds.
    pub runtime_secs: f64,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// False if the unit had external side effects.
    pub replayable: bool,
}

impl<'a> ExecutedUnit<'a> {
    /// Describe a replayable unit started now.
    pub fn new(
        code: &'a str,
        pre_names: &'a BTreeSet<String>,
        namespace: &'a Namespace,
        runtime_secs: f64,
    ) -> Self {
        Self {
            code,
            pre_names,
            namespace,
            input_names: BTreeSet::new(),
            runtime_secs,
            started_at: Utc::now(),
            replayable: true,
        }
    }

    /// Set the inferred input names.
    pub fn with_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the unit as having external side effects.
    pub fn with_side_effects(mut self) -> Self {
        self.replayable = false;
        self
    }
}

/// Result of a checkpoint: what to persist and what to replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Session the checkpoint belongs to.
    pub session_id: Uuid,
    /// Graph structure at checkpoint time.
    pub graph: DependencyGraph,
    /// Selected partition.
    pub partition: Partition,
    /// Strategy that produced the partition.
    pub strategy: Strategy,
}

/// Per-session tracking state.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    graph: DependencyGraph,
    fingerprints: BTreeMap<String, Fingerprint>,
    functions: BTreeSet<String>,
}

impl Session {
    /// Start a new session.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.cost_model()?;
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            graph: DependencyGraph::new(),
            fingerprints: BTreeMap::new(),
            functions: BTreeSet::new(),
        })
    }

    /// Resume from a checkpoint artifact.
    ///
    /// Returns the session together with the plan the host must execute to
    /// rebuild the namespace. The fingerprint store starts empty; values are
    /// fingerprinted again by [`Session::observe`].
    pub fn resume(
        artifact: &CheckpointArtifact,
        config: SessionConfig,
    ) -> Result<(Self, RestorePlan), SessionError> {
        config.cost_model()?;
        artifact.verify()?;
        let plan = artifact.restore_plan()?;
        let session = Self {
            id: artifact.session_id,
            config,
            graph: artifact.graph.clone(),
            fingerprints: BTreeMap::new(),
            functions: BTreeSet::new(),
        };
        tracing::info!(
            session = %session.id,
            operations = session.graph.num_operations(),
            steps = plan.steps.len(),
            "session resumed from artifact"
        );
        Ok((session, plan))
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Current configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Fingerprint of a tracked name.
    pub fn fingerprint(&self, name: &str) -> Option<&Fingerprint> {
        self.fingerprints.get(name)
    }

    /// Names currently bound to user-defined functions.
    ///
    /// The input-inference collaborator uses these to expand calls into the
    /// globals the function body reads.
    pub fn functions(&self) -> &BTreeSet<String> {
        &self.functions
    }

    /// Change the selection strategy.
    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.config.strategy = strategy;
    }

    /// Override migration throughput.
    pub fn set_manual_throughput(&mut self, bps: f64) -> Result<(), SessionError> {
        self.config.set_manual_throughput(bps)?;
        Ok(())
    }

    /// Feed a profiled throughput; ignored after a manual override.
    pub fn set_profiled_throughput(&mut self, bps: f64) -> Result<bool, SessionError> {
        Ok(self.config.apply_profiled_throughput(bps)?)
    }

    /// Fingerprint every live name that has no fingerprint yet.
    ///
    /// The host calls this before running a unit when the session was
    /// resumed; checkpointing calls it implicitly.
    pub fn observe(&mut self, namespace: &Namespace) {
        let missing: Vec<(String, ObjectId)> = self
            .graph
            .live_names()
            .filter(|name| !self.fingerprints.contains_key(*name))
            .filter_map(|name| namespace.get(name).map(|id| (name.to_string(), id)))
            .collect();
        if missing.is_empty() {
            return;
        }
        tracing::debug!(count = missing.len(), "fingerprinting untracked live names");
        let fresh = fingerprint::construct_many(
            &namespace.heap,
            &missing,
            self.config.fingerprint_limits,
        );
        for (name, fp) in fresh {
            self.track_function(&name, namespace, fp.root);
            self.fingerprints.insert(name, fp);
        }
    }

    /// Record one executed unit into the dependency graph.
    ///
    /// Created and deleted names come from diffing the namespace's names
    /// before and after. Every tracked name is re-fingerprinted:
    ///
    /// - in-place mutation: new version, and the name counts as read
    /// - rebinding: new version
    /// - unserializable value sharing objects with something read: assumed
    ///   mutated, new version
    pub fn record(&mut self, unit: ExecutedUnit<'_>) -> Result<OperationId, SessionError> {
        let limits = self.config.fingerprint_limits;
        let namespace = unit.namespace;
        let post_names = namespace.names();

        let created: BTreeSet<String> = post_names.difference(unit.pre_names).cloned().collect();
        let deleted: BTreeSet<String> = unit.pre_names.difference(&post_names).cloned().collect();

        // Objects reachable from what the unit read, as last observed.
        let mut read_identities = BTreeSet::new();
        for name in &unit.input_names {
            if let Some(fp) = self.fingerprints.get(name) {
                read_identities.extend(fp.identities.iter().copied());
            }
        }

        let mut inputs = unit.input_names.clone();
        let mut modified: BTreeSet<String> = BTreeSet::new();
        let mut refreshed: Vec<(String, Fingerprint)> = Vec::new();

        for (name, old) in &self.fingerprints {
            if created.contains(name) || deleted.contains(name) {
                continue;
            }
            let Some(root) = namespace.get(name) else {
                continue;
            };
            let comparison =
                fingerprint::compare(old, &namespace.heap, root, &read_identities, limits);
            match comparison.change {
                Change::Unchanged => continue,
                Change::Mutated => {
                    inputs.insert(name.clone());
                }
                Change::Overwritten | Change::Aliased => {}
            }
            tracing::debug!(name = %name, change = ?comparison.change, "tracked value changed");
            modified.insert(name.clone());
            refreshed.push((name.clone(), comparison.current));
        }

        let created_roots: Vec<(String, ObjectId)> = created
            .iter()
            .filter_map(|name| namespace.get(name).map(|id| (name.clone(), id)))
            .collect();
        refreshed.extend(fingerprint::construct_many(&namespace.heap, &created_roots, limits));

        let outputs: BTreeMap<String, OutputState> = refreshed
            .iter()
            .map(|(name, fp)| {
                (
                    name.clone(),
                    OutputState {
                        size_bytes: fp.estimated_size,
                        fingerprint: fp.summary(),
                    },
                )
            })
            .collect();

        let meta = OperationMeta {
            code: unit.code.to_string(),
            runtime_secs: unit.runtime_secs,
            started_at: unit.started_at,
            replayable: unit.replayable,
        };
        let output_count = outputs.len();
        // Tracked state only moves once the graph has accepted the operation.
        let op_id = self.graph.record(meta, &inputs, outputs, &deleted)?;

        for name in &deleted {
            self.fingerprints.remove(name);
            self.functions.remove(name);
        }
        for (name, fp) in refreshed {
            self.track_function(&name, namespace, fp.root);
            self.fingerprints.insert(name, fp);
        }

        tracing::info!(
            session = %self.id,
            operation = %op_id,
            inputs = inputs.len(),
            created = created.len(),
            modified = modified.len(),
            deleted = deleted.len(),
            outputs = output_count,
            runtime_secs = unit.runtime_secs,
            "recorded operation"
        );

        Ok(op_id)
    }

    /// Select what to migrate and what to recompute for all live state.
    ///
    /// Checkpointing twice with no operation in between yields the same
    /// partition.
    pub fn checkpoint(&mut self, namespace: &Namespace) -> Result<Checkpoint, SessionError> {
        self.observe(namespace);

        let cost = self.config.cost_model()?;
        let live = self.graph.live_ids();
        let strategy = self.config.strategy;
        let partition = strategy.select(&self.graph, &live, &cost)?;
        partition.verify_closure(&self.graph)?;

        for id in partition.forced_recompute.iter().chain(&partition.forced_migrate) {
            if let Some(sv) = self.graph.state_version(*id) {
                tracing::warn!(
                    name = %sv.name,
                    state_version = %id,
                    "strategy choice overridden for feasibility"
                );
            }
        }
        tracing::info!(
            session = %self.id,
            strategy = %strategy,
            alpha = cost.alpha(),
            throughput_bps = cost.throughput_bps(),
            migrate = partition.migrate.len(),
            recompute = partition.recompute.len(),
            replay = partition.replay.len(),
            total_cost_secs = partition.cost.total(),
            "checkpoint selected"
        );

        Ok(Checkpoint {
            session_id: self.id,
            graph: self.graph.clone(),
            partition,
            strategy,
        })
    }

    fn track_function(&mut self, name: &str, namespace: &Namespace, root: ObjectId) {
        match namespace.heap.get(root) {
            Some(Object::Function { .. }) => {
                self.functions.insert(name.to_string());
            }
            _ => {
                self.functions.remove(name);
            }
        }
    }
}
