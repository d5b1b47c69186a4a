//! Checkpoint artifact: the persisted form of a checkpoint.
//!
//! An artifact holds the dependency graph, the selected partition, and one
//! payload per migrated state version. Payload bytes are opaque here; the
//! host serializes values however it likes and the artifact records a
//! SHA-256 digest of each payload.
//!
//! ## Verification on load
//!
//! [`CheckpointArtifact::from_json`] rejects an artifact when:
//! - the schema version differs from [`ARTIFACT_SCHEMA_VERSION`]
//! - the graph is structurally corrupt or its hash does not match
//! - a payload digest does not match its bytes
//! - the payload set differs from the migrate set
//! - the partition violates the recomputability closure

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::canonical::canonical_hash_hex;
use crate::graph::{DependencyGraph, GraphError};
use crate::restore::{self, RestoreError, RestorePlan};
use crate::session::Checkpoint;
use crate::types::{ClosureViolation, Partition, StateVersionId};

/// Current artifact schema version.
pub const ARTIFACT_SCHEMA_VERSION: &str = "1.0.0";

/// Error type for artifact handling.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Unsupported schema version.
    #[error("Unsupported artifact schema version {found} (expected {expected})")]
    SchemaVersion {
        /// Version found in the artifact.
        found: String,
        /// Version this build reads.
        expected: &'static str,
    },
    /// A migrated version has no payload.
    #[error("Missing payload for {0}")]
    MissingPayload(StateVersionId),
    /// A payload was supplied for a version that is not migrated.
    #[error("Unexpected payload for {0}")]
    UnexpectedPayload(StateVersionId),
    /// Payload bytes do not match their digest.
    #[error("Payload digest mismatch for {0}")]
    DigestMismatch(StateVersionId),
    /// Graph bytes do not match the recorded hash.
    #[error("Graph hash mismatch: expected {expected}, computed {actual}")]
    GraphHashMismatch {
        /// Hash stored in the artifact.
        expected: String,
        /// Hash of the graph as loaded.
        actual: String,
    },
    /// Graph is structurally invalid.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Partition violates the closure invariant.
    #[error(transparent)]
    Closure(#[from] ClosureViolation),
    /// No valid restore plan exists.
    #[error(transparent)]
    Restore(#[from] RestoreError),
    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Serialized value of one migrated state version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Version this payload restores.
    pub state_version: StateVersionId,
    /// Serialized value, hex-encoded in JSON.
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
    /// Hex SHA-256 of `bytes`.
    pub sha256: String,
}

impl Payload {
    /// Wrap bytes and compute their digest.
    pub fn new(state_version: StateVersionId, bytes: Vec<u8>) -> Self {
        let sha256 = sha256_hex(&bytes);
        Self {
            state_version,
            bytes,
            sha256,
        }
    }

    /// Whether the digest matches the bytes.
    pub fn verify(&self) -> bool {
        sha256_hex(&self.bytes) == self.sha256
    }
}

/// Persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointArtifact {
    /// Schema version.
    pub schema_version: String,
    /// Session the checkpoint was taken from.
    pub session_id: Uuid,
    /// When the artifact was built.
    pub created_at: DateTime<Utc>,
    /// Canonical hash of `graph`.
    pub graph_hash: String,
    /// Dependency graph at checkpoint time.
    pub graph: DependencyGraph,
    /// Selected partition.
    pub partition: Partition,
    /// One payload per migrated version, ordered by id.
    pub payloads: Vec<Payload>,
}

impl CheckpointArtifact {
    /// Build an artifact from a checkpoint and the serialized migrated values.
    ///
    /// `payloads` must contain exactly the versions in the migrate set.
    pub fn new(
        checkpoint: &Checkpoint,
        mut payloads: BTreeMap<StateVersionId, Vec<u8>>,
    ) -> Result<Self, ArtifactError> {
        let migrate = &checkpoint.partition.migrate;
        if let Some(extra) = payloads.keys().find(|id| !migrate.contains(*id)) {
            return Err(ArtifactError::UnexpectedPayload(*extra));
        }

        let mut ordered = Vec::with_capacity(migrate.len());
        for id in migrate {
            let bytes = payloads
                .remove(id)
                .ok_or(ArtifactError::MissingPayload(*id))?;
            ordered.push(Payload::new(*id, bytes));
        }

        let artifact = Self {
            schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
            session_id: checkpoint.session_id,
            created_at: Utc::now(),
            graph_hash: canonical_hash_hex(&checkpoint.graph)?,
            graph: checkpoint.graph.clone(),
            partition: checkpoint.partition.clone(),
            payloads: ordered,
        };

        tracing::info!(
            session = %artifact.session_id,
            graph_hash = %artifact.graph_hash,
            payloads = artifact.payloads.len(),
            payload_bytes = artifact.payload_bytes(),
            "checkpoint artifact built"
        );
        Ok(artifact)
    }

    /// Encode as pretty JSON.
    pub fn to_json(&self) -> Result<String, ArtifactError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode and verify an artifact.
    pub fn from_json(json: &str) -> Result<Self, ArtifactError> {
        let artifact: Self = serde_json::from_str(json)?;
        artifact.verify()?;
        Ok(artifact)
    }

    /// Check every integrity property of the artifact.
    pub fn verify(&self) -> Result<(), ArtifactError> {
        if self.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(ArtifactError::SchemaVersion {
                found: self.schema_version.clone(),
                expected: ARTIFACT_SCHEMA_VERSION,
            });
        }

        self.graph.validate()?;
        let actual = canonical_hash_hex(&self.graph)?;
        if actual != self.graph_hash {
            return Err(ArtifactError::GraphHashMismatch {
                expected: self.graph_hash.clone(),
                actual,
            });
        }

        let mut seen = BTreeSet::new();
        for payload in &self.payloads {
            if !self.partition.migrate.contains(&payload.state_version)
                || !seen.insert(payload.state_version)
            {
                return Err(ArtifactError::UnexpectedPayload(payload.state_version));
            }
            if !payload.verify() {
                return Err(ArtifactError::DigestMismatch(payload.state_version));
            }
        }
        if let Some(missing) = self.partition.migrate.difference(&seen).next() {
            return Err(ArtifactError::MissingPayload(*missing));
        }

        self.partition.verify_closure(&self.graph)?;
        Ok(())
    }

    /// Payload for a migrated version.
    pub fn payload(&self, id: StateVersionId) -> Option<&Payload> {
        self.payloads
            .binary_search_by_key(&id, |p| p.state_version)
            .ok()
            .map(|index| &self.payloads[index])
    }

    /// Total payload size in bytes.
    pub fn payload_bytes(&self) -> u64 {
        self.payloads.iter().map(|p| p.bytes.len() as u64).sum()
    }

    /// Restore plan for this artifact.
    pub fn restore_plan(&self) -> Result<RestorePlan, ArtifactError> {
        let plan = restore::plan(
            &self.graph,
            &self.partition.migrate,
            &self.partition.recompute,
            &self.partition.replay,
        )?;
        for id in plan.injected() {
            if self.payload(id).is_none() {
                let name = self
                    .graph
                    .state_version(id)
                    .map(|sv| sv.name.clone())
                    .unwrap_or_default();
                return Err(RestoreError::MissingPayload {
                    state_version: id,
                    name,
                }
                .into());
            }
        }
        Ok(plan)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}
