//! Core types for the checkpoint kernel.

pub mod state;
pub mod operation;
pub mod partition;

pub use state::{StateVersionId, StateVersion};
pub use operation::{OperationId, Operation, OperationMeta};
pub use partition::{Partition, PartitionCost, ClosureViolation};
