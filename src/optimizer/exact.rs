//! Exact minimum-cost selection.
//!
//! Choosing which live versions to recompute is a closure problem: picking a
//! version for recomputation forces its creator to be replayed, and replaying
//! an operation forces the creators of its unrequested inputs to be replayed
//! as well. Requested inputs never add constraints, since every requested
//! version ends up migrated or recomputed. An input outside the request is
//! unavailable at restore even when it is live.
//!
//! The minimum-cost closure is a minimum s-t cut over
//!
//! ```text
//! source ──migration_cost──▶ requested version ──∞──▶ creator ──α·runtime──▶ sink
//!                          operation ──∞──▶ creator of unrequested input
//! ```
//!
//! Versions left on the source side are recomputed; operations on the source
//! side are replayed. Unserializable versions get an infinite source edge and
//! non-replayable operations an infinite sink edge. The residual-reachable
//! source side is the smallest minimum cut, so equal-cost choices resolve to
//! MIGRATE.

use std::collections::{BTreeMap, BTreeSet};

use crate::cost::CostModel;
use crate::graph::DependencyGraph;
use crate::types::{OperationId, Partition, StateVersionId};

use super::mincut::FlowNetwork;
use super::{assemble, resolve_live, unresolvable, OptimizerError};

/// Costs are solved in integer microseconds.
const COST_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

/// Largest finite capacity; keeps sums of capacities far from overflow.
const MAX_FINITE_CAPACITY: u64 = 1 << 52;

const SOURCE: usize = 0;
const SINK: usize = 1;

fn quantize_cost(secs: f64) -> u64 {
    (secs * COST_QUANTIZATION_FACTOR)
        .round()
        .clamp(0.0, MAX_FINITE_CAPACITY as f64) as u64
}

/// Minimum-cost partition of `live`.
///
/// Fails with [`OptimizerError::Unresolvable`] when some unserializable
/// version can only be regenerated through a non-replayable operation.
pub fn select(
    graph: &DependencyGraph,
    live: &[StateVersionId],
    cost: &CostModel,
) -> Result<Partition, OptimizerError> {
    let live_svs = resolve_live(graph, live)?;
    let requested: BTreeSet<StateVersionId> = live_svs.iter().map(|sv| sv.id).collect();

    // Operations any recomputation could need.
    let mut ops: BTreeSet<OperationId> = BTreeSet::new();
    let mut stack: Vec<OperationId> = live_svs.iter().map(|sv| sv.creator).collect();
    while let Some(op_id) = stack.pop() {
        if !ops.insert(op_id) {
            continue;
        }
        let Some(op) = graph.operation(op_id) else {
            continue;
        };
        for input in &op.inputs {
            if requested.contains(input) {
                continue;
            }
            if let Some(sv) = graph.state_version(*input) {
                stack.push(sv.creator);
            }
        }
    }

    let sv_node: BTreeMap<StateVersionId, usize> = live_svs
        .iter()
        .enumerate()
        .map(|(i, sv)| (sv.id, 2 + i))
        .collect();
    let op_node: BTreeMap<OperationId, usize> = ops
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, 2 + live_svs.len() + i))
        .collect();

    // None = infinite.
    let sv_caps: Vec<Option<u64>> = live_svs
        .iter()
        .map(|sv| cost.migration_cost(sv).map(quantize_cost))
        .collect();
    let op_caps: Vec<Option<u64>> = ops
        .iter()
        .map(|id| {
            graph
                .operation(*id)
                .filter(|op| op.replayable)
                .map(|op| quantize_cost(cost.alpha() * op.runtime_secs))
        })
        .collect();

    let finite_total = sv_caps
        .iter()
        .chain(op_caps.iter())
        .flatten()
        .fold(0u64, |acc, c| acc.saturating_add(*c));
    let infinity = finite_total.saturating_add(1);

    let mut net = FlowNetwork::new(2 + live_svs.len() + ops.len());
    for (sv, cap) in live_svs.iter().zip(&sv_caps) {
        let node = sv_node[&sv.id];
        net.add_edge(SOURCE, node, cap.unwrap_or(infinity));
        net.add_edge(node, op_node[&sv.creator], infinity);
    }
    for (op_id, cap) in ops.iter().zip(&op_caps) {
        let node = op_node[op_id];
        net.add_edge(node, SINK, cap.unwrap_or(infinity));
        let Some(op) = graph.operation(*op_id) else {
            continue;
        };
        for input in &op.inputs {
            if requested.contains(input) {
                continue;
            }
            if let Some(sv) = graph.state_version(*input) {
                net.add_edge(node, op_node[&sv.creator], infinity);
            }
        }
    }

    let flow = net.max_flow(SOURCE, SINK, infinity);
    if flow >= infinity {
        let blocked: Vec<_> = live_svs
            .iter()
            .filter(|sv| {
                sv.is_unserializable() && graph.replay_closure_within(sv.id, &requested).is_err()
            })
            .map(|sv| sv.id)
            .collect();
        return Err(unresolvable(graph, blocked));
    }

    let source_side = net.source_side(SOURCE);
    let mut migrate = BTreeSet::new();
    let mut recompute = BTreeSet::new();
    let mut forced_recompute = BTreeSet::new();
    for sv in &live_svs {
        if source_side[sv_node[&sv.id]] {
            recompute.insert(sv.id);
            if sv.is_unserializable() {
                forced_recompute.insert(sv.id);
            }
        } else {
            migrate.insert(sv.id);
        }
    }

    tracing::debug!(
        live = live_svs.len(),
        operations = ops.len(),
        flow_micros = flow,
        migrate = migrate.len(),
        recompute = recompute.len(),
        "exact selection solved"
    );

    assemble(graph, cost, migrate, recompute, BTreeSet::new(), forced_recompute)
}
