//! Integer max-flow / min-cut (Edmonds-Karp).

use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct FlowEdge {
    to: usize,
    residual: u64,
}

/// Directed flow network with integer capacities.
///
/// Edges are stored in pairs: edge `i` and its reverse `i ^ 1`.
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    adjacency: Vec<Vec<usize>>,
    edges: Vec<FlowEdge>,
}

impl FlowNetwork {
    /// Network with `nodes` nodes and no edges.
    pub fn new(nodes: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); nodes],
            edges: Vec::new(),
        }
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.adjacency.len()
    }

    /// Add a directed edge `from -> to` with `capacity`.
    pub fn add_edge(&mut self, from: usize, to: usize, capacity: u64) {
        self.adjacency[from].push(self.edges.len());
        self.edges.push(FlowEdge {
            to,
            residual: capacity,
        });
        self.adjacency[to].push(self.edges.len());
        self.edges.push(FlowEdge { to: from, residual: 0 });
    }

    /// Push the maximum flow from `source` to `sink`.
    ///
    /// Stops early once the flow reaches `limit`, returning a value
    /// `>= limit`. Residual capacities are kept for [`Self::source_side`].
    pub fn max_flow(&mut self, source: usize, sink: usize, limit: u64) -> u64 {
        let mut total = 0u64;
        let mut parent_edge = vec![usize::MAX; self.num_nodes()];

        while total < limit {
            parent_edge.iter_mut().for_each(|p| *p = usize::MAX);
            let mut queue = VecDeque::new();
            queue.push_back(source);
            let mut reached = false;

            'bfs: while let Some(node) = queue.pop_front() {
                for &edge_index in &self.adjacency[node] {
                    let edge = &self.edges[edge_index];
                    if edge.residual == 0
                        || edge.to == source
                        || parent_edge[edge.to] != usize::MAX
                    {
                        continue;
                    }
                    parent_edge[edge.to] = edge_index;
                    if edge.to == sink {
                        reached = true;
                        break 'bfs;
                    }
                    queue.push_back(edge.to);
                }
            }

            if !reached {
                break;
            }

            let mut bottleneck = u64::MAX;
            let mut node = sink;
            while node != source {
                let edge_index = parent_edge[node];
                bottleneck = bottleneck.min(self.edges[edge_index].residual);
                node = self.edges[edge_index ^ 1].to;
            }

            let mut node = sink;
            while node != source {
                let edge_index = parent_edge[node];
                self.edges[edge_index].residual -= bottleneck;
                self.edges[edge_index ^ 1].residual =
                    self.edges[edge_index ^ 1].residual.saturating_add(bottleneck);
                node = self.edges[edge_index ^ 1].to;
            }

            total = total.saturating_add(bottleneck);
        }

        total
    }

    /// Nodes reachable from `source` in the residual network.
    ///
    /// After [`Self::max_flow`] this is the source side of the minimum cut
    /// with the fewest nodes.
    pub fn source_side(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.num_nodes()];
        let mut stack = vec![source];
        seen[source] = true;
        while let Some(node) = stack.pop() {
            for &edge_index in &self.adjacency[node] {
                let edge = &self.edges[edge_index];
                if edge.residual > 0 && !seen[edge.to] {
                    seen[edge.to] = true;
                    stack.push(edge.to);
                }
            }
        }
        seen
    }
}
