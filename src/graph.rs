/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashSet;
use std::hash::Hash;

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::depth_first_search;
use petgraph::visit::Control;
use petgraph::visit::DfsEvent;
use smallvec::SmallVec;

pub const DEFAULT_GRAPH_SUCCS_NUM: usize = 4;

/// Graph trait used by the worklist fixpoint iterator.
///
/// Clients can either maintain their own structure and implement this
/// trait, or use third-party graph crates and implement this trait as a
/// wrapper. The constant generic parameter S is an estimated number of
/// successor nodes that is just enough for most nodes. A larger/smaller
/// value will not cause incorrect results, it only affects performance.
// NOTE: due to the status of Rust const generics, we can not define
// S as an associated constant since it is part of the return type for
// method predecessors and successors.
pub trait Graph<const S: usize = DEFAULT_GRAPH_SUCCS_NUM> {
    type NodeId: Copy + Hash + Eq + Ord;
    type EdgeId: Copy;

    /// Entry node.
    fn entry(&self) -> Self::NodeId;

    /// Every node of the graph, in a stable order.
    fn nodes(&self) -> Vec<Self::NodeId>;

    /// Predecessors of n.
    fn predecessors(&self, n: Self::NodeId) -> SmallVec<[Self::EdgeId; S]>;

    /// Successors of n.
    fn successors(&self, n: Self::NodeId) -> SmallVec<[Self::EdgeId; S]>;

    /// The source node of e.
    fn source(&self, e: Self::EdgeId) -> Self::NodeId;

    /// The target node of e.
    fn target(&self, e: Self::EdgeId) -> Self::NodeId;

    /// Number of nodes.
    fn size(&self) -> usize;
}

/// The (source, target) pairs closing a cycle, discovered by depth-first
/// search from the entry node. Computed once before iteration begins and
/// consulted only to decide where widening applies. Edges between nodes
/// unreachable from the entry are not reported; such nodes never carry a
/// non-bottom state, so no widening is needed there.
pub fn back_edges<G: Graph>(graph: &G) -> HashSet<(G::NodeId, G::NodeId)> {
    if graph.size() == 0 {
        return HashSet::new();
    }
    let mut digraph = DiGraphMap::<G::NodeId, ()>::new();
    for n in graph.nodes() {
        digraph.add_node(n);
        for e in graph.successors(n) {
            digraph.add_edge(graph.source(e), graph.target(e), ());
        }
    }

    let mut found = HashSet::new();
    depth_first_search(&digraph, Some(graph.entry()), |event| {
        if let DfsEvent::BackEdge(source, target) = event {
            found.insert((source, target));
        }
        Control::<()>::Continue
    });
    found
}
