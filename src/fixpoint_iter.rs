/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use thiserror::Error;

use crate::datatype::AbstractDomain;
use crate::graph::Graph;

/// The analysis-specific half of the fixpoint iteration: how one node's
/// instructions transform a state, and what state flows along one edge.
pub trait FixpointIteratorTransformer<G: Graph, D: AbstractDomain> {
    /// The *current_state* is updated in place. `exit_states` holds the
    /// latest recorded exit state of every node, for instructions whose
    /// operands are defined across an edge (merge instructions).
    fn analyze_node(
        &self,
        n: G::NodeId,
        current_state: &mut D,
        exit_states: &HashMap<G::NodeId, D>,
    );

    /// The state entering the edge's target, derived from the exit state
    /// of its source. Path refinement happens here.
    fn analyze_edge(&self, e: G::EdgeId, exit_state_at_src: &D) -> D;
}

/// Defensive visit cap: a generous multiple of the node count. Widening
/// converges far below it unless the solver has a monotonicity bug.
pub fn default_iteration_limit<G: Graph>(graph: &G) -> usize {
    256 * graph.size() + 1024
}

#[derive(Debug, Error)]
pub enum FixpointError {
    /// Widening guarantees termination, so hitting the defensive cap means
    /// a latent monotonicity bug; the caller must discard the run.
    #[error("no fixpoint reached within {limit} node visits")]
    IterationLimit { limit: usize },
}

/// Chaotic iteration over a cyclic graph: a FIFO worklist with a
/// membership set, all nodes queued at the start. A node's entry state is
/// the merge of its predecessors' refined exit states, with contributions
/// arriving over a back-edge widened against the entry state recorded at
/// the previous visit; the entry node instead always seeds from the
/// caller's initial state. Whenever a node's exit state changes, its
/// successors are re-queued. The final fixpoint is independent of the
/// visitation order.
pub struct WorklistFixpointIterator<
    'g,
    G: Graph,
    D: AbstractDomain,
    T: FixpointIteratorTransformer<G, D>,
> {
    graph: &'g G,
    back_edges: HashSet<(G::NodeId, G::NodeId)>,
    entry_states: HashMap<G::NodeId, D>,
    exit_states: HashMap<G::NodeId, D>,
    transformer: T,
    iteration_limit: usize,
}

impl<'g, G, D, T> WorklistFixpointIterator<'g, G, D, T>
where
    G: Graph,
    D: AbstractDomain,
    T: FixpointIteratorTransformer<G, D>,
{
    pub fn new(
        graph: &'g G,
        transformer: T,
        back_edges: HashSet<(G::NodeId, G::NodeId)>,
        iteration_limit: usize,
    ) -> Self {
        Self {
            graph,
            back_edges,
            entry_states: HashMap::with_capacity(graph.size()),
            exit_states: HashMap::with_capacity(graph.size()),
            transformer,
            iteration_limit,
        }
    }

    pub fn get_state_at_or_bottom(states: &HashMap<G::NodeId, D>, n: G::NodeId) -> D {
        states.get(&n).cloned().unwrap_or_else(D::bottom)
    }

    pub fn get_entry_state_at(&self, n: G::NodeId) -> D {
        Self::get_state_at_or_bottom(&self.entry_states, n)
    }

    pub fn get_exit_state_at(&self, n: G::NodeId) -> D {
        Self::get_state_at_or_bottom(&self.exit_states, n)
    }

    pub fn exit_states(&self) -> &HashMap<G::NodeId, D> {
        &self.exit_states
    }

    fn compute_entry_state(&self, n: G::NodeId, init: &D) -> D {
        if n == self.graph.entry() {
            return init.clone();
        }
        let mut entry = D::bottom();
        for e in self.graph.predecessors(n) {
            let src = self.graph.source(e);
            let src_exit = match self.exit_states.get(&src) {
                Some(state) if !state.is_bottom() => state,
                _ => continue,
            };
            let mut contribution = self.transformer.analyze_edge(e, src_exit);
            if self.back_edges.contains(&(src, n)) {
                let mut widened = Self::get_state_at_or_bottom(&self.entry_states, n);
                widened.widen_with(contribution);
                contribution = widened;
            }
            entry.join_with(contribution);
        }
        entry
    }

    pub fn run(&mut self, init: D) -> Result<(), FixpointError> {
        let nodes = self.graph.nodes();
        let mut worklist: VecDeque<G::NodeId> = nodes.iter().copied().collect();
        let mut queued: HashSet<G::NodeId> = nodes.into_iter().collect();

        let mut visits = 0usize;
        while let Some(n) = worklist.pop_front() {
            queued.remove(&n);
            visits += 1;
            if visits > self.iteration_limit {
                return Err(FixpointError::IterationLimit {
                    limit: self.iteration_limit,
                });
            }

            let entry = self.compute_entry_state(n, &init);
            self.entry_states.insert(n, entry.clone());

            let mut exit = entry;
            self.transformer
                .analyze_node(n, &mut exit, &self.exit_states);

            let previous = Self::get_state_at_or_bottom(&self.exit_states, n);
            if previous != exit {
                self.exit_states.insert(n, exit);
                for e in self.graph.successors(n) {
                    let succ = self.graph.target(e);
                    if queued.insert(succ) {
                        worklist.push_back(succ);
                    }
                }
            }
        }
        Ok(())
    }
}
