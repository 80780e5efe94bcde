use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
};

use petgraph::{graph::NodeIndex, Direction};

use strata_api::error::{DiffError, StrataError};

use super::ActionPetgraph;

/// Orders the actions so that every action comes after its predecessors.
///
/// Among the actions that are ready, the one with the smallest sort key
/// goes first, which makes the order independent of insertion order.
pub(super) fn commit_order(graph: &ActionPetgraph) -> Result<Vec<NodeIndex>, StrataError> {
    let mut pending = graph
        .node_indices()
        .map(|idx| (idx, graph.edges_directed(idx, Direction::Incoming).count()))
        .collect::<HashMap<_, _>>();

    let mut ready = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| Reverse((graph[*idx].sort_key(), *idx)))
        .collect::<BinaryHeap<_>>();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((_, idx))) = ready.pop() {
        order.push(idx);

        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            if let Some(count) = pending.get_mut(&next) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse((graph[next].sort_key(), next)));
                }
            }
        }
    }

    if order.len() != graph.node_count() {
        return Err(StrataError::new(DiffError::DependencyCycle {
            remaining: graph.node_count() - order.len(),
        }));
    }

    Ok(order)
}
