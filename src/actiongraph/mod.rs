//! The action graph: the actions turning one device graph into another,
//! with the precedences between them.

use std::collections::HashSet;

use log::debug;
use petgraph::{
    dot::{Config, Dot},
    graph::{DiGraph, EdgeReference, NodeIndex},
    visit::{Dfs, EdgeRef, IntoEdgeReferences},
};

use strata_api::{config::Tense, devicegraph::DeviceGraph, error::StrataError};

use crate::action::{Action, ActionKind};

mod dependencies;
mod diff;
mod sort;

pub use dependencies::Precedence;

pub(crate) type ActionPetgraph = DiGraph<Action, Precedence>;

/// The planned actions between two device graphs and a commit order
/// respecting all precedences.
///
/// The action graph borrows both device graphs; they cannot change while it
/// exists.
#[derive(Debug)]
pub struct ActionGraph<'a> {
    lhs: &'a DeviceGraph,
    rhs: &'a DeviceGraph,
    graph: ActionPetgraph,
    order: Vec<NodeIndex>,
}

impl<'a> ActionGraph<'a> {
    /// Computes the actions turning `lhs` into `rhs`.
    #[tracing::instrument(name = "calculate_actiongraph", skip_all)]
    pub fn new(lhs: &'a DeviceGraph, rhs: &'a DeviceGraph) -> Result<Self, StrataError> {
        let mut graph = DiGraph::new();
        for action in diff::diff(lhs, rhs)? {
            graph.add_node(action);
        }

        dependencies::add_dependencies(&mut graph, lhs, rhs);
        let order = sort::commit_order(&graph)?;

        debug!(
            "Planned {} action(s) with {} precedence(s)",
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Self {
            lhs,
            rhs,
            graph,
            order,
        })
    }

    /// The current device graph.
    pub fn lhs(&self) -> &'a DeviceGraph {
        self.lhs
    }

    /// The target device graph.
    pub fn rhs(&self) -> &'a DeviceGraph {
        self.rhs
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All actions, in the order they were planned.
    pub fn actions(&self) -> Vec<&Action> {
        self.graph
            .node_indices()
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Number of actions of one kind.
    pub fn count(&self, kind: ActionKind) -> usize {
        self.graph
            .node_indices()
            .filter(|idx| self.graph[*idx].kind() == kind)
            .count()
    }

    /// All actions in the order they are committed.
    pub fn commit_order(&self) -> Vec<&Action> {
        self.order.iter().map(|idx| &self.graph[*idx]).collect()
    }

    /// Sorts the actions again. The result is always equal to
    /// [`commit_order`](Self::commit_order).
    pub fn sort(&self) -> Result<Vec<&Action>, StrataError> {
        Ok(sort::commit_order(&self.graph)?
            .into_iter()
            .map(|idx| &self.graph[idx])
            .collect())
    }

    /// Every precedence as `(before, after, rule)`.
    pub fn precedences(&self) -> Vec<(&Action, &Action, Precedence)> {
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    &self.graph[edge.source()],
                    &self.graph[edge.target()],
                    *edge.weight(),
                )
            })
            .collect()
    }

    /// Position of an action in the commit order.
    pub fn position(&self, action: &Action) -> Option<usize> {
        self.order
            .iter()
            .position(|idx| &self.graph[*idx] == action)
    }

    /// Description of an action in the context of this graph.
    pub fn text(&self, action: &Action, tense: Tense) -> String {
        action.text(self.lhs, self.rhs, tense)
    }

    /// Descriptions of all actions in commit order, for a dry run.
    pub fn preview(&self, tense: Tense) -> Vec<String> {
        self.commit_order()
            .into_iter()
            .map(|action| self.text(action, tense))
            .collect()
    }

    /// Renders the actions and precedences in the DOT language.
    pub fn to_graphviz(&self) -> String {
        let node_attrs = |_: &ActionPetgraph, (_, action): (NodeIndex, &Action)| {
            format!(
                "label=\"{}\"",
                self.text(action, Tense::Future).replace('"', "\\\"")
            )
        };
        let edge_attrs = |_: &ActionPetgraph, edge: EdgeReference<'_, Precedence>| {
            format!("label=\"{}\"", edge.weight())
        };

        format!(
            "{:?}",
            Dot::with_attr_getters(
                &self.graph,
                &[Config::NodeNoLabel, Config::EdgeNoLabel],
                &edge_attrs,
                &node_attrs,
            )
        )
    }

    /// Node indices in commit order.
    pub(crate) fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub(crate) fn action(&self, idx: NodeIndex) -> &Action {
        &self.graph[idx]
    }

    /// Every action that directly or indirectly depends on `idx`.
    pub(crate) fn dependents(&self, idx: NodeIndex) -> HashSet<NodeIndex> {
        let mut dependents = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, idx);
        while let Some(next) = dfs.next(&self.graph) {
            if next != idx {
                dependents.insert(next);
            }
        }
        dependents
    }
}
