use std::collections::HashMap;
use std::sync::Arc;

use wv_domain::error::{Error, Result};
use wv_domain::state::ConversationState;

use crate::runner::GraphNode;

/// Entry sentinel: the edge from `START` selects the first node.
pub const START: &str = "__start__";
/// Terminal sentinel: routing to `END` finishes the turn.
pub const END: &str = "__end__";

pub(crate) enum Edge {
    Direct(String),
    Conditional(Box<dyn Fn(&ConversationState) -> String + Send + Sync>),
}

impl Edge {
    pub(crate) fn pick(&self, state: &ConversationState) -> String {
        match self {
            Edge::Direct(to) => to.clone(),
            Edge::Conditional(pick) => pick(state),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembles nodes and edges, then validates the wiring once.
pub struct GraphBuilder<C> {
    nodes: HashMap<String, Arc<dyn GraphNode<C>>>,
    edges: HashMap<String, Edge>,
}

impl<C> Default for GraphBuilder<C> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
        }
    }
}

impl<C> GraphBuilder<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, node: Arc<dyn GraphNode<C>>) -> Self {
        self.nodes.insert(node.name().to_owned(), node);
        self
    }

    /// Unconditional edge `from -> to`. Use `START` as `from` for the
    /// entry and `END` as `to` for terminal nodes.
    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.edges.insert(from.to_owned(), Edge::Direct(to.to_owned()));
        self
    }

    /// Conditional edge: `pick` returns a successor name or `END`.
    pub fn add_conditional<F>(mut self, from: &str, pick: F) -> Self
    where
        F: Fn(&ConversationState) -> String + Send + Sync + 'static,
    {
        self.edges
            .insert(from.to_owned(), Edge::Conditional(Box::new(pick)));
        self
    }

    /// Validate and freeze.
    ///
    /// Conditional edge targets are only checkable at runtime, but every
    /// node must have an outgoing edge and every direct target must exist.
    pub fn compile(self) -> Result<Graph<C>> {
        let entry = match self.edges.get(START) {
            Some(Edge::Direct(to)) => to.clone(),
            Some(Edge::Conditional(_)) => {
                return Err(Error::Internal("graph entry edge must be direct".into()))
            }
            None => return Err(Error::Internal("graph has no START edge".into())),
        };
        if !self.nodes.contains_key(&entry) {
            return Err(Error::Internal(format!("entry node {entry} not registered")));
        }
        for (from, edge) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(Error::Internal(format!("edge from unknown node {from}")));
            }
            if let Edge::Direct(to) = edge {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(Error::Internal(format!("edge to unknown node {to}")));
                }
            }
        }
        for name in self.nodes.keys() {
            if !self.edges.contains_key(name) {
                return Err(Error::Internal(format!("node {name} has no outgoing edge")));
            }
        }
        Ok(Graph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compiled graph
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable after compile; shared across turns.
pub struct Graph<C> {
    pub(crate) nodes: HashMap<String, Arc<dyn GraphNode<C>>>,
    pub(crate) edges: HashMap<String, Edge>,
    pub(crate) entry: String,
}

impl<C> Graph<C> {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub(crate) fn node(&self, name: &str) -> Result<&Arc<dyn GraphNode<C>>> {
        self.nodes
            .get(name)
            .ok_or_else(|| Error::Internal(format!("unknown graph node: {name}")))
    }

    pub(crate) fn successor(&self, from: &str, state: &ConversationState) -> Result<String> {
        self.edges
            .get(from)
            .map(|e| e.pick(state))
            .ok_or_else(|| Error::Internal(format!("node {from} has no outgoing edge")))
    }
}
