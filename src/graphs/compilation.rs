//! Graph compilation: structural validation and the executable graph.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::builder::GraphBuilder;
use super::edges::Edge;
use crate::node::Node;
use crate::state::WorkflowState;

/// Structural and routing errors for workflow graphs.
///
/// All variants except [`NoRoute`](Self::NoRoute) are configuration
/// errors detected when the builder compiles; `NoRoute` is raised at
/// execution time when a node's conditional edges all reject the state.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("duplicate node name: {name}")]
    #[diagnostic(
        code(taskloom::graph::duplicate_node),
        help("Each node name must be registered exactly once.")
    )]
    DuplicateNode { name: String },

    #[error("graph has no entry point")]
    #[diagnostic(
        code(taskloom::graph::no_entry_point),
        help("Call set_entry with the name of the starting node.")
    )]
    NoEntryPoint,

    #[error("{referenced_by} references unknown node: {name}")]
    #[diagnostic(
        code(taskloom::graph::unknown_node),
        help("Register the node with add_node before referencing it.")
    )]
    UnknownNode {
        name: String,
        referenced_by: &'static str,
    },

    #[error("ambiguous routing out of node {node}: {detail}")]
    #[diagnostic(
        code(taskloom::graph::ambiguous_routing),
        help(
            "With first-match-wins routing, a node may have at most one \
             unconditional edge and it must be registered last."
        )
    )]
    AmbiguousRouting { node: String, detail: String },

    #[error("no outgoing edge of node {node} matched the state")]
    #[diagnostic(
        code(taskloom::graph::no_route),
        help("Conditional edges must cover every reachable state, e.g. with a final unconditional edge.")
    )]
    NoRoute { node: String },
}

/// Compiled, immutable workflow graph ready for execution.
///
/// Produced by [`GraphBuilder::compile`]; the engine only ever routes
/// through this structure, never through the builder.
pub struct WorkflowGraph {
    nodes: FxHashMap<String, Arc<dyn Node>>,
    /// Outgoing edges per node, in registration order.
    edges: FxHashMap<String, Vec<Edge>>,
    entry: String,
    interrupts: FxHashSet<String>,
}

impl fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<&str> = self.node_names().collect();
        nodes.sort_unstable();
        f.debug_struct("WorkflowGraph")
            .field("entry", &self.entry)
            .field("nodes", &nodes)
            .field("edges", &self.edges)
            .field("interrupts", &self.interrupts)
            .finish()
    }
}

impl WorkflowGraph {
    /// Name of the entry node.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Look up a node implementation by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(name)
    }

    /// Whether the named node is a human-approval interrupt point.
    #[must_use]
    pub fn is_interrupt(&self, name: &str) -> bool {
        self.interrupts.contains(name)
    }

    /// Registered node names (no particular order).
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Resolve the successor of `from` for the given state.
    ///
    /// Edges are evaluated in registration order; the first match wins.
    /// `Ok(None)` means `from` is terminal. Edges that all reject the
    /// state produce [`GraphError::NoRoute`].
    pub fn next_node(
        &self,
        from: &str,
        state: &WorkflowState,
    ) -> Result<Option<String>, GraphError> {
        let Some(edges) = self.edges.get(from) else {
            return Ok(None);
        };
        if edges.is_empty() {
            return Ok(None);
        }
        for edge in edges {
            if edge.matches(state) {
                return Ok(Some(edge.to().to_string()));
            }
        }
        Err(GraphError::NoRoute {
            node: from.to_string(),
        })
    }
}

impl GraphBuilder {
    /// Compiles the graph, running all structural validation.
    ///
    /// Checks performed:
    /// - every node name registered exactly once;
    /// - an entry point is set and registered;
    /// - every edge endpoint and interrupt marker names a registered node;
    /// - no node has an edge shadowed by an earlier unconditional edge
    ///   (which would be unreachable under first-match-wins routing).
    pub fn compile(self) -> Result<WorkflowGraph, GraphError> {
        let mut nodes: FxHashMap<String, Arc<dyn Node>> = FxHashMap::default();
        for (name, node) in self.nodes {
            if nodes.insert(name.clone(), node).is_some() {
                return Err(GraphError::DuplicateNode { name });
            }
        }

        let entry = self.entry.ok_or(GraphError::NoEntryPoint)?;
        if !nodes.contains_key(&entry) {
            return Err(GraphError::UnknownNode {
                name: entry,
                referenced_by: "entry point",
            });
        }

        let mut edges: FxHashMap<String, Vec<Edge>> = FxHashMap::default();
        for (from, edge) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(GraphError::UnknownNode {
                    name: from,
                    referenced_by: "edge source",
                });
            }
            if !nodes.contains_key(edge.to()) {
                return Err(GraphError::UnknownNode {
                    name: edge.to().to_string(),
                    referenced_by: "edge target",
                });
            }
            edges.entry(from).or_default().push(edge);
        }

        for (from, outgoing) in &edges {
            let unconditional = outgoing.iter().filter(|e| e.is_unconditional()).count();
            if unconditional > 1 {
                return Err(GraphError::AmbiguousRouting {
                    node: from.clone(),
                    detail: format!("{unconditional} unconditional edges"),
                });
            }
            if let Some(position) = outgoing.iter().position(Edge::is_unconditional)
                && position != outgoing.len() - 1
            {
                return Err(GraphError::AmbiguousRouting {
                    node: from.clone(),
                    detail: format!(
                        "unconditional edge to {} shadows later edges",
                        outgoing[position].to()
                    ),
                });
            }
        }

        for name in &self.interrupts {
            if !nodes.contains_key(name) {
                return Err(GraphError::UnknownNode {
                    name: name.clone(),
                    referenced_by: "interrupt marker",
                });
            }
        }

        tracing::debug!(
            nodes = nodes.len(),
            entry = %entry,
            interrupts = self.interrupts.len(),
            "workflow graph compiled"
        );

        Ok(WorkflowGraph {
            nodes,
            edges,
            entry,
            interrupts: self.interrupts,
        })
    }
}
