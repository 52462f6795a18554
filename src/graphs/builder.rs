//! Fluent builder for workflow graphs.

use rustc_hash::FxHashSet;
use std::sync::Arc;

use super::edges::{Edge, EdgePredicate};
use crate::node::Node;

/// Builder for constructing workflow graphs with a fluent API.
///
/// The builder records nodes, edges, the entry point, and interrupt
/// markers; all structural validation happens in
/// [`compile`](Self::compile), which returns the typed configuration
/// errors (`DuplicateNode`, `NoEntryPoint`, `AmbiguousRouting`, ...).
///
/// # Examples
///
/// ```no_run
/// use taskloom::graphs::GraphBuilder;
/// use taskloom::node::{Node, NodeContext, NodeError, NodeOutput};
/// use taskloom::state::WorkflowState;
/// use async_trait::async_trait;
///
/// struct Gather;
///
/// #[async_trait]
/// impl Node for Gather {
///     async fn run(
///         &self,
///         _state: &WorkflowState,
///         _ctx: &NodeContext,
///     ) -> Result<NodeOutput, NodeError> {
///         Ok(NodeOutput::default())
///     }
/// }
///
/// let graph = GraphBuilder::new()
///     .add_node("gather", Gather)
///     .set_entry("gather")
///     .compile()
///     .expect("valid graph");
/// ```
pub struct GraphBuilder {
    /// Registered nodes in registration order (order matters for
    /// duplicate detection diagnostics).
    pub(crate) nodes: Vec<(String, Arc<dyn Node>)>,
    /// Outgoing edges in registration order: `(from, edge)`.
    pub(crate) edges: Vec<(String, Edge)>,
    pub(crate) entry: Option<String>,
    pub(crate) interrupts: FxHashSet<String>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Creates a new, empty graph builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
            interrupts: FxHashSet::default(),
        }
    }

    /// Registers a node under a unique name.
    ///
    /// Duplicate names are reported by `compile` as
    /// [`GraphError::DuplicateNode`](super::GraphError::DuplicateNode).
    #[must_use]
    pub fn add_node(mut self, name: impl Into<String>, node: impl Node + 'static) -> Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    /// Adds an unconditional edge between two nodes.
    ///
    /// A node's outgoing edges are evaluated in registration order with
    /// first-match-wins semantics, so an unconditional edge must be the
    /// node's only (and therefore last) unconditional route.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), Edge::new(to)));
        self
    }

    /// Adds a conditional edge guarded by a predicate over the state.
    ///
    /// Predicates on sibling edges must be mutually exclusive; the
    /// structural half of that rule (no edge may shadow another) is
    /// enforced at compile time.
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: EdgePredicate,
    ) -> Self {
        self.edges.push((from.into(), Edge::conditional(to, condition)));
        self
    }

    /// Designates the single entry node of the graph.
    #[must_use]
    pub fn set_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Marks a node as a human-approval interrupt point.
    ///
    /// Execution pauses with `waiting_approval` *before* the node runs,
    /// and requires an explicit `resume` call to proceed.
    #[must_use]
    pub fn mark_interrupt(mut self, name: impl Into<String>) -> Self {
        self.interrupts.insert(name.into());
        self
    }
}
