//! Workflow graph construction, validation, and routing.
//!
//! Graphs are assembled with the fluent [`GraphBuilder`], validated and
//! frozen by [`GraphBuilder::compile`] into a [`WorkflowGraph`], and
//! routed one node at a time by the engine via
//! [`WorkflowGraph::next_node`].

mod builder;
mod edges;
mod compilation;

pub use builder::GraphBuilder;
pub use compilation::{GraphError, WorkflowGraph};
pub use edges::{Edge, EdgePredicate};

#[cfg(test)]
mod tests;
