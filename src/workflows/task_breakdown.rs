//! Task breakdown workflow: decompose → estimate → resolve_dependencies.

use super::PromptNode;
use crate::graphs::{GraphBuilder, GraphError, WorkflowGraph};
use crate::router::Complexity;

pub(super) fn graph() -> Result<WorkflowGraph, GraphError> {
    GraphBuilder::new()
        .add_node(
            "decompose",
            PromptNode::new(
                "You break work into independently deliverable tasks. \
                 Decompose the goal into tasks with clear acceptance \
                 criteria, no task larger than a few days of work.",
                "Decompose the goal below into tasks.",
            ),
        )
        .add_node(
            "estimate",
            PromptNode::new(
                "You estimate engineering effort. For each task, give an \
                 effort estimate with a one-line justification and flag \
                 high-uncertainty items.",
                "Estimate each task from the decomposition.",
            )
            .with_complexity(Complexity::Simple),
        )
        .add_node(
            "resolve_dependencies",
            PromptNode::new(
                "You sequence work. Identify dependencies between the \
                 estimated tasks and produce an execution order that \
                 maximizes parallelism.",
                "Resolve dependencies and order the estimated tasks.",
            )
            .memory_worthy(),
        )
        .add_edge("decompose", "estimate")
        .add_edge("estimate", "resolve_dependencies")
        .set_entry("decompose")
        .compile()
}
