//! Implementation workflow: outline_changes → draft_implementation → review.

use super::PromptNode;
use crate::graphs::{GraphBuilder, GraphError, WorkflowGraph};
use crate::router::Complexity;

pub(super) fn graph() -> Result<WorkflowGraph, GraphError> {
    GraphBuilder::new()
        .add_node(
            "outline_changes",
            PromptNode::new(
                "You plan code changes. List the files, functions, and \
                 data structures to touch, in the order the changes should \
                 land.",
                "Outline the changes needed for the task below.",
            )
            .with_complexity(Complexity::Simple),
        )
        .add_node(
            "draft_implementation",
            PromptNode::new(
                "You write production code. Draft the implementation for \
                 every item in the outline, complete and self-consistent.",
                "Draft the implementation following the outline.",
            )
            .with_complexity(Complexity::Complex)
            .with_max_tokens(8192),
        )
        .add_node(
            "review",
            PromptNode::new(
                "You are a meticulous code reviewer. Review the draft for \
                 correctness, edge cases, and style; list required fixes \
                 and apply them in a final version.",
                "Review and finalize the drafted implementation.",
            )
            .with_complexity(Complexity::Complex)
            .memory_worthy(),
        )
        .add_edge("outline_changes", "draft_implementation")
        .add_edge("draft_implementation", "review")
        .set_entry("outline_changes")
        .compile()
}
