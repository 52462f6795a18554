//! Requirements workflow: extract_requirements → design_architecture →
//! specify → handoff, pausing for human approval before `handoff`.

use super::PromptNode;
use crate::graphs::{GraphBuilder, GraphError, WorkflowGraph};
use crate::router::Complexity;

pub(super) fn graph() -> Result<WorkflowGraph, GraphError> {
    GraphBuilder::new()
        .add_node(
            "extract_requirements",
            PromptNode::new(
                "You turn loose product ideas into explicit requirements. \
                 Enumerate functional and non-functional requirements, \
                 marking anything ambiguous.",
                "Extract the requirements from the request below.",
            ),
        )
        .add_node(
            "design_architecture",
            PromptNode::new(
                "You are a software architect. Propose a component-level \
                 architecture that satisfies the extracted requirements, \
                 naming the trade-offs you made.",
                "Design an architecture for the extracted requirements.",
            )
            .with_complexity(Complexity::Complex),
        )
        .add_node(
            "specify",
            PromptNode::new(
                "You write implementation-ready specifications. Turn the \
                 architecture into a precise spec: data shapes, operations, \
                 invariants, and edge cases.",
                "Write the full specification for the designed architecture.",
            )
            .with_complexity(Complexity::Complex)
            .memory_worthy(),
        )
        .add_node(
            "handoff",
            PromptNode::new(
                "You prepare engineering handoffs. Summarize the approved \
                 specification into a kickoff brief for the implementing \
                 team, honoring any reviewer instructions.",
                "Produce the handoff brief for the approved specification.",
            )
            .with_complexity(Complexity::Simple),
        )
        .add_edge("extract_requirements", "design_architecture")
        .add_edge("design_architecture", "specify")
        .add_edge("specify", "handoff")
        .set_entry("extract_requirements")
        .mark_interrupt("handoff")
        .compile()
}
