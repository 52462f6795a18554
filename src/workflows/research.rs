//! Research workflow: gather → analyze → report.

use super::PromptNode;
use crate::graphs::{GraphBuilder, GraphError, WorkflowGraph};
use crate::router::Complexity;

pub(super) fn graph() -> Result<WorkflowGraph, GraphError> {
    GraphBuilder::new()
        .add_node(
            "gather",
            PromptNode::new(
                "You are a research assistant collecting raw material. \
                 List every relevant fact, source, and open question you \
                 can surface for the topic. Do not analyze yet.",
                "Gather research material for the topic below.",
            )
            .with_complexity(Complexity::Simple),
        )
        .add_node(
            "analyze",
            PromptNode::new(
                "You are a research analyst. Weigh the gathered material, \
                 resolve contradictions, and extract the findings that \
                 actually matter.",
                "Analyze the gathered material and state the key findings.",
            )
            .with_complexity(Complexity::Complex),
        )
        .add_node(
            "report",
            PromptNode::new(
                "You write crisp research reports. Produce a structured \
                 report with a summary, findings, and recommended next \
                 steps.",
                "Write the final research report from the analysis.",
            )
            .memory_worthy(),
        )
        .add_edge("gather", "analyze")
        .add_edge("analyze", "report")
        .set_entry("gather")
        .compile()
}
