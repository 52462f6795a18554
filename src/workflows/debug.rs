//! Debug workflow: reproduce → diagnose → propose_fix | escalate.
//!
//! The only standard workflow with conditional routing: `diagnose`
//! records whether a root cause was identified, and the graph branches
//! to `propose_fix` when it was, `escalate` otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{PromptNode, render_messages};
use crate::graphs::{GraphBuilder, GraphError, WorkflowGraph};
use crate::node::{Node, NodeContext, NodeError, NodeOutput};
use crate::router::Complexity;
use crate::state::WorkflowState;

/// Diagnosis node that flags whether a root cause was identified.
///
/// The model is instructed to open its answer with `ROOT CAUSE:` when it
/// found one; the flag lands on the output as `resolved` and drives the
/// conditional edges out of `diagnose`.
pub struct DiagnoseNode;

const DIAGNOSE_INSTRUCTIONS: &str =
    "You diagnose software defects. Study the reproduction and identify \
     the root cause. If and only if you identified it, start your answer \
     with the line 'ROOT CAUSE:'. If you could not, start with \
     'INCONCLUSIVE:' and state what is missing.";

#[async_trait]
impl Node for DiagnoseNode {
    fn complexity(&self) -> Complexity {
        Complexity::Complex
    }

    fn memory_worthy(&self) -> bool {
        true
    }

    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let messages = render_messages(
            DIAGNOSE_INSTRUCTIONS,
            "Diagnose the reproduced defect.",
            state,
            ctx,
        );
        let completion = ctx.complete(&messages, 4096).await?;
        let resolved = completion.content.trim_start().starts_with("ROOT CAUSE:");
        ctx.emit(
            "diagnosis",
            if resolved { "root cause identified" } else { "inconclusive" },
        );
        Ok(
            NodeOutput::new(json!({
                "content": completion.content,
                "resolved": resolved,
            }))
            .with_memory(completion.content),
        )
    }
}

/// Whether `diagnose` identified a root cause in this session.
fn diagnosis_resolved(state: &WorkflowState) -> bool {
    state
        .node_outputs
        .get("diagnose")
        .and_then(|v| v.get("resolved"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub(super) fn graph() -> Result<WorkflowGraph, GraphError> {
    GraphBuilder::new()
        .add_node(
            "reproduce",
            PromptNode::new(
                "You reproduce bugs. From the report, derive the minimal \
                 deterministic reproduction: environment, steps, expected \
                 versus actual behavior.",
                "Build a minimal reproduction for the bug report below.",
            )
            .with_complexity(Complexity::Simple),
        )
        .add_node("diagnose", DiagnoseNode)
        .add_node(
            "propose_fix",
            PromptNode::new(
                "You fix diagnosed defects. Propose the smallest correct \
                 fix for the identified root cause, with the regression \
                 test that pins it down.",
                "Propose a fix for the diagnosed root cause.",
            )
            .with_complexity(Complexity::Complex)
            .memory_worthy(),
        )
        .add_node(
            "escalate",
            PromptNode::new(
                "You write escalation summaries. The diagnosis was \
                 inconclusive: summarize what was tried, what was ruled \
                 out, and what a human investigator should look at next.",
                "Write the escalation summary for the inconclusive diagnosis.",
            )
            .with_complexity(Complexity::Simple),
        )
        .add_edge("reproduce", "diagnose")
        .add_conditional_edge("diagnose", "propose_fix", Arc::new(diagnosis_resolved))
        .add_conditional_edge(
            "diagnose",
            "escalate",
            Arc::new(|state| !diagnosis_resolved(state)),
        )
        .set_entry("reproduce")
        .compile()
}
