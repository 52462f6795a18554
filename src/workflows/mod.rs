//! The five standard workflow graphs and the shared prompt-driven node
//! they are built from.
//!
//! Each submodule assembles one [`WorkflowKind`]'s graph out of
//! [`PromptNode`]s: a node is its system instructions, a request
//! template, a complexity tag, and flags. The rendering rules are
//! uniform so every node sees the same shape of conversation: system
//! instructions, the assembled context bundle, any recorded approvals,
//! then the request carrying workflow inputs and prior node outputs.

mod debug;
mod implementation;
mod requirements;
mod research;
mod task_breakdown;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::graphs::{GraphError, WorkflowGraph};
use crate::message::Message;
use crate::node::{Node, NodeContext, NodeError, NodeOutput, RetryPolicy};
use crate::router::Complexity;
use crate::state::{WorkflowKind, WorkflowState};

pub use debug::DiagnoseNode;

/// Default completion budget for a prompt node.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Compile the standard graph for a workflow kind.
pub fn build_graph(kind: WorkflowKind) -> Result<WorkflowGraph, GraphError> {
    match kind {
        WorkflowKind::Research => research::graph(),
        WorkflowKind::Requirements => requirements::graph(),
        WorkflowKind::TaskBreakdown => task_breakdown::graph(),
        WorkflowKind::Implementation => implementation::graph(),
        WorkflowKind::Debug => debug::graph(),
    }
}

/// A node that renders one prompt, invokes the routed model, and records
/// the response as its output.
pub struct PromptNode {
    instructions: String,
    request: String,
    complexity: Complexity,
    memory_worthy: bool,
    max_tokens: u32,
}

impl PromptNode {
    #[must_use]
    pub fn new(instructions: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            request: request.into(),
            complexity: Complexity::Medium,
            memory_worthy: false,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    #[must_use]
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// Persist this node's response as a semantic memory record.
    #[must_use]
    pub fn memory_worthy(mut self) -> Self {
        self.memory_worthy = true;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Node for PromptNode {
    fn complexity(&self) -> Complexity {
        self.complexity
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn memory_worthy(&self) -> bool {
        self.memory_worthy
    }

    async fn run(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let messages = render_messages(&self.instructions, &self.request, state, ctx);
        ctx.emit("prompt", format!("invoking {}", ctx.model_id));
        let completion = ctx.complete(&messages, self.max_tokens).await?;

        let output = NodeOutput::new(json!({ "content": completion.content }));
        Ok(if self.memory_worthy {
            output.with_memory(completion.content)
        } else {
            output
        })
    }
}

/// Render the uniform conversation shape for one prompt-node execution.
pub(crate) fn render_messages(
    instructions: &str,
    request: &str,
    state: &WorkflowState,
    ctx: &NodeContext,
) -> Vec<Message> {
    let mut messages = vec![Message::system(instructions)];
    messages.extend(ctx.context.to_messages());
    for approval in &state.approvals {
        messages.push(Message::system(format!(
            "Human approval for {}: {}",
            approval.node, approval.input
        )));
    }
    messages.push(Message::user(render_request(request, state)));
    messages
}

fn render_request(request: &str, state: &WorkflowState) -> String {
    let mut text = request.to_string();
    if state.inputs != Value::Null {
        text.push_str(&format!("\n\nWorkflow inputs: {}", state.inputs));
    }
    // Prior outputs in graph order: the state records them append-only,
    // but FxHashMap iteration is unordered, so order by step of insertion
    // is approximated by sorting on node name for determinism.
    let mut prior: Vec<(&String, &Value)> = state.node_outputs.iter().collect();
    prior.sort_by(|a, b| a.0.cmp(b.0));
    for (name, output) in prior {
        text.push_str(&format!("\n\nOutput of {name}: {output}"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_compiles() {
        for kind in [
            WorkflowKind::Research,
            WorkflowKind::Requirements,
            WorkflowKind::TaskBreakdown,
            WorkflowKind::Implementation,
            WorkflowKind::Debug,
        ] {
            build_graph(kind).unwrap_or_else(|e| panic!("{kind} graph invalid: {e}"));
        }
    }

    #[test]
    fn requirements_interrupts_at_handoff() {
        let graph = build_graph(WorkflowKind::Requirements).unwrap();
        assert_eq!(graph.entry(), "extract_requirements");
        assert!(graph.is_interrupt("handoff"));
        assert!(!graph.is_interrupt("specify"));
    }

    #[test]
    fn request_rendering_includes_inputs_and_prior_outputs() {
        let mut state = WorkflowState::builder("s1", WorkflowKind::Research)
            .with_inputs(json!({"topic": "embeddings"}))
            .with_entry("gather")
            .build();
        state.record_output("gather", json!({"content": "notes"}));
        let text = render_request("Analyze the findings.", &state);
        assert!(text.starts_with("Analyze the findings."));
        assert!(text.contains("embeddings"));
        assert!(text.contains("Output of gather"));
    }
}
