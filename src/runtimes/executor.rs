//! Single-node execution: context assembly, model routing, retries, and
//! memory writeback.
//!
//! The executor owns everything that happens around one `Node::run` call.
//! The engine above it owns the session lifecycle (budget gate, status
//! transitions, checkpointing, routing to the next node).

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use super::events::EventEmitter;
use crate::ledger::CostLedger;
use crate::memory::{MemoryMetadata, MemoryService};
use crate::models::ModelClient;
use crate::node::{Node, NodeContext, NodeError, NodeOutput};
use crate::router::ModelRouter;
use crate::state::WorkflowState;

/// History entries keep a bounded slice of the node output.
const HISTORY_SNIPPET_LEN: usize = 500;

/// Executes one node at a time with retry and memory semantics.
pub struct NodeExecutor {
    client: Arc<dyn ModelClient>,
    ledger: Arc<CostLedger>,
    memory: Arc<MemoryService>,
    router: ModelRouter,
    model_timeout: Duration,
}

impl NodeExecutor {
    #[must_use]
    pub fn new(
        client: Arc<dyn ModelClient>,
        ledger: Arc<CostLedger>,
        memory: Arc<MemoryService>,
        router: ModelRouter,
        model_timeout: Duration,
    ) -> Self {
        Self {
            client,
            ledger,
            memory,
            router,
            model_timeout,
        }
    }

    /// Run one node against the current state.
    ///
    /// Transient failures are retried per the node's policy with jittered
    /// exponential backoff; the last error is returned once retries
    /// exhaust. Permanent failures return immediately. On success the
    /// output is written back to memory (for memory-worthy nodes) and to
    /// the session history before this returns.
    #[instrument(skip(self, node, state, emitter), fields(session_id = %state.session_id, node = node_name))]
    pub async fn execute(
        &self,
        node_name: &str,
        node: &Arc<dyn Node>,
        state: &WorkflowState,
        emitter: &EventEmitter,
    ) -> Result<NodeOutput, NodeError> {
        let context = self
            .memory
            .load_context(
                state.project_id.as_deref(),
                &state.session_id,
                state.task_id.as_deref(),
            )
            .await?;
        let model_id = self.router.route(node.complexity());

        let ctx = NodeContext::new(
            node_name.to_string(),
            state.step + 1,
            state.session_id.clone(),
            model_id.to_string(),
            context,
            Arc::clone(&self.client),
            Arc::clone(&self.ledger),
            self.model_timeout,
            emitter.clone(),
        );

        let policy = node.retry_policy();
        let mut attempt = 0u32;
        let output = loop {
            match node.run(state, &ctx).await {
                Ok(output) => break output,
                Err(err) if err.is_transient() && attempt < policy.max_retries => {
                    attempt += 1;
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient node failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        if node.memory_worthy()
            && let Some(content) = &output.memory
        {
            let mut metadata = MemoryMetadata::new("node_output")
                .with_session_id(state.session_id.clone());
            if let Some(project_id) = &state.project_id {
                metadata = metadata.with_project_id(project_id.clone());
            }
            self.memory.store(content.clone(), metadata).await?;
        }

        self.memory
            .push_history(&state.session_id, node_name, history_snippet(&output));

        Ok(output)
    }
}

/// Bounded textual summary of a node output for session history.
fn history_snippet(output: &NodeOutput) -> String {
    let text = match &output.memory {
        Some(content) => content.clone(),
        None => output.output.to_string(),
    };
    if text.len() <= HISTORY_SNIPPET_LEN {
        return text;
    }
    let mut end = HISTORY_SNIPPET_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
