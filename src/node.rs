//! Node execution primitives: the [`Node`] trait, execution context, and
//! error taxonomy.
//!
//! A node is one unit of AI-invoking work inside a workflow graph. Nodes
//! receive the current [`WorkflowState`] and a [`NodeContext`] carrying
//! the preassembled context bundle and the routed model endpoint, and
//! return a [`NodeOutput`]. Everything around the node (retries, budget
//! checks, checkpointing, routing) is the engine's job; a node only
//! builds its prompt, calls [`NodeContext::complete`], and interprets the
//! response.
//!
//! Token usage is billed to the cost ledger inside `complete`, at the
//! moment the provider responds. That is strictly before any state
//! update, so partial usage is billed even when a later step of the same
//! node fails.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::ledger::CostLedger;
use crate::memory::{ContextBundle, MemoryError};
use crate::message::Message;
use crate::models::{Completion, ModelClient, ModelError};
use crate::router::Complexity;
use crate::runtimes::events::EventEmitter;
use crate::state::WorkflowState;

/// Core trait for executable workflow nodes.
///
/// Implementations should be stateless: all inputs arrive through the
/// state snapshot and context, and all effects leave through the returned
/// [`NodeOutput`].
#[async_trait]
pub trait Node: Send + Sync {
    /// Static complexity tag used by the model router.
    fn complexity(&self) -> Complexity {
        Complexity::Medium
    }

    /// Per-node retry policy for transient failures.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Whether this node's output should be persisted as semantic memory.
    fn memory_worthy(&self) -> bool {
        false
    }

    /// Execute this node against the given state snapshot.
    async fn run(&self, state: &WorkflowState, ctx: &NodeContext)
    -> Result<NodeOutput, NodeError>;
}

/// Retry policy for transient node failures.
///
/// Delays grow exponentially from `base_delay`, capped at `max_delay`,
/// with up to 50% random jitter to avoid thundering retries across
/// concurrent sessions.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default 2).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No retries; every failure is final.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff delay before retry number `attempt` (1-based), jittered.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter = rand::random::<f64>() * 0.5;
        capped.mul_f64(1.0 + jitter)
    }
}

/// Execution context handed to a node for one run.
///
/// Owns the routed model id, the assembled context bundle, and the
/// billing hookup. Constructed by the engine's node executor.
pub struct NodeContext {
    /// Graph name of the node being executed.
    pub node_name: String,
    /// Session step number this execution belongs to.
    pub step: u64,
    pub session_id: String,
    /// Concrete model endpoint selected for this node's complexity tag.
    pub model_id: String,
    /// Context assembled by the memory service, in priority order.
    pub context: ContextBundle,
    client: Arc<dyn ModelClient>,
    ledger: Arc<CostLedger>,
    timeout: Duration,
    emitter: EventEmitter,
}

impl NodeContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node_name: String,
        step: u64,
        session_id: String,
        model_id: String,
        context: ContextBundle,
        client: Arc<dyn ModelClient>,
        ledger: Arc<CostLedger>,
        timeout: Duration,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            node_name,
            step,
            session_id,
            model_id,
            context,
            client,
            ledger,
            timeout,
            emitter,
        }
    }

    /// Invoke the routed model endpoint with a bounded timeout.
    ///
    /// On success the token usage is recorded to the cost ledger before
    /// this function returns. A timeout surfaces as a transient error and
    /// is subject to the node's retry policy.
    pub async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<Completion, NodeError> {
        let call = self.client.complete(&self.model_id, messages, max_tokens);
        let completion = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| NodeError::Timeout {
                seconds: self.timeout.as_secs(),
            })??;

        self.ledger.record(
            &self.session_id,
            &self.model_id,
            completion.input_tokens,
            completion.output_tokens,
        );
        Ok(completion)
    }

    /// Emit a node-scoped progress message onto the session's event
    /// stream. Best-effort: a full or disconnected stream never fails the
    /// node.
    pub fn emit(&self, scope: impl Into<String>, message: impl Into<String>) {
        self.emitter
            .node_message(&self.node_name, self.step, scope, message);
    }
}

/// Result of a successful node execution.
#[derive(Clone, Debug, Default)]
pub struct NodeOutput {
    /// Structured output recorded under `node_outputs[name]`.
    pub output: Value,
    /// Content to persist as a memory record, for memory-worthy nodes.
    pub memory: Option<String>,
}

impl NodeOutput {
    #[must_use]
    pub fn new(output: Value) -> Self {
        Self {
            output,
            memory: None,
        }
    }

    #[must_use]
    pub fn with_memory(mut self, content: impl Into<String>) -> Self {
        self.memory = Some(content.into());
        self
    }
}

/// Errors that can occur during node execution.
///
/// The transient/permanent split is the retry boundary: transient errors
/// are retried per the node's [`RetryPolicy`] and only surface once
/// retries exhaust; permanent errors fail the workflow immediately.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Retry-eligible failure local to this node.
    #[error("transient node error: {message}")]
    #[diagnostic(code(taskloom::node::transient))]
    Transient { message: String },

    /// Non-retryable failure; fails the workflow immediately.
    #[error("permanent node error: {message}")]
    #[diagnostic(code(taskloom::node::permanent))]
    Permanent { message: String },

    /// Model invocation exceeded the configured timeout.
    #[error("model invocation timed out after {seconds}s")]
    #[diagnostic(
        code(taskloom::node::timeout),
        help("Timeouts are transient; the call is retried per the node's retry policy.")
    )]
    Timeout { seconds: u64 },

    /// Expected input data is missing from the state snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(taskloom::node::missing_input),
        help("Check that the workflow inputs or a previous node produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(taskloom::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Model endpoint error; carries its own transient/permanent split.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    /// Memory service failure while loading context or storing output.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),
}

impl NodeError {
    /// Shorthand for a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        NodeError::Transient {
            message: message.into(),
        }
    }

    /// Shorthand for a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        NodeError::Permanent {
            message: message.into(),
        }
    }

    /// Whether this error is eligible for the per-node retry policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Transient { .. } | NodeError::Timeout { .. } => true,
            NodeError::Model(e) => e.is_transient(),
            _ => false,
        }
    }
}
