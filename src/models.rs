//! Model endpoint contract consumed by workflow nodes.
//!
//! The engine never talks to a transport directly: every invocation goes
//! through the [`ModelClient`] trait, which mirrors the uniform
//! `complete(model_id, messages, max_tokens)` contract of the surrounding
//! platform. Implementations wrap whatever provider SDK or HTTP client the
//! application uses; tests substitute scripted mocks.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::message::Message;

/// Result of a successful model invocation.
///
/// Token counts come straight from the provider response and feed the
/// cost ledger; they are never estimated locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Generated text content.
    pub content: String,
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced in the response.
    pub output_tokens: u64,
}

/// Errors surfaced by model endpoints, split along the retry boundary.
///
/// Transient failures (network, timeouts, rate limits) are retry-eligible
/// under the per-node retry policy; permanent failures (invalid request,
/// unknown model) fail the workflow immediately.
#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    /// Retry-eligible failure: the same request may succeed later.
    #[error("transient model error ({provider}): {message}")]
    #[diagnostic(
        code(taskloom::model::transient),
        help("The call is retried per the node's retry policy.")
    )]
    Transient {
        provider: &'static str,
        message: String,
    },

    /// Non-retryable failure: the request itself is invalid.
    #[error("permanent model error ({provider}): {message}")]
    #[diagnostic(
        code(taskloom::model::permanent),
        help("Check the model id and request shape; retries will not help.")
    )]
    Permanent {
        provider: &'static str,
        message: String,
    },
}

impl ModelError {
    /// Whether this error is eligible for the per-node retry policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient { .. })
    }
}

/// Uniform completion contract over AI model endpoints.
///
/// `model_id` is the concrete endpoint identifier selected by the
/// [`ModelRouter`](crate::router::ModelRouter); implementations are free
/// to map it onto provider-specific routing.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Invoke the endpoint with the given conversation and output cap.
    async fn complete(
        &self,
        model_id: &str,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<Completion, ModelError>;
}
