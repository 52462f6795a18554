//! Edge types and routing predicates for conditional graph flow.

use std::fmt;
use std::sync::Arc;

use crate::state::WorkflowState;

/// Predicate over the workflow state guarding a conditional edge.
///
/// Predicates must be pure functions of the state: routing re-evaluates
/// them on resume, so side effects or ambient reads would break the
/// guarantee that a resumed session routes the same way.
///
/// # Examples
///
/// ```
/// use taskloom::graphs::EdgePredicate;
/// use std::sync::Arc;
///
/// let resolved: EdgePredicate = Arc::new(|state| {
///     state
///         .node_outputs
///         .get("diagnose")
///         .and_then(|v| v.get("resolved"))
///         .and_then(|v| v.as_bool())
///         .unwrap_or(false)
/// });
/// ```
pub type EdgePredicate = Arc<dyn Fn(&WorkflowState) -> bool + Send + Sync + 'static>;

/// One directed edge out of a node, optionally guarded by a predicate.
///
/// Unconditional edges (`condition == None`) always match. Within a
/// node's outgoing edges, the first match in registration order wins.
#[derive(Clone)]
pub struct Edge {
    pub(crate) to: String,
    pub(crate) condition: Option<EdgePredicate>,
}

impl Edge {
    #[must_use]
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            condition: None,
        }
    }

    #[must_use]
    pub fn conditional(to: impl Into<String>, condition: EdgePredicate) -> Self {
        Self {
            to: to.into(),
            condition: Some(condition),
        }
    }

    /// Target node name.
    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Whether this edge accepts the given state.
    #[must_use]
    pub fn matches(&self, state: &WorkflowState) -> bool {
        match &self.condition {
            None => true,
            Some(predicate) => predicate(state),
        }
    }

    /// Whether this edge is unconditional.
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        self.condition.is_none()
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("to", &self.to)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}
