//! Workflow session state: the unit of persisted progress.
//!
//! [`WorkflowState`] is created when a workflow is first invoked, mutated
//! exactly once per node execution, and persisted through the checkpoint
//! store between steps. Status transitions are guarded: they are monotonic
//! except for the approval round-trip (`running ⇄ waiting_approval`), and
//! terminal states are immutable.
//!
//! # Examples
//!
//! ```
//! use taskloom::state::{WorkflowKind, WorkflowState, WorkflowStatus};
//! use serde_json::json;
//!
//! let state = WorkflowState::builder("sess-1", WorkflowKind::Research)
//!     .with_project_id("proj-9")
//!     .with_inputs(json!({"topic": "rust workflow engines"}))
//!     .with_entry("gather")
//!     .build();
//!
//! assert_eq!(state.status, WorkflowStatus::Pending);
//! assert_eq!(state.current_node.as_deref(), Some("gather"));
//! ```

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The kind of multi-step workflow a session executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Research,
    Requirements,
    TaskBreakdown,
    Implementation,
    Debug,
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowKind::Research => "research",
            WorkflowKind::Requirements => "requirements",
            WorkflowKind::TaskBreakdown => "task_breakdown",
            WorkflowKind::Implementation => "implementation",
            WorkflowKind::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkflowKind {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research" => Ok(WorkflowKind::Research),
            "requirements" => Ok(WorkflowKind::Requirements),
            "task_breakdown" => Ok(WorkflowKind::TaskBreakdown),
            "implementation" => Ok(WorkflowKind::Implementation),
            "debug" => Ok(WorkflowKind::Debug),
            other => Err(StateError::UnknownWorkflowKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a workflow session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::WaitingApproval => "waiting_approval",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl WorkflowStatus {
    /// Terminal statuses admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// Transitions are monotonic except for the approval round-trip:
    /// `running → waiting_approval` and `waiting_approval → running`.
    #[must_use]
    pub fn can_transition(self, to: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, to) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, WaitingApproval)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled) => true,
            (WaitingApproval, Running) | (WaitingApproval, Cancelled) => true,
            _ => false,
        }
    }
}

/// Category of a recorded workflow failure, inspectable via `get_status`.
///
/// Budget exhaustion is kept distinct from technical failures so callers
/// can present a "usage limit reached" message rather than a generic error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A transient failure that exhausted its retry budget.
    TransientExhausted,
    /// A non-retryable failure (invalid input, bad request).
    Permanent,
    /// A budget ceiling refused the invocation.
    BudgetExceeded,
    /// No outgoing edge condition matched the state.
    NoRoute,
}

/// Structured error recorded on a failed workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// The node that was executing (or about to execute) when the
    /// workflow failed, when attributable.
    pub node: Option<String>,
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(kind: ErrorKind, node: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            node,
            message: message.into(),
        }
    }
}

/// One recorded human approval for an interrupt node.
///
/// Approvals are append-only; the full audit trail stays on the state so
/// `get_status` can show who unblocked what and with which input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    /// The interrupt node this approval unblocked.
    pub node: String,
    /// Arbitrary human-supplied input injected at resume time.
    pub input: Value,
    pub approved_at: DateTime<Utc>,
}

/// Persisted progress of one workflow session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Unique, immutable session identifier.
    pub session_id: String,
    pub kind: WorkflowKind,
    pub project_id: Option<String>,
    /// Task this session is scoped to, if any; used for context loading.
    pub task_id: Option<String>,
    pub status: WorkflowStatus,
    /// Name of the next node to execute; `None` once the graph is exhausted.
    pub current_node: Option<String>,
    /// The caller-supplied workflow inputs, available to every node.
    pub inputs: Value,
    /// Structured output of each completed node, keyed by node name.
    /// Append-only: a key is written exactly once.
    pub node_outputs: FxHashMap<String, Value>,
    /// Human approvals recorded by `resume`, in order.
    #[serde(default)]
    pub approvals: Vec<Approval>,
    /// Running total spend for this session, maintained from the ledger.
    pub cost_accumulator: f64,
    pub error: Option<ErrorInfo>,
    /// Count of completed node executions; orders checkpoint writes.
    pub step: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Start building a fresh session state.
    #[must_use]
    pub fn builder(session_id: impl Into<String>, kind: WorkflowKind) -> WorkflowStateBuilder {
        WorkflowStateBuilder {
            session_id: session_id.into(),
            kind,
            project_id: None,
            task_id: None,
            inputs: Value::Null,
            entry: None,
        }
    }

    /// Apply a status transition, enforcing the lifecycle guard.
    pub fn transition(&mut self, to: WorkflowStatus) -> Result<(), StateError> {
        if !self.status.can_transition(to) {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a node's output. The mapping is append-only; the engine
    /// never executes the same node twice within a session.
    pub fn record_output(&mut self, node: impl Into<String>, output: Value) {
        self.node_outputs.insert(node.into(), output);
        self.updated_at = Utc::now();
    }

    /// Whether the given interrupt node has already been approved.
    #[must_use]
    pub fn is_approved(&self, node: &str) -> bool {
        self.approvals.iter().any(|a| a.node == node)
    }

    /// Append a human approval for the current interrupt node.
    pub fn record_approval(&mut self, node: impl Into<String>, input: Value) {
        self.approvals.push(Approval {
            node: node.into(),
            input,
            approved_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Record a failure and move to `failed`.
    pub fn fail(&mut self, error: ErrorInfo) -> Result<(), StateError> {
        self.error = Some(error);
        self.transition(WorkflowStatus::Failed)
    }
}

/// Builder for fresh [`WorkflowState`] values.
pub struct WorkflowStateBuilder {
    session_id: String,
    kind: WorkflowKind,
    project_id: Option<String>,
    task_id: Option<String>,
    inputs: Value,
    entry: Option<String>,
}

impl WorkflowStateBuilder {
    #[must_use]
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    #[must_use]
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set the entry node the session starts from.
    #[must_use]
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    #[must_use]
    pub fn build(self) -> WorkflowState {
        let now = Utc::now();
        WorkflowState {
            session_id: self.session_id,
            kind: self.kind,
            project_id: self.project_id,
            task_id: self.task_id,
            status: WorkflowStatus::Pending,
            current_node: self.entry,
            inputs: self.inputs,
            node_outputs: FxHashMap::default(),
            approvals: Vec::new(),
            cost_accumulator: 0.0,
            error: None,
            step: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle and parsing errors for workflow state.
#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("invalid status transition: {from} -> {to}")]
    #[diagnostic(
        code(taskloom::state::invalid_transition),
        help("Terminal states are immutable; only waiting_approval <-> running may cycle.")
    )]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("unknown workflow kind: {kind}")]
    #[diagnostic(
        code(taskloom::state::unknown_kind),
        help("Valid kinds: research, requirements, task_breakdown, implementation, debug.")
    )]
    UnknownWorkflowKind { kind: String },
}
