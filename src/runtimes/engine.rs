//! The workflow engine: session lifecycle, interrupts, budget gating,
//! and checkpointed step-by-step graph execution.
//!
//! One engine drives one compiled graph (one [`WorkflowKind`]). Each
//! `execute`/`resume` call spawns a driver task that runs the session's
//! nodes sequentially and reports progress through an
//! [`ExecutionStream`]; the caller may drop the stream at any time
//! without affecting durability, since every step is checkpointed
//! synchronously before its event is emitted.
//!
//! Per-step sequence: cancellation check, interrupt check, budget check,
//! node execution (with per-node retry), cost accumulator update,
//! routing, checkpoint write, event. Sessions enter the driver already
//! running and checkpointed, so an interrupting entry node pauses from a
//! legal status and `get_status` never misses a started session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use super::checkpointer::{Checkpoint, Checkpointer, CheckpointerError, InMemoryCheckpointer};
use super::events::{EventEmitter, ExecutionStream, StepEvent};
use super::executor::NodeExecutor;
use crate::config::EngineConfig;
use crate::graphs::{GraphError, WorkflowGraph};
use crate::ledger::{BudgetDecision, CostLedger, PricingTable};
use crate::memory::MemoryService;
use crate::models::ModelClient;
use crate::router::ModelRouter;
use crate::state::{
    ErrorInfo, ErrorKind, StateError, WorkflowKind, WorkflowState, WorkflowStatus,
};

/// Errors surfaced by engine operations.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("no session found with id: {session_id}")]
    #[diagnostic(
        code(taskloom::engine::session_not_found),
        help("Sessions expire with their checkpoints; check the id and the checkpoint TTL.")
    )]
    SessionNotFound { session_id: String },

    #[error("session {session_id} already has an active driver")]
    #[diagnostic(
        code(taskloom::engine::session_active),
        help("Wait for the current execution to pause or finish before driving it again.")
    )]
    SessionActive { session_id: String },

    #[error("session {session_id} is already {status}")]
    #[diagnostic(
        code(taskloom::engine::session_terminal),
        help("Terminal sessions are immutable; start a new session instead.")
    )]
    SessionTerminal {
        session_id: String,
        status: WorkflowStatus,
    },

    #[error("session {session_id} is waiting for approval at node {node}")]
    #[diagnostic(
        code(taskloom::engine::awaiting_approval),
        help("Use resume with the human input to continue this session.")
    )]
    AwaitingApproval { session_id: String, node: String },

    #[error("cannot resume session {session_id}: status is {status}, not waiting_approval")]
    #[diagnostic(
        code(taskloom::engine::invalid_resume),
        help("resume only applies to sessions paused at an interrupt node.")
    )]
    InvalidResumeState {
        session_id: String,
        status: WorkflowStatus,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),
}

/// Builder for [`WorkflowEngine`] with defaulted infrastructure.
pub struct WorkflowEngineBuilder {
    kind: WorkflowKind,
    client: Arc<dyn ModelClient>,
    graph: Option<WorkflowGraph>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    ledger: Option<Arc<CostLedger>>,
    memory: Option<Arc<MemoryService>>,
    router: ModelRouter,
    config: EngineConfig,
}

impl WorkflowEngineBuilder {
    /// Replace the graph compiled for the workflow kind with a custom one.
    #[must_use]
    pub fn with_graph(mut self, graph: WorkflowGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[must_use]
    pub fn with_memory(mut self, memory: Arc<MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    #[must_use]
    pub fn with_router(mut self, router: ModelRouter) -> Self {
        self.router = router;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine, compiling the kind's standard graph unless a
    /// custom one was supplied.
    pub fn build(self) -> Result<Arc<WorkflowEngine>, EngineError> {
        let graph = match self.graph {
            Some(graph) => graph,
            None => crate::workflows::build_graph(self.kind)?,
        };
        let ledger = self.ledger.unwrap_or_else(|| {
            Arc::new(CostLedger::new(PricingTable::default(), self.config.budget))
        });
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(MemoryService::in_memory()));
        let checkpointer = self
            .checkpointer
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointer::new()));
        let executor = NodeExecutor::new(
            self.client,
            Arc::clone(&ledger),
            Arc::clone(&memory),
            self.router,
            self.config.model_timeout,
        );
        Ok(Arc::new(WorkflowEngine {
            kind: self.kind,
            graph: Arc::new(graph),
            checkpointer,
            ledger,
            memory,
            executor,
            config: self.config,
            active: Mutex::new(FxHashMap::default()),
        }))
    }
}

/// Drives workflow sessions over one compiled graph.
pub struct WorkflowEngine {
    kind: WorkflowKind,
    graph: Arc<WorkflowGraph>,
    checkpointer: Arc<dyn Checkpointer>,
    ledger: Arc<CostLedger>,
    memory: Arc<MemoryService>,
    executor: NodeExecutor,
    config: EngineConfig,
    /// Cancellation flags for sessions with a live driver task.
    active: Mutex<FxHashMap<String, Arc<AtomicBool>>>,
}

impl WorkflowEngine {
    /// Start configuring an engine for one workflow kind.
    #[must_use]
    pub fn builder(kind: WorkflowKind, client: Arc<dyn ModelClient>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            kind,
            client,
            graph: None,
            checkpointer: None,
            ledger: None,
            memory: None,
            router: ModelRouter::default(),
            config: EngineConfig::default(),
        }
    }

    /// The workflow kind this engine drives.
    #[must_use]
    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    /// Shared memory service, for installing project summaries and task
    /// data from the surrounding application.
    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryService> {
        &self.memory
    }

    /// Shared cost ledger, for spend inspection.
    #[must_use]
    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Start (or crash-recover) a session and return its event stream.
    ///
    /// A fresh session starts at the graph's entry node; its initial
    /// state is checkpointed before this returns, so `get_status` sees
    /// the session immediately and a crash during the first node cannot
    /// lose it. If an unexpired checkpoint already exists for
    /// `session_id`, a non-terminal, non-waiting one is picked up where
    /// it left off (`inputs` is ignored in that case); terminal and
    /// waiting sessions are refused with typed errors.
    #[instrument(skip(self, inputs), err)]
    pub async fn execute(
        self: &Arc<Self>,
        session_id: &str,
        inputs: Value,
    ) -> Result<ExecutionStream, EngineError> {
        self.execute_scoped(session_id, inputs, None, None).await
    }

    /// [`execute`](Self::execute) with project/task scoping for context
    /// assembly.
    #[instrument(skip(self, inputs), err)]
    pub async fn execute_scoped(
        self: &Arc<Self>,
        session_id: &str,
        inputs: Value,
        project_id: Option<String>,
        task_id: Option<String>,
    ) -> Result<ExecutionStream, EngineError> {
        let cancel = self.reserve(session_id)?;
        match self
            .prepare_execute(session_id, inputs, project_id, task_id)
            .await
        {
            Ok(state) => Ok(self.spawn_driver(state, cancel)),
            Err(err) => {
                self.release(session_id);
                Err(err)
            }
        }
    }

    async fn prepare_execute(
        &self,
        session_id: &str,
        inputs: Value,
        project_id: Option<String>,
        task_id: Option<String>,
    ) -> Result<WorkflowState, EngineError> {
        match self.checkpointer.load_latest(session_id).await? {
            Some(checkpoint) => {
                let state = checkpoint.state;
                if state.status.is_terminal() {
                    return Err(EngineError::SessionTerminal {
                        session_id: session_id.to_string(),
                        status: state.status,
                    });
                }
                if state.status == WorkflowStatus::WaitingApproval {
                    return Err(EngineError::AwaitingApproval {
                        session_id: session_id.to_string(),
                        node: state.current_node.clone().unwrap_or_default(),
                    });
                }
                tracing::info!(session_id, step = state.step, "recovering checkpointed session");
                Ok(state)
            }
            None => {
                let mut builder = WorkflowState::builder(session_id, self.kind)
                    .with_inputs(inputs)
                    .with_entry(self.graph.entry());
                if let Some(project_id) = project_id {
                    builder = builder.with_project_id(project_id);
                }
                if let Some(task_id) = task_id {
                    builder = builder.with_task_id(task_id);
                }
                let mut state = builder.build();
                // The session must be durable and visible to get_status
                // before its first node runs.
                state.transition(WorkflowStatus::Running)?;
                self.save(&state).await?;
                Ok(state)
            }
        }
    }

    /// Continue a session paused at an interrupt node.
    ///
    /// Records `human_input` as an approval for the interrupted node and
    /// restarts the driver from exactly that node.
    #[instrument(skip(self, human_input), err)]
    pub async fn resume(
        self: &Arc<Self>,
        session_id: &str,
        human_input: Value,
    ) -> Result<ExecutionStream, EngineError> {
        let cancel = self.reserve(session_id)?;
        match self.prepare_resume(session_id, human_input).await {
            Ok(state) => Ok(self.spawn_driver(state, cancel)),
            Err(err) => {
                self.release(session_id);
                Err(err)
            }
        }
    }

    async fn prepare_resume(
        &self,
        session_id: &str,
        human_input: Value,
    ) -> Result<WorkflowState, EngineError> {
        let checkpoint = self.checkpointer.load_latest(session_id).await?.ok_or_else(|| {
            EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        let mut state = checkpoint.state;
        if state.status != WorkflowStatus::WaitingApproval {
            return Err(EngineError::InvalidResumeState {
                session_id: session_id.to_string(),
                status: state.status,
            });
        }
        let node = state.current_node.clone().unwrap_or_default();
        state.record_approval(node, human_input);
        state.transition(WorkflowStatus::Running)?;
        self.save(&state).await?;
        Ok(state)
    }

    /// Request cancellation of a session.
    ///
    /// Active drivers observe the advisory flag at the next step boundary
    /// (the in-flight node finishes). An inactive non-terminal session is
    /// cancelled directly; a terminal session is left untouched and its
    /// status returned.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, session_id: &str) -> Result<WorkflowStatus, EngineError> {
        let flag = self.active.lock().get(session_id).cloned();
        if let Some(flag) = flag {
            flag.store(true, Ordering::SeqCst);
            let status = self
                .checkpointer
                .load_latest(session_id)
                .await?
                .map_or(WorkflowStatus::Running, |cp| cp.state.status);
            return Ok(status);
        }

        let checkpoint = self.checkpointer.load_latest(session_id).await?.ok_or_else(|| {
            EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        let mut state = checkpoint.state;
        if state.status.is_terminal() {
            return Ok(state.status);
        }
        state.transition(WorkflowStatus::Cancelled)?;
        self.save(&state).await?;
        Ok(WorkflowStatus::Cancelled)
    }

    /// Latest persisted state of a session.
    #[instrument(skip(self), err)]
    pub async fn get_status(&self, session_id: &str) -> Result<WorkflowState, EngineError> {
        let checkpoint = self.checkpointer.load_latest(session_id).await?.ok_or_else(|| {
            EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        })?;
        Ok(checkpoint.state)
    }

    /// Run a fresh session to its first stopping point, draining events
    /// internally, and return the final persisted state.
    ///
    /// "Stopping point" includes `waiting_approval`: callers using
    /// interrupting workflows should check the returned status.
    pub async fn run_to_completion(
        self: &Arc<Self>,
        session_id: &str,
        inputs: Value,
    ) -> Result<WorkflowState, EngineError> {
        let stream = self.execute(session_id, inputs).await?;
        stream.collect_events().await;
        self.get_status(session_id).await
    }

    /// Atomically claim the session's driver slot, installing its cancel
    /// flag. The check and the insert share one lock acquisition so two
    /// concurrent callers can never both claim the slot.
    fn reserve(&self, session_id: &str) -> Result<Arc<AtomicBool>, EngineError> {
        use std::collections::hash_map::Entry;
        match self.active.lock().entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(EngineError::SessionActive {
                session_id: session_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let flag = Arc::new(AtomicBool::new(false));
                slot.insert(Arc::clone(&flag));
                Ok(flag)
            }
        }
    }

    fn release(&self, session_id: &str) {
        self.active.lock().remove(session_id);
    }

    async fn save(&self, state: &WorkflowState) -> Result<(), CheckpointerError> {
        self.checkpointer
            .save(Checkpoint::from_state(state, self.config.checkpoint_ttl))
            .await
    }

    /// Spawn the driver for a reserved session.
    ///
    /// The driver runs on its own task, supervised so the session slot
    /// is released and the stream ends even if a node implementation
    /// panics; the slot is always released before the emitter drops, so
    /// once the stream ends the session already reads as idle.
    fn spawn_driver(self: &Arc<Self>, state: WorkflowState, cancel: Arc<AtomicBool>) -> ExecutionStream {
        let (emitter, stream) = EventEmitter::channel(self.config.event_buffer);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let session_id = state.session_id.clone();
            let driver = tokio::spawn({
                let engine = Arc::clone(&engine);
                let emitter = emitter.clone();
                async move { engine.drive(state, &emitter, cancel).await }
            });
            if driver.await.is_err() {
                tracing::error!(session_id = %session_id, "driver task panicked");
            }
            engine.release(&session_id);
            drop(emitter);
        });
        stream
    }

    /// The per-session driver loop. Infallible by construction: every
    /// failure is recorded on the state and reported as an event.
    #[instrument(skip_all, fields(session_id = %state.session_id))]
    async fn drive(&self, mut state: WorkflowState, emitter: &EventEmitter, cancel: Arc<AtomicBool>) {
        if let Some(node) = &state.current_node {
            emitter
                .send(StepEvent::Started {
                    session_id: state.session_id.clone(),
                    node: node.clone(),
                })
                .await;
        }

        loop {
            let Some(node_name) = state.current_node.clone() else {
                // Graph exhausted outside the normal completion path;
                // nothing left to drive.
                break;
            };

            if cancel.load(Ordering::SeqCst) {
                self.settle(&mut state, WorkflowStatus::Cancelled).await;
                emitter
                    .send(StepEvent::Cancelled {
                        session_id: state.session_id.clone(),
                    })
                    .await;
                break;
            }

            if self.graph.is_interrupt(&node_name) && !state.is_approved(&node_name) {
                self.settle(&mut state, WorkflowStatus::WaitingApproval).await;
                emitter
                    .send(StepEvent::WaitingApproval {
                        session_id: state.session_id.clone(),
                        node: node_name,
                    })
                    .await;
                break;
            }

            match self.ledger.check_budget(&state.session_id) {
                BudgetDecision::Blocked { period } => {
                    let error = ErrorInfo::new(
                        ErrorKind::BudgetExceeded,
                        Some(node_name),
                        format!("{period} budget ceiling reached"),
                    );
                    self.fail_session(&mut state, error, emitter).await;
                    break;
                }
                BudgetDecision::Throttled { period, usage_ratio } => {
                    emitter
                        .send(StepEvent::BudgetThrottled {
                            session_id: state.session_id.clone(),
                            period,
                            usage_ratio,
                        })
                        .await;
                }
                BudgetDecision::Allowed => {}
            }

            let Some(node) = self.graph.node(&node_name).cloned() else {
                let error = ErrorInfo::new(
                    ErrorKind::Permanent,
                    Some(node_name.clone()),
                    format!("node {node_name} is not in the compiled graph"),
                );
                self.fail_session(&mut state, error, emitter).await;
                break;
            };

            let cost_before = self.ledger.session_total(&state.session_id);
            match self.executor.execute(&node_name, &node, &state, emitter).await {
                Ok(output) => {
                    state.record_output(&node_name, output.output);
                    state.step += 1;
                    state.cost_accumulator = self.ledger.session_total(&state.session_id);
                    let node_cost = state.cost_accumulator - cost_before;

                    match self.graph.next_node(&node_name, &state) {
                        Ok(next) => {
                            state.current_node = next;
                        }
                        Err(err) => {
                            let error = ErrorInfo::new(
                                ErrorKind::NoRoute,
                                Some(node_name),
                                err.to_string(),
                            );
                            self.fail_session(&mut state, error, emitter).await;
                            break;
                        }
                    }

                    if state.current_node.is_none() {
                        self.settle(&mut state, WorkflowStatus::Completed).await;
                        emitter
                            .send(StepEvent::NodeCompleted {
                                session_id: state.session_id.clone(),
                                node: node_name,
                                step: state.step,
                                cost: node_cost,
                            })
                            .await;
                        emitter
                            .send(StepEvent::Completed {
                                session_id: state.session_id.clone(),
                                step: state.step,
                            })
                            .await;
                        break;
                    }

                    if let Err(err) = self.save(&state).await {
                        tracing::error!(error = %err, "checkpoint write failed");
                        let error = ErrorInfo::new(
                            ErrorKind::Permanent,
                            Some(node_name),
                            format!("checkpoint write failed: {err}"),
                        );
                        self.fail_session(&mut state, error, emitter).await;
                        break;
                    }
                    emitter
                        .send(StepEvent::NodeCompleted {
                            session_id: state.session_id.clone(),
                            node: node_name,
                            step: state.step,
                            cost: node_cost,
                        })
                        .await;
                }
                Err(err) => {
                    // Partial usage from failed attempts is still billed.
                    state.cost_accumulator = self.ledger.session_total(&state.session_id);
                    let kind = if err.is_transient() {
                        ErrorKind::TransientExhausted
                    } else {
                        ErrorKind::Permanent
                    };
                    let error = ErrorInfo::new(kind, Some(node_name), err.to_string());
                    self.fail_session(&mut state, error, emitter).await;
                    break;
                }
            }
        }
    }

    /// Transition to a non-failure status and persist. Transition errors
    /// here indicate a driver bug; they are logged, never panicked on.
    async fn settle(&self, state: &mut WorkflowState, to: WorkflowStatus) {
        if let Err(err) = state.transition(to) {
            tracing::error!(error = %err, "illegal driver transition");
            return;
        }
        if let Err(err) = self.save(state).await {
            tracing::error!(error = %err, %to, "checkpoint write failed while settling");
        }
    }

    async fn fail_session(
        &self,
        state: &mut WorkflowState,
        error: ErrorInfo,
        emitter: &EventEmitter,
    ) {
        tracing::warn!(
            session_id = %state.session_id,
            kind = ?error.kind,
            node = ?error.node,
            message = %error.message,
            "workflow failed"
        );
        if let Err(err) = state.fail(error.clone()) {
            tracing::error!(error = %err, "could not record failure transition");
        }
        if let Err(err) = self.save(state).await {
            tracing::error!(error = %err, "checkpoint write failed while failing session");
        }
        emitter
            .send(StepEvent::Failed {
                session_id: state.session_id.clone(),
                node: error.node.clone(),
                error,
            })
            .await;
    }
}
