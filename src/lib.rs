//! # Taskloom: Checkpointed Multi-Step AI Workflow Engine
//!
//! Taskloom drives multi-step AI workflows as graphs of prompt-invoking
//! nodes, with human-approval interrupts, durable checkpoints, context
//! assembly from a hierarchical memory service, and hard cost-budget
//! enforcement on every model invocation.
//!
//! ## Core Concepts
//!
//! - **Workflow graphs**: nodes wired by (optionally conditional) edges,
//!   validated at compile time, routed first-match-wins
//! - **Sessions**: one [`state::WorkflowState`] per run, checkpointed
//!   after every node so execution survives a crash and can pause for
//!   human approval
//! - **Cost ledger**: every token billed the moment the model responds,
//!   with daily and monthly ceilings refusing further invocations
//! - **Memory service**: task data, project summary, session history,
//!   and semantically similar records assembled in priority order
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use taskloom::models::ModelClient;
//! use taskloom::runtimes::WorkflowEngine;
//! use taskloom::state::WorkflowKind;
//!
//! # async fn example(client: Arc<dyn ModelClient>) -> miette::Result<()> {
//! let engine = WorkflowEngine::builder(WorkflowKind::Research, client).build()?;
//!
//! let state = engine
//!     .run_to_completion("session-1", json!({"topic": "vector databases"}))
//!     .await?;
//! println!("{} after {} steps, ${:.4} spent",
//!     state.status, state.step, state.cost_accumulator);
//! # Ok(())
//! # }
//! ```
//!
//! Streaming consumers use [`runtimes::WorkflowEngine::execute`] and pull
//! [`runtimes::StepEvent`]s from the returned stream; workflows with an
//! interrupt node pause in `waiting_approval` and continue through
//! [`runtimes::WorkflowEngine::resume`].

pub mod config;
pub mod graphs;
pub mod ledger;
pub mod memory;
pub mod message;
pub mod models;
pub mod node;
pub mod router;
pub mod runtimes;
pub mod state;
pub mod telemetry;
pub mod workflows;
