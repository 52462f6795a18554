use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{GraphBuilder, GraphError};
use crate::node::{Node, NodeContext, NodeError, NodeOutput};
use crate::state::{WorkflowKind, WorkflowState};

struct Noop;

#[async_trait]
impl Node for Noop {
    async fn run(
        &self,
        _state: &WorkflowState,
        _ctx: &NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::default())
    }
}

fn state() -> WorkflowState {
    WorkflowState::builder("s1", WorkflowKind::Debug)
        .with_entry("a")
        .build()
}

#[test]
fn linear_graph_compiles_and_routes() {
    let graph = GraphBuilder::new()
        .add_node("a", Noop)
        .add_node("b", Noop)
        .add_node("c", Noop)
        .add_edge("a", "b")
        .add_edge("b", "c")
        .set_entry("a")
        .compile()
        .unwrap();

    let state = state();
    assert_eq!(graph.entry(), "a");
    assert_eq!(graph.next_node("a", &state).unwrap().as_deref(), Some("b"));
    assert_eq!(graph.next_node("b", &state).unwrap().as_deref(), Some("c"));
    assert_eq!(graph.next_node("c", &state).unwrap(), None);
}

#[test]
fn duplicate_node_rejected() {
    let err = GraphBuilder::new()
        .add_node("a", Noop)
        .add_node("a", Noop)
        .set_entry("a")
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateNode { name } if name == "a"));
}

#[test]
fn missing_entry_rejected() {
    let err = GraphBuilder::new().add_node("a", Noop).compile().unwrap_err();
    assert!(matches!(err, GraphError::NoEntryPoint));
}

#[test]
fn unknown_edge_target_rejected() {
    let err = GraphBuilder::new()
        .add_node("a", Noop)
        .add_edge("a", "ghost")
        .set_entry("a")
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownNode { name, .. } if name == "ghost"));
}

#[test]
fn unknown_interrupt_rejected() {
    let err = GraphBuilder::new()
        .add_node("a", Noop)
        .set_entry("a")
        .mark_interrupt("ghost")
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownNode { name, .. } if name == "ghost"));
}

#[test]
fn two_unconditional_edges_are_ambiguous() {
    let err = GraphBuilder::new()
        .add_node("a", Noop)
        .add_node("b", Noop)
        .add_node("c", Noop)
        .add_edge("a", "b")
        .add_edge("a", "c")
        .set_entry("a")
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::AmbiguousRouting { node, .. } if node == "a"));
}

#[test]
fn unconditional_edge_before_conditional_is_ambiguous() {
    let err = GraphBuilder::new()
        .add_node("a", Noop)
        .add_node("b", Noop)
        .add_node("c", Noop)
        .add_edge("a", "b")
        .add_conditional_edge("a", "c", Arc::new(|_| true))
        .set_entry("a")
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::AmbiguousRouting { node, .. } if node == "a"));
}

#[test]
fn conditional_edges_then_fallback_are_legal() {
    let graph = GraphBuilder::new()
        .add_node("a", Noop)
        .add_node("b", Noop)
        .add_node("c", Noop)
        .add_conditional_edge("a", "b", Arc::new(|_| false))
        .add_edge("a", "c")
        .set_entry("a")
        .compile()
        .unwrap();
    let state = state();
    assert_eq!(graph.next_node("a", &state).unwrap().as_deref(), Some("c"));
}

#[test]
fn first_matching_edge_wins() {
    let graph = GraphBuilder::new()
        .add_node("diagnose", Noop)
        .add_node("propose_fix", Noop)
        .add_node("escalate", Noop)
        .add_conditional_edge(
            "diagnose",
            "propose_fix",
            Arc::new(|state| {
                state
                    .node_outputs
                    .get("diagnose")
                    .and_then(|v| v.get("resolved"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            }),
        )
        .add_edge("diagnose", "escalate")
        .set_entry("diagnose")
        .compile()
        .unwrap();

    let mut state = state();
    assert_eq!(
        graph.next_node("diagnose", &state).unwrap().as_deref(),
        Some("escalate")
    );
    state.record_output("diagnose", json!({"resolved": true}));
    assert_eq!(
        graph.next_node("diagnose", &state).unwrap().as_deref(),
        Some("propose_fix")
    );
}

#[test]
fn no_matching_conditional_edge_is_no_route() {
    let graph = GraphBuilder::new()
        .add_node("a", Noop)
        .add_node("b", Noop)
        .add_conditional_edge("a", "b", Arc::new(|_| false))
        .set_entry("a")
        .compile()
        .unwrap();
    let err = graph.next_node("a", &state()).unwrap_err();
    assert!(matches!(err, GraphError::NoRoute { node } if node == "a"));
}

#[test]
fn compiled_graph_formats_for_diagnostics() {
    let graph = GraphBuilder::new()
        .add_node("a", Noop)
        .add_node("b", Noop)
        .add_edge("a", "b")
        .set_entry("a")
        .compile()
        .unwrap();
    let rendered = format!("{graph:?}");
    assert!(rendered.contains("entry"));
    assert!(rendered.contains("\"a\""));
    assert!(rendered.contains("\"b\""));
}

#[test]
fn interrupt_markers_survive_compilation() {
    let graph = GraphBuilder::new()
        .add_node("specify", Noop)
        .add_node("handoff", Noop)
        .add_edge("specify", "handoff")
        .set_entry("specify")
        .mark_interrupt("handoff")
        .compile()
        .unwrap();
    assert!(graph.is_interrupt("handoff"));
    assert!(!graph.is_interrupt("specify"));
}
