mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{MockModelClient, mock_ledger, uniform_router, unlimited_budget};
use taskloom::graphs::{GraphBuilder, WorkflowGraph};
use taskloom::models::ModelClient;
use taskloom::runtimes::{StepEvent, WorkflowEngine};
use taskloom::state::{ErrorKind, WorkflowKind, WorkflowStatus};
use taskloom::workflows::PromptNode;

fn linear_graph() -> WorkflowGraph {
    GraphBuilder::new()
        .add_node("a", PromptNode::new("You are step A.", "Do step A."))
        .add_node("b", PromptNode::new("You are step B.", "Do step B."))
        .add_node("c", PromptNode::new("You are step C.", "Do step C."))
        .add_edge("a", "b")
        .add_edge("b", "c")
        .set_entry("a")
        .compile()
        .expect("valid graph")
}

fn engine_with(client: Arc<MockModelClient>, graph: WorkflowGraph) -> Arc<WorkflowEngine> {
    WorkflowEngine::builder(WorkflowKind::Research, client as Arc<dyn ModelClient>)
        .with_graph(graph)
        .with_router(uniform_router())
        .with_ledger(mock_ledger(unlimited_budget()))
        .build()
        .expect("engine builds")
}

#[tokio::test]
async fn three_node_line_runs_to_completion() {
    let client = MockModelClient::new();
    client.push_completion("alpha", 1000, 500); // $1.50
    client.push_completion("bravo", 2000, 1000); // $3.00
    client.push_completion("charlie", 500, 500); // $1.00
    let engine = engine_with(Arc::clone(&client), linear_graph());

    let stream = engine
        .execute("smoke-1", json!({"topic": "graph engines"}))
        .await
        .unwrap();
    let events = stream.collect_events().await;

    let state = engine.get_status("smoke-1").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.step, 3);
    assert!(state.current_node.is_none());
    assert!(state.error.is_none());

    let mut nodes: Vec<&str> = state.node_outputs.keys().map(String::as_str).collect();
    nodes.sort_unstable();
    assert_eq!(nodes, vec!["a", "b", "c"]);
    assert_eq!(state.node_outputs["b"], json!({"content": "bravo"}));

    assert!((state.cost_accumulator - 5.5).abs() < 1e-9);
    assert_eq!(engine.ledger().entries_for("smoke-1").len(), 3);
    assert_eq!(client.call_count(), 3);

    assert!(matches!(events.first(), Some(StepEvent::Started { node, .. }) if node == "a"));
    let completed_nodes: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StepEvent::NodeCompleted { node, .. } => Some(node.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completed_nodes, vec!["a", "b", "c"]);
    assert!(matches!(
        events.last(),
        Some(StepEvent::Completed { step: 3, .. })
    ));
}

#[tokio::test]
async fn node_completed_events_carry_per_node_cost() {
    let client = MockModelClient::new();
    client.push_completion("alpha", 1000, 0); // $1
    client.push_completion("bravo", 3000, 0); // $3
    client.push_completion("charlie", 2000, 0); // $2
    let engine = engine_with(client, linear_graph());

    let events = engine
        .execute("smoke-costs", json!({}))
        .await
        .unwrap()
        .collect_events()
        .await;

    let costs: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            StepEvent::NodeCompleted { cost, .. } => Some(*cost),
            _ => None,
        })
        .collect();
    assert_eq!(costs.len(), 3);
    assert!((costs[0] - 1.0).abs() < 1e-9);
    assert!((costs[1] - 3.0).abs() < 1e-9);
    assert!((costs[2] - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn fresh_session_is_visible_before_first_node_completes() {
    let client = MockModelClient::new();
    client.set_delay(Duration::from_millis(200));
    let engine = engine_with(Arc::clone(&client), linear_graph());

    let stream = engine
        .execute("early-1", json!({"topic": "visibility"}))
        .await
        .unwrap();

    // The first node is still in flight; the session must already be
    // durable and readable.
    let state = engine.get_status("early-1").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Running);
    assert_eq!(state.step, 0);
    assert!(state.node_outputs.is_empty());
    assert_eq!(state.inputs, json!({"topic": "visibility"}));
    assert_eq!(state.current_node.as_deref(), Some("a"));

    let events = stream.collect_events().await;
    assert!(matches!(
        events.last(),
        Some(StepEvent::Completed { .. })
    ));
}

fn solo_graph() -> WorkflowGraph {
    GraphBuilder::new()
        .add_node("solo", PromptNode::new("You are the node.", "Do the thing."))
        .set_entry("solo")
        .compile()
        .expect("valid graph")
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let client = MockModelClient::new();
    client.push_transient("503 slow down");
    client.push_transient("503 again");
    client.push_completion("done", 100, 100);
    let engine = engine_with(Arc::clone(&client), solo_graph());

    let state = engine.run_to_completion("retry-1", json!({})).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    // Default policy: 2 retries after the first attempt.
    assert_eq!(client.call_count(), 3);
    // Failed attempts bill nothing; the successful one does.
    assert_eq!(engine.ledger().entries_for("retry-1").len(), 1);
}

#[tokio::test]
async fn exhausted_retries_fail_with_transient_kind() {
    let client = MockModelClient::new();
    for _ in 0..3 {
        client.push_transient("503");
    }
    let engine = engine_with(Arc::clone(&client), solo_graph());

    let state = engine.run_to_completion("retry-2", json!({})).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    let error = state.error.expect("error recorded");
    assert_eq!(error.kind, ErrorKind::TransientExhausted);
    assert_eq!(error.node.as_deref(), Some("solo"));
    assert_eq!(client.call_count(), 3);
}

#[tokio::test]
async fn permanent_failure_skips_retries() {
    let client = MockModelClient::new();
    client.push_permanent("model does not exist");
    let engine = engine_with(Arc::clone(&client), solo_graph());

    let state = engine.run_to_completion("perm-1", json!({})).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.error.unwrap().kind, ErrorKind::Permanent);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn node_outputs_only_grow_across_polls() {
    let client = MockModelClient::new();
    let engine = engine_with(client, linear_graph());

    let mut stream = engine.execute("poll-1", json!({})).await.unwrap();
    let mut seen = 0usize;
    while let Some(event) = stream.next_event().await {
        if matches!(event, StepEvent::NodeCompleted { .. }) {
            let state = engine.get_status("poll-1").await.unwrap();
            assert!(state.node_outputs.len() >= seen);
            seen = state.node_outputs.len();
        }
    }
    assert_eq!(seen, 3);
}
