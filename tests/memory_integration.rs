mod common;

use std::sync::Arc;

use serde_json::json;

use common::{MockModelClient, mock_ledger, uniform_router, unlimited_budget};
use taskloom::memory::MemoryService;
use taskloom::models::ModelClient;
use taskloom::runtimes::WorkflowEngine;
use taskloom::state::{WorkflowKind, WorkflowStatus};

fn research_engine(
    client: Arc<MockModelClient>,
    memory: Arc<MemoryService>,
) -> Arc<WorkflowEngine> {
    WorkflowEngine::builder(WorkflowKind::Research, client as Arc<dyn ModelClient>)
        .with_router(uniform_router())
        .with_ledger(mock_ledger(unlimited_budget()))
        .with_memory(memory)
        .build()
        .expect("engine builds")
}

#[tokio::test]
async fn memory_worthy_output_is_stored_and_searchable() {
    let client = MockModelClient::new();
    client.push_completion("facts about columnar storage", 100, 100);
    client.push_completion("columnar formats win for analytics scans", 100, 100);
    client.push_completion("Report: use a columnar format for the analytics path", 100, 100);
    let memory = Arc::new(MemoryService::in_memory());
    let engine = research_engine(client, Arc::clone(&memory));

    engine
        .execute_scoped(
            "mem-1",
            json!({"topic": "storage formats"}),
            Some("proj-analytics".to_string()),
            None,
        )
        .await
        .unwrap()
        .collect_events()
        .await;

    let state = engine.get_status("mem-1").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);

    // Only the report node is memory-worthy in the research graph.
    assert_eq!(memory.record_count(), 1);
    let hits = memory
        .search("columnar analytics report", "proj-analytics", 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].record.content.contains("columnar format"));
    assert_eq!(
        hits[0].record.metadata.session_id.as_deref(),
        Some("mem-1")
    );
    assert_eq!(
        hits[0].record.metadata.project_id.as_deref(),
        Some("proj-analytics")
    );
}

#[tokio::test]
async fn session_history_accumulates_per_node() {
    let client = MockModelClient::new();
    let memory = Arc::new(MemoryService::in_memory());
    let engine = research_engine(client, Arc::clone(&memory));

    engine.run_to_completion("mem-2", json!({})).await.unwrap();

    let bundle = memory.load_context(None, "mem-2", None).await.unwrap();
    assert_eq!(bundle.history.len(), 3);
    let nodes: Vec<&str> = bundle.history.iter().map(|h| h.node.as_str()).collect();
    assert_eq!(nodes, vec!["gather", "analyze", "report"]);
}

#[tokio::test]
async fn project_summary_and_task_data_reach_the_context() {
    let memory = Arc::new(MemoryService::in_memory());
    memory.set_project_summary("p1", "A data pipeline rewrite");
    memory.set_task_data("t1", json!({"title": "pick a storage format"}));
    memory.push_history("mem-3", "gather", "looked at parquet and orc");

    let bundle = memory
        .load_context(Some("p1"), "mem-3", Some("t1"))
        .await
        .unwrap();
    assert_eq!(bundle.task, Some(json!({"title": "pick a storage format"})));
    assert_eq!(bundle.project_summary.as_deref(), Some("A data pipeline rewrite"));
    assert_eq!(bundle.history.len(), 1);
}
