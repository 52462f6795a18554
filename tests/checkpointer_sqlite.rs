#![cfg(feature = "sqlite")]

use std::time::Duration;

use serde_json::json;

use taskloom::runtimes::{
    Checkpoint, Checkpointer, DEFAULT_CHECKPOINT_TTL, SqliteCheckpointer,
};
use taskloom::state::{WorkflowKind, WorkflowState, WorkflowStatus};

async fn connect_temp() -> (SqliteCheckpointer, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("checkpoints.db").display()
    );
    let store = SqliteCheckpointer::connect(&url).await.expect("connect");
    (store, dir)
}

fn state_at_step(session_id: &str, step: u64) -> WorkflowState {
    let mut state = WorkflowState::builder(session_id, WorkflowKind::Research)
        .with_inputs(json!({"topic": "durability"}))
        .with_entry("gather")
        .build();
    state.step = step;
    state
}

#[tokio::test]
async fn round_trip_is_identity() {
    let (store, _dir) = connect_temp().await;
    let mut state = state_at_step("sql-1", 2);
    state.transition(WorkflowStatus::Running).unwrap();
    state.record_output("gather", json!({"content": "notes"}));

    store
        .save(Checkpoint::from_state(&state, DEFAULT_CHECKPOINT_TTL))
        .await
        .unwrap();

    let loaded = store.load_latest("sql-1").await.unwrap().expect("present");
    assert_eq!(loaded.state, state);
    assert_eq!(loaded.step, 2);
}

#[tokio::test]
async fn lower_step_never_overwrites() {
    let (store, _dir) = connect_temp().await;
    store
        .save(Checkpoint::from_state(
            &state_at_step("sql-2", 5),
            DEFAULT_CHECKPOINT_TTL,
        ))
        .await
        .unwrap();
    store
        .save(Checkpoint::from_state(
            &state_at_step("sql-2", 3),
            DEFAULT_CHECKPOINT_TTL,
        ))
        .await
        .unwrap();

    let loaded = store.load_latest("sql-2").await.unwrap().expect("present");
    assert_eq!(loaded.step, 5);
}

#[tokio::test]
async fn expired_rows_are_hidden_and_swept() {
    let (store, _dir) = connect_temp().await;
    store
        .save(Checkpoint::from_state(
            &state_at_step("sql-3", 1),
            Duration::from_secs(0),
        ))
        .await
        .unwrap();
    store
        .save(Checkpoint::from_state(
            &state_at_step("sql-4", 1),
            DEFAULT_CHECKPOINT_TTL,
        ))
        .await
        .unwrap();

    assert!(store.load_latest("sql-3").await.unwrap().is_none());
    assert_eq!(store.list_sessions().await.unwrap(), vec!["sql-4"]);
    assert_eq!(store.sweep_expired().await.unwrap(), 1);
    assert_eq!(store.list_sessions().await.unwrap(), vec!["sql-4"]);
}

#[tokio::test]
async fn missing_session_reads_as_none() {
    let (store, _dir) = connect_temp().await;
    assert!(store.load_latest("ghost").await.unwrap().is_none());
    assert!(store.list_sessions().await.unwrap().is_empty());
}
