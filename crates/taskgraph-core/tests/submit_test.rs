//! Integration tests for [`taskgraph_core::submit`] against a real
//! (temporary) store: duplicate/unknown-dependency rejection and batch
//! insertion semantics.

use taskgraph_core::submit::{self, NewTask, SubmitOutcome};
use taskgraph_core::KernelError;
use taskgraph_db::models::TaskStatus;
use taskgraph_db::queries::tasks;

fn spec(id: &str, deps: &[&str]) -> NewTask {
    NewTask {
        id: id.to_owned(),
        task_type: "noop".to_owned(),
        duration_ms: 10,
        max_attempts: 3,
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn submit_one_rejects_duplicate_id() {
    let db = taskgraph_test_utils::create_test_db().await;
    submit::submit_one(&db.pool, 1_000, spec("a", &[])).await.unwrap();

    let err = submit::submit_one(&db.pool, 1_001, spec("a", &[])).await.unwrap_err();
    assert!(matches!(err, KernelError::DuplicateId(id) if id == "a"));

    let a = tasks::get_task(&db.pool, "a").await.unwrap().unwrap();
    assert_eq!(a.created_at, 1_000, "the first insert must be left unchanged");
}

#[tokio::test]
async fn submit_one_rejects_unknown_dependency() {
    let db = taskgraph_test_utils::create_test_db().await;

    let err = submit::submit_one(&db.pool, 1_000, spec("a", &["ghost"])).await.unwrap_err();
    assert!(matches!(err, KernelError::UnknownDependency(task, dep) if task == "a" && dep == "ghost"));

    assert!(tasks::get_task(&db.pool, "a").await.unwrap().is_none());
}

#[tokio::test]
async fn submit_one_computes_remaining_deps_against_existing_tasks() {
    let db = taskgraph_test_utils::create_test_db().await;
    submit::submit_one(&db.pool, 1_000, spec("a", &[])).await.unwrap();
    tasks::claim_runnable(&db.pool, 1_001, 60_000, 10).await.unwrap();
    tasks::mark_completed(&db.pool, "a", 1_002).await.unwrap();

    let b = submit::submit_one(&db.pool, 1_003, spec("b", &["a"])).await.unwrap();
    assert_eq!(b.remaining_deps, 0, "dependency is already COMPLETED");
    assert_eq!(b.status, TaskStatus::Queued);
}

#[tokio::test]
async fn submit_batch_rejects_cycle_and_inserts_nothing() {
    let db = taskgraph_test_utils::create_test_db().await;

    let batch = vec![spec("a", &["b"]), spec("b", &["a"])];
    let err = submit::submit_batch(&db.pool, 1_000, batch).await.unwrap_err();
    assert!(matches!(err, KernelError::CycleInBatch(_)));

    let all = tasks::list_tasks(&db.pool, None).await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn submit_batch_rejects_duplicate_within_batch() {
    let db = taskgraph_test_utils::create_test_db().await;

    let batch = vec![spec("a", &[]), spec("a", &[])];
    let err = submit::submit_batch(&db.pool, 1_000, batch).await.unwrap_err();
    assert!(matches!(err, KernelError::DuplicateId(id) if id == "a"));
}

#[tokio::test]
async fn submit_batch_inserts_linear_chain_with_correct_remaining_deps() {
    let db = taskgraph_test_utils::create_test_db().await;

    let batch = vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])];
    let created = submit::submit_batch(&db.pool, 1_000, batch).await.unwrap();
    assert_eq!(created.len(), 3);

    let a = tasks::get_task(&db.pool, "a").await.unwrap().unwrap();
    let b = tasks::get_task(&db.pool, "b").await.unwrap().unwrap();
    let c = tasks::get_task(&db.pool, "c").await.unwrap().unwrap();

    assert_eq!(a.remaining_deps, 0);
    assert_eq!(b.remaining_deps, 1);
    assert_eq!(c.remaining_deps, 1);

    assert_eq!(tasks::get_dependencies(&db.pool, "b").await.unwrap(), vec!["a".to_string()]);
}

#[tokio::test]
async fn submit_batch_rejects_unknown_external_dependency() {
    let db = taskgraph_test_utils::create_test_db().await;

    let batch = vec![spec("a", &["ghost"])];
    let err = submit::submit_batch(&db.pool, 1_000, batch).await.unwrap_err();
    assert!(matches!(err, KernelError::UnknownDependency(task, dep) if task == "a" && dep == "ghost"));

    assert!(tasks::list_tasks(&db.pool, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn submit_json_recognizes_single_and_batch_shapes() {
    let db = taskgraph_test_utils::create_test_db().await;

    let single = serde_json::json!({"id": "a", "type": "noop", "duration_ms": 10});
    let outcome = submit::submit_json(&db.pool, 1_000, single, 3).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Single(task) if task.id == "a"));

    let batch = serde_json::json!({"tasks": [
        {"id": "b", "type": "noop", "duration_ms": 10},
        {"id": "c", "type": "noop", "duration_ms": 10, "dependencies": ["b"]},
    ]});
    let outcome = submit::submit_json(&db.pool, 1_001, batch, 3).await.unwrap();
    let SubmitOutcome::Batch(created) = outcome else { panic!("expected a batch outcome") };
    assert_eq!(created.len(), 2);
}

#[tokio::test]
async fn submit_json_rejects_invalid_spec_before_touching_the_store() {
    let db = taskgraph_test_utils::create_test_db().await;

    let bad = serde_json::json!({"id": "", "type": "noop", "duration_ms": 10});
    let err = submit::submit_json(&db.pool, 1_000, bad, 3).await.unwrap_err();
    assert!(matches!(err, KernelError::Validation(_)));

    let bad = serde_json::json!({"id": "a", "type": "noop", "duration_ms": 0});
    let err = submit::submit_json(&db.pool, 1_000, bad, 3).await.unwrap_err();
    assert!(matches!(err, KernelError::Validation(_)));

    assert!(tasks::list_tasks(&db.pool, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn submit_json_defaults_max_attempts_when_absent() {
    let db = taskgraph_test_utils::create_test_db().await;

    let single = serde_json::json!({"id": "a", "type": "noop", "duration_ms": 10});
    submit::submit_json(&db.pool, 1_000, single, 7).await.unwrap();

    let a = tasks::get_task(&db.pool, "a").await.unwrap().unwrap();
    assert_eq!(a.max_attempts, 7);
}
