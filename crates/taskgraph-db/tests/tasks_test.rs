//! Integration tests for the task claim/complete/fail transitions.

use taskgraph_db::error::TaskRepoError;
use taskgraph_db::models::TaskStatus;
use taskgraph_db::queries::tasks::{self, FailureOutcome};
use taskgraph_test_utils::create_test_db;

async fn insert_simple(pool: &sqlx::SqlitePool, id: &str, remaining_deps: i64, max_attempts: i64, now: i64) {
    let mut tx = pool.begin().await.expect("begin");
    tasks::insert_task(&mut tx, id, "noop", 10, remaining_deps, max_attempts, now)
        .await
        .expect("insert task");
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn claim_runnable_only_takes_queued_with_no_deps() {
    let db = create_test_db().await;
    let now = 1_000;

    insert_simple(&db.pool, "a", 0, 3, now).await;
    insert_simple(&db.pool, "b", 1, 3, now).await;

    let claimed = tasks::claim_runnable(&db.pool, now, 60_000, 10).await.expect("claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, "a");
    assert_eq!(claimed[0].status, TaskStatus::Running);
    assert_eq!(claimed[0].attempts, 1);
    assert_eq!(claimed[0].lease_expires_at, Some(now + 60_000));
}

#[tokio::test]
async fn claim_runnable_respects_limit() {
    let db = create_test_db().await;
    let now = 1_000;

    for id in ["a", "b", "c"] {
        insert_simple(&db.pool, id, 0, 3, now).await;
    }

    let claimed = tasks::claim_runnable(&db.pool, now, 60_000, 2).await.expect("claim");
    assert_eq!(claimed.len(), 2);
}

#[tokio::test]
async fn mark_completed_decrements_dependent_remaining_deps() {
    let db = create_test_db().await;
    let now = 1_000;

    insert_simple(&db.pool, "a", 0, 3, now).await;
    insert_simple(&db.pool, "b", 1, 3, now).await;
    {
        let mut tx = db.pool.begin().await.expect("begin");
        tasks::insert_dependency(&mut tx, "b", "a").await.expect("insert dep");
        tx.commit().await.expect("commit");
    }

    tasks::claim_runnable(&db.pool, now, 60_000, 10).await.expect("claim a");
    tasks::mark_completed(&db.pool, "a", now + 5).await.expect("complete a");

    let b = tasks::get_task(&db.pool, "b").await.expect("get b").expect("b exists");
    assert_eq!(b.remaining_deps, 0);
    assert_eq!(b.status, TaskStatus::Queued);

    let claimed = tasks::claim_runnable(&db.pool, now + 10, 60_000, 10).await.expect("claim b");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, "b");
}

#[tokio::test]
async fn mark_completed_on_non_running_task_is_state_conflict() {
    let db = create_test_db().await;
    let now = 1_000;
    insert_simple(&db.pool, "a", 0, 3, now).await;

    let err = tasks::mark_completed(&db.pool, "a", now).await.expect_err("still queued");
    assert!(matches!(err, TaskRepoError::StateConflict { .. }));
}

#[tokio::test]
async fn mark_failed_or_retry_requeues_while_attempts_remain() {
    let db = create_test_db().await;
    let now = 1_000;
    insert_simple(&db.pool, "a", 0, 3, now).await;
    tasks::claim_runnable(&db.pool, now, 60_000, 10).await.expect("claim");

    let outcome = tasks::mark_failed_or_retry(&db.pool, "a", now + 1, "boom").await.expect("fail");
    assert_eq!(outcome, FailureOutcome::Requeued);

    let a = tasks::get_task(&db.pool, "a").await.expect("get a").expect("a exists");
    assert_eq!(a.status, TaskStatus::Queued);
    assert_eq!(a.attempts, 1);
    assert_eq!(a.last_error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn mark_failed_or_retry_blocks_dependents_once_exhausted() {
    let db = create_test_db().await;
    let now = 1_000;

    insert_simple(&db.pool, "a", 0, 1, now).await;
    insert_simple(&db.pool, "b", 1, 3, now).await;
    insert_simple(&db.pool, "c", 1, 3, now).await;
    {
        let mut tx = db.pool.begin().await.expect("begin");
        tasks::insert_dependency(&mut tx, "b", "a").await.expect("b dep a");
        tasks::insert_dependency(&mut tx, "c", "b").await.expect("c dep b");
        tx.commit().await.expect("commit");
    }

    tasks::claim_runnable(&db.pool, now, 60_000, 10).await.expect("claim a");
    let outcome = tasks::mark_failed_or_retry(&db.pool, "a", now + 1, "fatal").await.expect("fail a");
    assert_eq!(outcome, FailureOutcome::Failed);

    let a = tasks::get_task(&db.pool, "a").await.expect("get a").expect("a exists");
    assert_eq!(a.status, TaskStatus::Failed);

    let b = tasks::get_task(&db.pool, "b").await.expect("get b").expect("b exists");
    assert_eq!(b.status, TaskStatus::Blocked);

    let c = tasks::get_task(&db.pool, "c").await.expect("get c").expect("c exists");
    assert_eq!(c.status, TaskStatus::Blocked);
}

#[tokio::test]
async fn sweep_expired_leases_requeues_stale_running_tasks() {
    let db = create_test_db().await;
    let now = 1_000;
    insert_simple(&db.pool, "a", 0, 3, now).await;
    tasks::claim_runnable(&db.pool, now, 100, 10).await.expect("claim");

    let processed = tasks::sweep_expired_leases(&db.pool, now + 500).await.expect("sweep");
    assert_eq!(processed, vec![("a".to_owned(), FailureOutcome::Requeued)]);

    let a = tasks::get_task(&db.pool, "a").await.expect("get a").expect("a exists");
    assert_eq!(a.status, TaskStatus::Queued);
    assert_eq!(a.lease_expires_at, None);
}

#[tokio::test]
async fn sweep_expired_leases_ignores_live_leases() {
    let db = create_test_db().await;
    let now = 1_000;
    insert_simple(&db.pool, "a", 0, 3, now).await;
    tasks::claim_runnable(&db.pool, now, 60_000, 10).await.expect("claim");

    let processed = tasks::sweep_expired_leases(&db.pool, now + 500).await.expect("sweep");
    assert!(processed.is_empty());
}

#[tokio::test]
async fn list_tasks_filters_by_status() {
    let db = create_test_db().await;
    let now = 1_000;
    insert_simple(&db.pool, "a", 0, 3, now).await;
    insert_simple(&db.pool, "b", 0, 3, now).await;
    tasks::claim_runnable(&db.pool, now, 60_000, 1).await.expect("claim one");

    let queued = tasks::list_tasks(&db.pool, Some(TaskStatus::Queued)).await.expect("list queued");
    let running = tasks::list_tasks(&db.pool, Some(TaskStatus::Running)).await.expect("list running");
    assert_eq!(queued.len(), 1);
    assert_eq!(running.len(), 1);
}
