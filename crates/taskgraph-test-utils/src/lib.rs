//! Shared test utilities for taskgraph integration tests.
//!
//! The store is an embedded SQLite file, so unlike a shared server-backed
//! database, each test simply gets its own file in a fresh temp directory --
//! no container, no shared instance to coordinate teardown against.

use sqlx::SqlitePool;
use taskgraph_db::config::DbConfig;
use taskgraph_db::pool;

/// A temporary, migrated database for a single test.
///
/// The backing [`tempfile::TempDir`] is held alive for the lifetime of this
/// struct and removed on drop.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: tempfile::TempDir,
}

/// Create a fresh temporary database with all migrations applied.
pub async fn create_test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("failed to create temp dir for test database");
    let db_path = dir.path().join("test.db");
    let config = DbConfig::new(db_path);

    let pool = pool::create_pool(&config)
        .await
        .expect("failed to open temp database");
    pool::run_migrations(&pool)
        .await
        .expect("migrations should succeed");

    TestDb { pool, _dir: dir }
}
