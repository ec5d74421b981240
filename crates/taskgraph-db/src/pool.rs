use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, SqlitePool};
use tracing::info;

use crate::config::DbConfig;

/// Numbered migrations, embedded in the binary at compile time so an
/// installed binary needs no source tree on disk.
const MIGRATIONS: &[(i64, &str, &str)] =
    &[(1, "0001_init.sql", include_str!("../migrations/0001_init.sql"))];

/// Create a connection pool with sensible defaults.
///
/// Every connection gets `PRAGMA foreign_keys = ON` and
/// `PRAGMA journal_mode = WAL` so readers never block behind the writer
/// lock that the claim/complete/sweep transactions hold.
pub async fn create_pool(config: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = config.path().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(config.path())
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", config.path().display()))?;

    Ok(pool)
}

/// Run all pending migrations against the pool.
///
/// Tracks applied migrations in a `schema_migrations` table (version,
/// filename, applied_at) distinct from any driver-internal bookkeeping, so
/// the table is queryable by operators and by tests.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
            version INTEGER PRIMARY KEY, \
            filename TEXT NOT NULL, \
            applied_at INTEGER NOT NULL\
        )",
    )
    .await
    .context("failed to create schema_migrations table")?;

    for (version, filename, sql) in MIGRATIONS {
        let already_applied: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = ?")
                .bind(version)
                .fetch_optional(pool)
                .await
                .context("failed to check schema_migrations")?;

        if already_applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await.context("failed to begin migration transaction")?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to apply migration {filename}"))?;

        let applied_at = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO schema_migrations (version, filename, applied_at) VALUES (?, ?, ?)",
        )
        .bind(version)
        .bind(filename)
        .bind(applied_at)
        .execute(&mut *tx)
        .await
        .context("failed to record applied migration")?;

        tx.commit().await.context("failed to commit migration")?;
        info!(version, filename, "applied migration");
    }

    Ok(())
}

/// Return the row count for every user-defined table in the database.
///
/// Useful for a `taskgraph db-init`-style success message.
pub async fn table_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != 'schema_migrations' \
         ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .context("failed to list tables")?;

    let mut counts = Vec::with_capacity(tables.len());
    for (table_name,) in &tables {
        // Table names come from sqlite_master so they are safe identifiers.
        let query = format!("SELECT COUNT(*) FROM {table_name}");
        let count: (i64,) = sqlx::query_as(&query)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table_name}"))?;
        counts.push((table_name.clone(), count.0));
    }
    Ok(counts)
}

// ---------------------------------------------------------------------------
// BEGIN IMMEDIATE helper
// ---------------------------------------------------------------------------

/// Open a write transaction with `BEGIN IMMEDIATE` instead of the plain
/// `BEGIN` that [`SqlitePool::begin`] issues.
///
/// A plain `BEGIN` acquires SQLite's write lock lazily, on the first write
/// statement -- which lets two transactions both start, both read, and then
/// race for the lock. `BEGIN IMMEDIATE` acquires the write lock up front, so
/// the second transaction to start blocks (or, past `busy_timeout`, fails)
/// before either has done any work. The claim, completion, and
/// recovery-sweep operations all need this because their correctness
/// depends on serializing against each other, not just against plain
/// concurrent writes. Dropping the returned transaction without committing
/// rolls it back, same as a normal `sqlx` transaction.
pub async fn begin_immediate(pool: &SqlitePool) -> Result<sqlx::Transaction<'static, sqlx::Sqlite>> {
    pool.begin_with("BEGIN IMMEDIATE")
        .await
        .context("failed to begin immediate transaction")
}
