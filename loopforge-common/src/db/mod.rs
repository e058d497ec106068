//! Database layer
//!
//! SQLite-backed persistence for sessions, jobs, assets, slice banks and
//! trigger sequences. WAL mode for concurrent reads during writes; a 30 s
//! busy timeout covers writer contention between the API edge and workers.

pub mod assets;
pub mod jobs;
pub mod models;
pub mod sessions;
pub mod slice_banks;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::Result;

/// Initialize database connection pool and create tables if needed.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(30))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    create_schema(&pool).await?;

    tracing::info!(path = %db_path.display(), "Database initialized");
    Ok(pool)
}

/// In-memory pool for tests.
///
/// A single connection: every `:memory:` connection is its own database, so
/// the pool must never open a second one.
pub async fn init_test_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            source_filename TEXT NOT NULL,
            duration_seconds REAL,
            bpm REAL,
            key TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            input_path TEXT,
            config TEXT NOT NULL DEFAULT '{}',
            output_paths TEXT NOT NULL DEFAULT '{}',
            progress REAL NOT NULL DEFAULT 0,
            stage TEXT NOT NULL DEFAULT '',
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            error_message TEXT,
            error_traceback TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_session ON jobs(session_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assets (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            asset_type TEXT NOT NULL,
            stem_role TEXT,
            detected_key TEXT,
            detected_bpm REAL,
            key_confidence REAL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS slice_banks (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            source_path TEXT NOT NULL,
            source_filename TEXT NOT NULL,
            stem_role TEXT NOT NULL,
            sample_rate INTEGER NOT NULL,
            total_samples INTEGER NOT NULL,
            total_duration REAL NOT NULL,
            bpm REAL,
            key TEXT,
            mean_energy REAL NOT NULL DEFAULT 0,
            max_energy REAL NOT NULL DEFAULT 0,
            energy_variance REAL NOT NULL DEFAULT 0,
            slice_data TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // slice_bank_id is a weak reference: a sequence survives deletion of the
    // bank it was generated from, it just can't be rendered anymore.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trigger_sequences (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            slice_bank_id TEXT NOT NULL,
            events TEXT NOT NULL,
            params TEXT NOT NULL,
            seed INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
