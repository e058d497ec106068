//! Job persistence and state transitions
//!
//! Every status transition is guarded in SQL so concurrent writers can never
//! resurrect a terminal job: the atomic claim is the only PENDING → RUNNING
//! path, and completion/failure writes carry `WHERE status = 'RUNNING'`.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::{Job, JobStatus, JobType};
use crate::{Error, Result};

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp in jobs row: {e}")))
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");
    let job_type: String = row.get("job_type");
    let status: String = row.get("status");
    let config: String = row.get("config");
    let output_paths: String = row.get("output_paths");
    let created_at: String = row.get("created_at");
    let started_at: Option<String> = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(e.to_string()))?,
        session_id: Uuid::parse_str(&session_id).map_err(|e| Error::Internal(e.to_string()))?,
        job_type: JobType::from_str(&job_type)?,
        status: JobStatus::from_str(&status)?,
        input_path: row.get("input_path"),
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        output_paths: serde_json::from_str(&output_paths).unwrap_or_default(),
        progress: row.get("progress"),
        stage: row.get("stage"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        error_message: row.get("error_message"),
        error_traceback: row.get("error_traceback"),
        created_at: parse_timestamp(&created_at)?,
        started_at: started_at.as_deref().map(parse_timestamp).transpose()?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

/// Insert a new job row.
pub async fn insert(pool: &SqlitePool, job: &Job) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, session_id, job_type, status, input_path, config, output_paths,
            progress, stage, retry_count, max_retries, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.session_id.to_string())
    .bind(job.job_type.to_string())
    .bind(job.status.to_string())
    .bind(&job.input_path)
    .bind(serde_json::to_string(&job.config).unwrap_or_else(|_| "{}".to_string()))
    .bind(serde_json::to_string(&job.output_paths).unwrap_or_else(|_| "{}".to_string()))
    .bind(job.progress)
    .bind(&job.stage)
    .bind(job.retry_count)
    .bind(job.max_retries)
    .bind(job.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a job by id.
pub async fn get(pool: &SqlitePool, job_id: Uuid) -> Result<Job> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => job_from_row(&row),
        None => Err(Error::NotFound(format!("job {job_id}"))),
    }
}

/// Current status of a job (cheap read for cancellation checks).
pub async fn status(pool: &SqlitePool, job_id: Uuid) -> Result<JobStatus> {
    let raw: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    match raw {
        Some(raw) => JobStatus::from_str(&raw),
        None => Err(Error::NotFound(format!("job {job_id}"))),
    }
}

/// List jobs, optionally filtered by session and status, newest first.
pub async fn list(
    pool: &SqlitePool,
    session_id: Option<Uuid>,
    status: Option<JobStatus>,
    limit: i64,
) -> Result<Vec<Job>> {
    // Two optional filters; keep the SQL static and let NULL disable a filter.
    let rows = sqlx::query(
        r#"
        SELECT * FROM jobs
        WHERE (?1 IS NULL OR session_id = ?1)
          AND (?2 IS NULL OR status = ?2)
        ORDER BY created_at DESC
        LIMIT ?3
        "#,
    )
    .bind(session_id.map(|s| s.to_string()))
    .bind(status.map(|s| s.to_string()))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Atomically claim up to `limit` pending jobs, oldest first.
///
/// The single UPDATE ... RETURNING statement is the sole mechanism preventing
/// double-dispatch; no in-memory reservation is authoritative.
pub async fn claim_pending(pool: &SqlitePool, limit: i64) -> Result<Vec<Job>> {
    let rows = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'RUNNING', started_at = ?
        WHERE id IN (
            SELECT id FROM jobs
            WHERE status = 'PENDING'
            ORDER BY created_at
            LIMIT ?
        )
        RETURNING *
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Write a progress update, unless the job has left the RUNNING state.
///
/// Returns false when nothing was written (job cancelled or already terminal),
/// which the caller treats as a cancellation signal.
pub async fn update_progress(
    pool: &SqlitePool,
    job_id: Uuid,
    progress: f64,
    stage: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE jobs SET progress = ?, stage = ? WHERE id = ? AND status = 'RUNNING'",
    )
    .bind(progress)
    .bind(stage)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a running job completed with its output paths.
///
/// A job that is no longer RUNNING (cancelled mid-run, failed by timeout) is
/// left untouched; returns whether the transition happened.
pub async fn mark_completed(
    pool: &SqlitePool,
    job_id: Uuid,
    output_paths: &HashMap<String, String>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'COMPLETED', progress = 100, output_paths = ?, completed_at = ?
        WHERE id = ? AND status = 'RUNNING'
        "#,
    )
    .bind(serde_json::to_string(output_paths).unwrap_or_else(|_| "{}".to_string()))
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a running job failed with a typed reason. Same stickiness rules as
/// [`mark_completed`].
pub async fn mark_failed(
    pool: &SqlitePool,
    job_id: Uuid,
    error_message: &str,
    error_traceback: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'FAILED', error_message = ?, error_traceback = ?, completed_at = ?
        WHERE id = ? AND status = 'RUNNING'
        "#,
    )
    .bind(error_message)
    .bind(error_traceback)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Cancel a pending or running job.
///
/// Cancelling does not interrupt an in-flight worker; the worker observes the
/// CANCELLED status on its next progress tick.
pub async fn cancel(pool: &SqlitePool, job_id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'CANCELLED', completed_at = ? WHERE id = ? AND status IN ('PENDING', 'RUNNING')",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    // Distinguish missing job from an illegal transition.
    let current = status(pool, job_id).await?;
    Err(Error::Conflict(format!(
        "cannot cancel job with status {current}"
    )))
}

/// Retry a failed job: back to PENDING with cleared errors.
///
/// Returns the new retry count.
pub async fn retry(pool: &SqlitePool, job_id: Uuid) -> Result<i64> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'PENDING', error_message = NULL, error_traceback = NULL,
            retry_count = retry_count + 1, progress = 0, stage = '', completed_at = NULL
        WHERE id = ? AND status = 'FAILED'
        "#,
    )
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current = status(pool, job_id).await?;
        return Err(Error::Conflict(format!(
            "cannot retry job with status {current}"
        )));
    }

    let retry_count: i64 = sqlx::query_scalar("SELECT retry_count FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(retry_count)
}

/// Crash recovery: requeue jobs that were RUNNING when the process died.
///
/// Jobs with retries left go back to PENDING with the retry count bumped;
/// exhausted jobs are failed. Returns (recovered, failed) counts.
pub async fn recover_interrupted(pool: &SqlitePool) -> Result<(usize, usize)> {
    let recovered = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'PENDING', retry_count = retry_count + 1, started_at = NULL
        WHERE status = 'RUNNING' AND retry_count < max_retries
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected() as usize;

    let failed = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'FAILED',
            error_message = 'Max retries exceeded after server restart',
            completed_at = ?
        WHERE status = 'RUNNING'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?
    .rows_affected() as usize;

    if recovered > 0 || failed > 0 {
        tracing::info!(recovered, failed, "Recovered interrupted jobs");
    }
    Ok((recovered, failed))
}
