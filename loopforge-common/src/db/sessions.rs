//! Session persistence

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::Session;
use crate::{Error, Result};

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    Ok(Session {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(e.to_string()))?,
        source_filename: row.get("source_filename"),
        duration_seconds: row.get("duration_seconds"),
        bpm: row.get("bpm"),
        key: row.get("key"),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(e.to_string()))?
            .with_timezone(&Utc),
    })
}

pub async fn insert(pool: &SqlitePool, session: &Session) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, source_filename, duration_seconds, bpm, key, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.id.to_string())
    .bind(&session.source_filename)
    .bind(session.duration_seconds)
    .bind(session.bpm)
    .bind(&session.key)
    .bind(session.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get(pool: &SqlitePool, session_id: Uuid) -> Result<Session> {
    let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => session_from_row(&row),
        None => Err(Error::NotFound(format!("session {session_id}"))),
    }
}

/// Write analysis results (duration/bpm/key) onto a session.
pub async fn update_analysis(
    pool: &SqlitePool,
    session_id: Uuid,
    duration_seconds: Option<f64>,
    bpm: Option<f64>,
    key: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE sessions SET duration_seconds = ?, bpm = ?, key = ? WHERE id = ?",
    )
    .bind(duration_seconds)
    .bind(bpm)
    .bind(key)
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("session {session_id}")));
    }
    Ok(())
}

/// Delete a session. Jobs, assets and slice banks cascade via foreign keys;
/// files are the storage layer's responsibility.
pub async fn delete(pool: &SqlitePool, session_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(session_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}
