//! Slice bank and trigger sequence persistence
//!
//! `slice_data` and `events` are JSON text columns; reloading a bank must be
//! field-wise equal to what was stored (the round-trip law is tested at the
//! slice-engine level where the typed slices live).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::{SliceBankRecord, StemRole, TriggerSequenceRecord};
use crate::{Error, Result};

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(e.to_string()))
}

fn bank_from_row(row: &SqliteRow) -> Result<SliceBankRecord> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");
    let stem_role: String = row.get("stem_role");
    let slice_data: String = row.get("slice_data");
    let created_at: String = row.get("created_at");

    Ok(SliceBankRecord {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(e.to_string()))?,
        session_id: Uuid::parse_str(&session_id).map_err(|e| Error::Internal(e.to_string()))?,
        source_path: row.get("source_path"),
        source_filename: row.get("source_filename"),
        stem_role: StemRole::from_str(&stem_role)?,
        sample_rate: row.get::<i64, _>("sample_rate") as u32,
        total_samples: row.get("total_samples"),
        total_duration: row.get("total_duration"),
        bpm: row.get("bpm"),
        key: row.get("key"),
        mean_energy: row.get("mean_energy"),
        max_energy: row.get("max_energy"),
        energy_variance: row.get("energy_variance"),
        slice_data: serde_json::from_str(&slice_data)
            .map_err(|e| Error::Internal(format!("bad slice_data: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub async fn insert_bank(pool: &SqlitePool, bank: &SliceBankRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO slice_banks (
            id, session_id, source_path, source_filename, stem_role,
            sample_rate, total_samples, total_duration, bpm, key,
            mean_energy, max_energy, energy_variance, slice_data, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(bank.id.to_string())
    .bind(bank.session_id.to_string())
    .bind(&bank.source_path)
    .bind(&bank.source_filename)
    .bind(bank.stem_role.to_string())
    .bind(bank.sample_rate as i64)
    .bind(bank.total_samples)
    .bind(bank.total_duration)
    .bind(bank.bpm)
    .bind(&bank.key)
    .bind(bank.mean_energy)
    .bind(bank.max_energy)
    .bind(bank.energy_variance)
    .bind(
        serde_json::to_string(&bank.slice_data)
            .map_err(|e| Error::Internal(e.to_string()))?,
    )
    .bind(bank.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_bank(pool: &SqlitePool, bank_id: Uuid) -> Result<SliceBankRecord> {
    let row = sqlx::query("SELECT * FROM slice_banks WHERE id = ?")
        .bind(bank_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => bank_from_row(&row),
        None => Err(Error::NotFound(format!("slice bank {bank_id}"))),
    }
}

pub async fn list_banks(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<SliceBankRecord>> {
    let rows = sqlx::query("SELECT * FROM slice_banks WHERE session_id = ? ORDER BY created_at")
        .bind(session_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(bank_from_row).collect()
}

pub async fn delete_bank(pool: &SqlitePool, bank_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM slice_banks WHERE id = ?")
        .bind(bank_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn sequence_from_row(row: &SqliteRow) -> Result<TriggerSequenceRecord> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");
    let slice_bank_id: String = row.get("slice_bank_id");
    let events: String = row.get("events");
    let params: String = row.get("params");
    let created_at: String = row.get("created_at");

    Ok(TriggerSequenceRecord {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(e.to_string()))?,
        session_id: Uuid::parse_str(&session_id).map_err(|e| Error::Internal(e.to_string()))?,
        slice_bank_id: Uuid::parse_str(&slice_bank_id)
            .map_err(|e| Error::Internal(e.to_string()))?,
        events: serde_json::from_str(&events).map_err(|e| Error::Internal(e.to_string()))?,
        params: serde_json::from_str(&params).map_err(|e| Error::Internal(e.to_string()))?,
        seed: row.get("seed"),
        created_at: parse_timestamp(&created_at)?,
    })
}

pub async fn insert_sequence(pool: &SqlitePool, sequence: &TriggerSequenceRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO trigger_sequences (id, session_id, slice_bank_id, events, params, seed, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(sequence.id.to_string())
    .bind(sequence.session_id.to_string())
    .bind(sequence.slice_bank_id.to_string())
    .bind(serde_json::to_string(&sequence.events).map_err(|e| Error::Internal(e.to_string()))?)
    .bind(serde_json::to_string(&sequence.params).map_err(|e| Error::Internal(e.to_string()))?)
    .bind(sequence.seed)
    .bind(sequence.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_sequence(pool: &SqlitePool, sequence_id: Uuid) -> Result<TriggerSequenceRecord> {
    let row = sqlx::query("SELECT * FROM trigger_sequences WHERE id = ?")
        .bind(sequence_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => sequence_from_row(&row),
        None => Err(Error::NotFound(format!("trigger sequence {sequence_id}"))),
    }
}
