//! Asset persistence (stems, slice exports, bounces)

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::{Asset, StemRole};
use crate::{Error, Result};

fn asset_from_row(row: &SqliteRow) -> Result<Asset> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");
    let stem_role: Option<String> = row.get("stem_role");
    let created_at: String = row.get("created_at");

    Ok(Asset {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(e.to_string()))?,
        session_id: Uuid::parse_str(&session_id).map_err(|e| Error::Internal(e.to_string()))?,
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        asset_type: row.get("asset_type"),
        stem_role: stem_role.as_deref().map(StemRole::from_str).transpose()?,
        detected_key: row.get("detected_key"),
        detected_bpm: row.get("detected_bpm"),
        key_confidence: row.get("key_confidence"),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(e.to_string()))?
            .with_timezone(&Utc),
    })
}

pub async fn insert(pool: &SqlitePool, asset: &Asset) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assets (
            id, session_id, filename, file_path, asset_type, stem_role,
            detected_key, detected_bpm, key_confidence, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(asset.id.to_string())
    .bind(asset.session_id.to_string())
    .bind(&asset.filename)
    .bind(&asset.file_path)
    .bind(&asset.asset_type)
    .bind(asset.stem_role.map(|r| r.to_string()))
    .bind(&asset.detected_key)
    .bind(asset.detected_bpm)
    .bind(asset.key_confidence)
    .bind(asset.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get(pool: &SqlitePool, asset_id: Uuid) -> Result<Asset> {
    let row = sqlx::query("SELECT * FROM assets WHERE id = ?")
        .bind(asset_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => asset_from_row(&row),
        None => Err(Error::NotFound(format!("asset {asset_id}"))),
    }
}

/// All assets of one type for a session (e.g. every stem).
pub async fn list_by_type(
    pool: &SqlitePool,
    session_id: Uuid,
    asset_type: &str,
) -> Result<Vec<Asset>> {
    let rows = sqlx::query(
        "SELECT * FROM assets WHERE session_id = ? AND asset_type = ? ORDER BY created_at",
    )
    .bind(session_id.to_string())
    .bind(asset_type)
    .fetch_all(pool)
    .await?;

    rows.iter().map(asset_from_row).collect()
}

/// Write per-stem analysis results (key/bpm/confidence) onto an asset.
pub async fn update_analysis(
    pool: &SqlitePool,
    asset_id: Uuid,
    detected_key: Option<&str>,
    detected_bpm: Option<f64>,
    key_confidence: Option<f64>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE assets SET detected_key = ?, detected_bpm = ?, key_confidence = ? WHERE id = ?",
    )
    .bind(detected_key)
    .bind(detected_bpm)
    .bind(key_confidence)
    .bind(asset_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("asset {asset_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Session;
    use crate::db::{init_test_database, sessions};

    #[tokio::test]
    async fn test_asset_round_trip_and_listing() {
        let pool = init_test_database().await.unwrap();
        let session = Session::new("song.wav");
        sessions::insert(&pool, &session).await.unwrap();

        let asset = Asset::stem(session.id, "drums.wav", "/s/drums.wav", StemRole::Drums);
        insert(&pool, &asset).await.unwrap();

        let loaded = get(&pool, asset.id).await.unwrap();
        assert_eq!(loaded.stem_role, Some(StemRole::Drums));
        assert_eq!(loaded.asset_type, "stem");

        update_analysis(&pool, asset.id, Some("F#m"), Some(161.4), Some(0.82))
            .await
            .unwrap();
        let stems = list_by_type(&pool, session.id, "stem").await.unwrap();
        assert_eq!(stems.len(), 1);
        assert_eq!(stems[0].detected_key.as_deref(), Some("F#m"));
        assert_eq!(stems[0].detected_bpm, Some(161.4));
    }
}
