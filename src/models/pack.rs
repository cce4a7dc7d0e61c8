use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::util::image::PackConfig;

const PACK_COLUMNS: &str = "id, name, icon, is_active, config, created_at";

pub const DEFAULT_ICON: &str = "📦";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Pack {
    pub id: i64,
    pub name: String,
    pub icon: String,
    pub is_active: bool,
    pub config: String,
    pub created_at: DateTime<Utc>,
}

impl Pack {
    pub fn parsed_config(&self) -> Result<PackConfig, serde_json::Error> {
        PackConfig::parse(&self.config)
    }
}

pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Pack>, sqlx::Error> {
    sqlx::query_as::<_, Pack>(&format!(
        "SELECT {} FROM packs WHERE is_active = 1 ORDER BY name, id",
        PACK_COLUMNS
    ))
    .fetch_all(pool)
    .await
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Pack>, sqlx::Error> {
    sqlx::query_as::<_, Pack>(&format!(
        "SELECT {} FROM packs ORDER BY created_at DESC, id DESC",
        PACK_COLUMNS
    ))
    .fetch_all(pool)
    .await
}

pub async fn find(pool: &SqlitePool, id: i64) -> Result<Option<Pack>, sqlx::Error> {
    sqlx::query_as::<_, Pack>(&format!("SELECT {} FROM packs WHERE id = ?", PACK_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn create(
    pool: &SqlitePool,
    name: &str,
    icon: &str,
    config: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO packs (name, icon, is_active, config, created_at) VALUES (?, ?, 1, ?, ?)",
    )
    .bind(name)
    .bind(icon)
    .bind(config)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update(
    pool: &SqlitePool,
    id: i64,
    name: &str,
    icon: &str,
    config: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE packs SET name = ?, icon = ?, config = ? WHERE id = ?")
        .bind(name)
        .bind(icon)
        .bind(config)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Flips `is_active` and returns the new state, or `None` if the pack does not exist.
pub async fn toggle(pool: &SqlitePool, id: i64) -> Result<Option<bool>, sqlx::Error> {
    sqlx::query_scalar("UPDATE packs SET is_active = NOT is_active WHERE id = ? RETURNING is_active")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM packs WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
