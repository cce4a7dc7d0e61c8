use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

const PRESET_COLUMNS: &str = "id, name, width, height, icon, is_active, order_num, created_at";

const DEFAULT_PRESETS: [(&str, i64, i64, &str); 12] = [
    ("Square", 1080, 1080, "⬜"),
    ("Portrait", 1080, 1350, "📱"),
    ("Story", 1080, 1920, "📲"),
    ("FB Post", 1200, 630, "👍"),
    ("FB Cover", 820, 312, "📘"),
    ("Twitter Header", 1500, 500, "🐦"),
    ("YouTube Thumb", 1280, 720, "▶️"),
    ("Tixr Header", 284, 168, "🎟️"),
    ("Tixr Vertical", 1080, 1350, "🎫"),
    ("HD Landscape", 1920, 1080, "🖥️"),
    ("Profile Pic", 400, 400, "👤"),
    ("Linktree", 1080, 1080, "🔗"),
];

pub const DEFAULT_ICON: &str = "📐";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SizePreset {
    pub id: i64,
    pub name: String,
    pub width: i64,
    pub height: i64,
    pub icon: String,
    pub is_active: bool,
    pub order_num: i64,
    pub created_at: DateTime<Utc>,
}

pub struct PresetFields<'a> {
    pub name: &'a str,
    pub width: i64,
    pub height: i64,
    pub icon: &'a str,
    pub order_num: i64,
}

pub async fn list_active(pool: &SqlitePool) -> Result<Vec<SizePreset>, sqlx::Error> {
    sqlx::query_as::<_, SizePreset>(&format!(
        "SELECT {} FROM size_presets WHERE is_active = 1 ORDER BY order_num, id",
        PRESET_COLUMNS
    ))
    .fetch_all(pool)
    .await
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<SizePreset>, sqlx::Error> {
    sqlx::query_as::<_, SizePreset>(&format!(
        "SELECT {} FROM size_presets ORDER BY order_num, id",
        PRESET_COLUMNS
    ))
    .fetch_all(pool)
    .await
}

pub async fn find(pool: &SqlitePool, id: i64) -> Result<Option<SizePreset>, sqlx::Error> {
    sqlx::query_as::<_, SizePreset>(&format!(
        "SELECT {} FROM size_presets WHERE id = ?",
        PRESET_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn create(pool: &SqlitePool, fields: &PresetFields<'_>) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO size_presets (name, width, height, icon, is_active, order_num, created_at) \
         VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(fields.name)
    .bind(fields.width)
    .bind(fields.height)
    .bind(fields.icon)
    .bind(fields.order_num)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update(
    pool: &SqlitePool,
    id: i64,
    fields: &PresetFields<'_>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE size_presets SET name = ?, width = ?, height = ?, icon = ?, order_num = ? \
         WHERE id = ?",
    )
    .bind(fields.name)
    .bind(fields.width)
    .bind(fields.height)
    .bind(fields.icon)
    .bind(fields.order_num)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Flips `is_active` and returns the new state, or `None` if the preset does not exist.
pub async fn toggle(pool: &SqlitePool, id: i64) -> Result<Option<bool>, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE size_presets SET is_active = NOT is_active WHERE id = ? RETURNING is_active",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM size_presets WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn next_order(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(order_num) FROM size_presets")
        .fetch_one(pool)
        .await?;
    Ok(max.unwrap_or(0) + 1)
}

/// Seeds the default presets into an empty table. Returns how many were inserted.
pub async fn seed_defaults(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM size_presets")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(0);
    }

    for (index, (name, width, height, icon)) in DEFAULT_PRESETS.into_iter().enumerate() {
        create(
            pool,
            &PresetFields {
                name,
                width,
                height,
                icon,
                order_num: index as i64 + 1,
            },
        )
        .await?;
    }
    Ok(DEFAULT_PRESETS.len())
}
