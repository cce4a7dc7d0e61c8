use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Acquire, FromRow, Sqlite, SqliteExecutor, SqlitePool};

use crate::config::AppConfig;

const DEFAULT_SETTINGS: [(&str, &str); 2] = [
    ("app_tagline", "Professional Image Processing"),
    ("copyright_text", "© 2025 Image Scale Hub"),
];

/// Keys readable without authentication through the API.
pub const PUBLIC_KEYS: [&str; 6] = [
    "app_name",
    "app_tagline",
    "copyright_text",
    "primary_color",
    "logo_url",
    "favicon_url",
];

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value.flatten())
}

/// Numeric setting. Missing and unparsable values both yield `None`.
pub async fn get_i64(pool: &SqlitePool, key: &str) -> Result<Option<i64>, sqlx::Error> {
    Ok(get(pool, key)
        .await?
        .and_then(|value| value.trim().parse::<i64>().ok()))
}

pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn all(pool: &SqlitePool) -> Result<Vec<Setting>, sqlx::Error> {
    sqlx::query_as::<_, Setting>("SELECT key, value, updated_at FROM settings ORDER BY key")
        .fetch_all(pool)
        .await
}

pub async fn delete_all<'e, E>(executor: E) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM settings").execute(executor).await?;
    Ok(result.rows_affected())
}

/// Inserts default settings that do not exist yet.
pub fn seed_defaults<'a, A>(
    conn: A,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), sqlx::Error>> + Send + 'a>>
where
    A: Acquire<'a, Database = Sqlite> + Send + 'a,
{
    Box::pin(async move {
        let mut conn = conn.acquire().await?;
        for (key, value) in DEFAULT_SETTINGS {
            sqlx::query("INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?, ?, ?)")
                .bind(key)
                .bind(value)
                .bind(Utc::now())
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    })
}

/// Limits in force for a request: database settings layered over the process config.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub max_login_attempts: i64,
    pub lockout_duration: i64,
    pub session_timeout: i64,
    pub max_file_size: usize,
    pub allowed_extensions: Vec<String>,
    pub default_storage_limit_bytes: i64,
    pub allow_registration: bool,
    pub auto_delete_days: i64,
}

impl EffectiveSettings {
    pub async fn load(pool: &SqlitePool, config: &AppConfig) -> Result<Self, sqlx::Error> {
        let positive = |value: Option<i64>| value.filter(|v| *v > 0);

        let allowed_extensions = match get(pool, "allowed_extensions").await? {
            Some(value) if !value.trim().is_empty() => value
                .split(',')
                .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            _ => config.allowed_extensions.clone(),
        };
        let allow_registration = match get(pool, "allow_registration").await? {
            Some(value) => parse_bool(&value),
            None => config.enable_registration,
        };
        let default_storage_limit_bytes = positive(get_i64(pool, "default_storage_limit_mb").await?)
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or_else(|| config.default_storage_limit_bytes());

        Ok(EffectiveSettings {
            max_login_attempts: positive(get_i64(pool, "max_login_attempts").await?)
                .unwrap_or(config.max_login_attempts),
            lockout_duration: positive(get_i64(pool, "lockout_duration").await?)
                .unwrap_or(config.lockout_duration),
            session_timeout: positive(get_i64(pool, "session_timeout").await?)
                .unwrap_or(config.session_timeout),
            max_file_size: positive(get_i64(pool, "max_file_size").await?)
                .and_then(|size| usize::try_from(size).ok())
                .unwrap_or(config.max_file_size),
            allowed_extensions,
            default_storage_limit_bytes,
            allow_registration,
            auto_delete_days: get_i64(pool, "auto_delete_days")
                .await?
                .unwrap_or(0)
                .max(0),
        })
    }
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;

    #[tokio::test]
    async fn values_are_upserted() {
        let pool = test_pool().await;
        assert_eq!(get(&pool, "primary_color").await.unwrap(), None);

        set(&pool, "primary_color", "#ff0000").await.unwrap();
        set(&pool, "primary_color", "#00ff00").await.unwrap();
        assert_eq!(
            get(&pool, "primary_color").await.unwrap().as_deref(),
            Some("#00ff00")
        );
        assert_eq!(get(&pool, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn seeding_keeps_existing_values() {
        let pool = test_pool().await;
        set(&pool, "app_tagline", "Custom").await.unwrap();
        seed_defaults(&pool).await.unwrap();
        assert_eq!(
            get(&pool, "app_tagline").await.unwrap().as_deref(),
            Some("Custom")
        );
    }

    #[tokio::test]
    async fn settings_override_config_when_numeric() {
        let pool = test_pool().await;
        let config = AppConfig::default();

        let defaults = EffectiveSettings::load(&pool, &config).await.unwrap();
        assert_eq!(defaults.max_login_attempts, config.max_login_attempts);
        assert_eq!(defaults.auto_delete_days, 0);
        assert!(!defaults.allow_registration);

        set(&pool, "max_login_attempts", "3").await.unwrap();
        set(&pool, "lockout_duration", "soon").await.unwrap();
        set(&pool, "allowed_extensions", "PNG, .jpg").await.unwrap();
        set(&pool, "allow_registration", "true").await.unwrap();
        set(&pool, "default_storage_limit_mb", "5").await.unwrap();

        let effective = EffectiveSettings::load(&pool, &config).await.unwrap();
        assert_eq!(effective.max_login_attempts, 3);
        assert_eq!(effective.lockout_duration, config.lockout_duration);
        assert_eq!(effective.allowed_extensions, vec!["png", "jpg"]);
        assert!(effective.allow_registration);
        assert_eq!(effective.default_storage_limit_bytes, 5 * 1024 * 1024);
    }
}
