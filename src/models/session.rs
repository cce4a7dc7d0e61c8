use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

const SESSION_COLUMNS: &str =
    "token, user_id, remember, expires_at, pending_upload, pending_filename, created_at";

/// A login session. Also remembers the session's staged upload.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub remember: bool,
    pub expires_at: DateTime<Utc>,
    pub pending_upload: Option<String>,
    pub pending_filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn pending(&self) -> Option<(Uuid, &str)> {
        let uuid = self
            .pending_upload
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok())?;
        Some((uuid, self.pending_filename.as_deref().unwrap_or("image")))
    }
}

pub async fn create(
    pool: &SqlitePool,
    token: &str,
    user_id: i64,
    remember: bool,
    ttl_secs: i64,
) -> Result<Session, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as::<_, Session>(&format!(
        "INSERT INTO sessions (token, user_id, remember, expires_at, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING {}",
        SESSION_COLUMNS
    ))
    .bind(token)
    .bind(user_id)
    .bind(remember)
    .bind(now + Duration::seconds(ttl_secs))
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Returns the session if it exists and has not expired.
pub async fn find_valid(pool: &SqlitePool, token: &str) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(&format!(
        "SELECT {} FROM sessions WHERE token = ? AND expires_at > ?",
        SESSION_COLUMNS
    ))
    .bind(token)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
}

pub async fn extend(pool: &SqlitePool, token: &str, ttl_secs: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET expires_at = ? WHERE token = ?")
        .bind(Utc::now() + Duration::seconds(ttl_secs))
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Stages an upload on the session and returns the one it replaced, if any.
pub async fn set_pending(
    pool: &SqlitePool,
    token: &str,
    upload: Uuid,
    filename: &str,
) -> Result<Option<Uuid>, sqlx::Error> {
    let previous: Option<Option<String>> =
        sqlx::query_scalar("SELECT pending_upload FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(pool)
            .await?;

    sqlx::query("UPDATE sessions SET pending_upload = ?, pending_filename = ? WHERE token = ?")
        .bind(upload.to_string())
        .bind(filename)
        .bind(token)
        .execute(pool)
        .await?;

    Ok(previous
        .flatten()
        .and_then(|raw| Uuid::parse_str(&raw).ok()))
}

pub async fn delete(pool: &SqlitePool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_for_user(pool: &SqlitePool, user_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_expired(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Upload ids still referenced by a live session.
pub async fn referenced_uploads(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT pending_upload FROM sessions WHERE pending_upload IS NOT NULL AND expires_at > ?",
    )
    .bind(Utc::now())
    .fetch_all(pool)
    .await
}
