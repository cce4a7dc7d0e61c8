use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor, SqlitePool};

use super::{like_pattern, page_offset, Page};

/// Stored `storage_limit` meaning "use the configured default quota".
pub const STORAGE_LIMIT_DEFAULT: i64 = 0;
/// Stored `storage_limit` meaning "no quota".
pub const STORAGE_LIMIT_UNLIMITED: i64 = -1;

const USER_COLUMNS: &str = "id, username, email, password_hash, is_admin, created_at, last_login, \
                            failed_login_attempts, locked_until, storage_limit";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_login_attempts: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub storage_limit: i64,
}

impl User {
    pub fn is_locked(&self) -> bool {
        self.is_locked_at(Utc::now())
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Quota in bytes, `None` if unlimited.
    pub fn storage_quota(&self, default_bytes: i64) -> Option<i64> {
        match self.storage_limit {
            STORAGE_LIMIT_UNLIMITED => None,
            STORAGE_LIMIT_DEFAULT => Some(default_bytes),
            bytes => Some(bytes),
        }
    }
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub password_hash: &'a str,
    pub is_admin: bool,
}

/// Per-user storage usage for the admin overview.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserStorage {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub storage_limit: i64,
    pub used: i64,
    pub image_count: i64,
}

pub async fn create(pool: &SqlitePool, new_user: NewUser<'_>) -> Result<User, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO users (username, email, password_hash, is_admin, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(new_user.username)
    .bind(new_user.email)
    .bind(new_user.password_hash)
    .bind(new_user.is_admin)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    find_by_id(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Looks a user up by username or, failing that, by email.
///
/// Emails are stored lowercased, so the email comparison ignores the login's case.
pub async fn find_by_login(pool: &SqlitePool, login: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE username = ?1 OR email = ?2 \
         ORDER BY CASE WHEN username = ?1 THEN 0 ELSE 1 END LIMIT 1",
        USER_COLUMNS
    ))
    .bind(login)
    .bind(login.to_lowercase())
    .fetch_optional(pool)
    .await
}

pub async fn username_taken(
    pool: &SqlitePool,
    username: &str,
    excluding: Option<i64>,
) -> Result<bool, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? AND id != ?")
            .bind(username)
            .bind(excluding.unwrap_or(-1))
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

pub async fn email_taken(
    pool: &SqlitePool,
    email: &str,
    excluding: Option<i64>,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
        .bind(email)
        .bind(excluding.unwrap_or(-1))
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

pub async fn update_account(
    pool: &SqlitePool,
    id: i64,
    username: &str,
    email: Option<&str>,
    is_admin: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET username = ?, email = ?, is_admin = ? WHERE id = ?")
        .bind(username)
        .bind(email)
        .bind(is_admin)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replaces the password hash and lifts any lockout.
pub async fn set_password(
    pool: &SqlitePool,
    id: i64,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE users SET password_hash = ?, failed_login_attempts = 0, locked_until = NULL \
         WHERE id = ?",
    )
    .bind(password_hash)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Counts a failed login and locks the account once `max_attempts` is reached.
/// Returns the updated user.
pub async fn record_failed_login(
    pool: &SqlitePool,
    id: i64,
    max_attempts: i64,
    lockout_secs: i64,
) -> Result<User, sqlx::Error> {
    let locked_until = Utc::now() + Duration::seconds(lockout_secs);
    sqlx::query(
        "UPDATE users SET failed_login_attempts = failed_login_attempts + 1, \
         locked_until = CASE WHEN failed_login_attempts + 1 >= ? THEN ? ELSE locked_until END \
         WHERE id = ?",
    )
    .bind(max_attempts)
    .bind(locked_until)
    .bind(id)
    .execute(pool)
    .await?;

    find_by_id(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn record_successful_login(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, last_login = ? \
         WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_admin(pool: &SqlitePool, id: i64, is_admin: bool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET is_admin = ? WHERE id = ?")
        .bind(is_admin)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_storage_limit(
    pool: &SqlitePool,
    id: i64,
    storage_limit: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET storage_limit = ? WHERE id = ?")
        .bind(storage_limit)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_non_admins<'e, E>(executor: E) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM users WHERE is_admin = 0")
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
}

pub async fn count_admins(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_admin = 1")
        .fetch_one(pool)
        .await
}

pub async fn count_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE created_at >= ?")
        .bind(since)
        .fetch_one(pool)
        .await
}

pub async fn count_active_since(
    pool: &SqlitePool,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE last_login >= ?")
        .bind(since)
        .fetch_one(pool)
        .await
}

pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users ORDER BY created_at DESC, id DESC LIMIT ?",
        USER_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Lists users matching `search` (username or email) and optionally a role.
pub async fn list(
    pool: &SqlitePool,
    search: Option<&str>,
    is_admin: Option<bool>,
    page: i64,
    per_page: i64,
) -> Result<Page<User>, sqlx::Error> {
    let (page, offset) = page_offset(Some(page), per_page);
    let pattern = search
        .filter(|s| !s.is_empty())
        .map(like_pattern)
        .unwrap_or_else(|| "%".to_owned());
    let filter = "(username LIKE ?1 ESCAPE '\\' OR COALESCE(email, '') LIKE ?1 ESCAPE '\\') \
                  AND (?2 IS NULL OR is_admin = ?2)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {}", filter))
        .bind(&pattern)
        .bind(is_admin)
        .fetch_one(pool)
        .await?;

    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE {} ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
        USER_COLUMNS, filter
    ))
    .bind(&pattern)
    .bind(is_admin)
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(Page::new(users, page, per_page, total))
}

pub async fn storage_overview(pool: &SqlitePool) -> Result<Vec<UserStorage>, sqlx::Error> {
    sqlx::query_as::<_, UserStorage>(
        "SELECT u.id, u.username, u.is_admin, u.storage_limit, \
                COALESCE(SUM(i.file_size), 0) AS used, COUNT(i.id) AS image_count \
         FROM users u LEFT JOIN images i ON i.user_id = u.id \
         GROUP BY u.id ORDER BY used DESC, u.id",
    )
    .fetch_all(pool)
    .await
}
