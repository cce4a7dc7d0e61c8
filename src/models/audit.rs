use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor, SqlitePool};

use super::{like_pattern, page_offset, Page};

const AUDIT_COLUMNS: &str =
    "id, user_id, username, action, details, ip_address, user_agent, created_at";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub action: String,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct NewAuditEntry<'a> {
    pub user_id: Option<i64>,
    pub username: Option<&'a str>,
    pub action: &'a str,
    pub details: &'a str,
    pub ip_address: &'a str,
    pub user_agent: Option<&'a str>,
}

pub async fn insert(pool: &SqlitePool, entry: &NewAuditEntry<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_log (user_id, username, action, details, ip_address, user_agent, \
                                created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.user_id)
    .bind(entry.username)
    .bind(entry.action)
    .bind(entry.details)
    .bind(entry.ip_address)
    .bind(entry.user_agent)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest first. `search` matches username, details and IP address.
pub async fn list(
    pool: &SqlitePool,
    search: Option<&str>,
    action: Option<&str>,
    page: i64,
    per_page: i64,
) -> Result<Page<AuditEntry>, sqlx::Error> {
    let (page, offset) = page_offset(Some(page), per_page);
    let pattern = search
        .filter(|s| !s.is_empty())
        .map(like_pattern)
        .unwrap_or_else(|| "%".to_owned());
    let action = action.filter(|a| !a.is_empty());
    let filter = "(COALESCE(username, '') LIKE ?1 ESCAPE '\\' \
                   OR COALESCE(details, '') LIKE ?1 ESCAPE '\\' \
                   OR COALESCE(ip_address, '') LIKE ?1 ESCAPE '\\') \
                  AND (?2 IS NULL OR action = ?2)";

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM audit_log WHERE {}", filter))
            .bind(&pattern)
            .bind(action)
            .fetch_one(pool)
            .await?;

    let items = sqlx::query_as::<_, AuditEntry>(&format!(
        "SELECT {} FROM audit_log WHERE {} ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
        AUDIT_COLUMNS, filter
    ))
    .bind(&pattern)
    .bind(action)
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(Page::new(items, page, per_page, total))
}

pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditEntry>, sqlx::Error> {
    sqlx::query_as::<_, AuditEntry>(&format!(
        "SELECT {} FROM audit_log ORDER BY created_at DESC, id DESC LIMIT ?",
        AUDIT_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn distinct_actions(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT DISTINCT action FROM audit_log ORDER BY action")
        .fetch_all(pool)
        .await
}

pub async fn count_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE created_at >= ?")
        .bind(since)
        .fetch_one(pool)
        .await
}

pub async fn delete_all<'e, E>(executor: E) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM audit_log").execute(executor).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;

    async fn log(pool: &SqlitePool, username: Option<&str>, action: &str, details: &str) {
        insert(
            pool,
            &NewAuditEntry {
                user_id: None,
                username,
                action,
                details,
                ip_address: "127.0.0.1",
                user_agent: Some("tests"),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn entries_are_filtered_and_paginated() {
        let pool = test_pool().await;
        log(&pool, Some("jane"), "LOGIN_SUCCESS", "User logged in").await;
        log(&pool, None, "LOGIN_FAILED", "Unknown user: bob").await;
        log(&pool, Some("jane"), "LOGOUT", "User logged out").await;

        let all = list(&pool, None, None, 1, 2).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.items[0].action, "LOGOUT");
        assert!(all.has_next);

        let failed = list(&pool, None, Some("LOGIN_FAILED"), 1, 50).await.unwrap();
        assert_eq!(failed.total, 1);

        let searched = list(&pool, Some("bob"), None, 1, 50).await.unwrap();
        assert_eq!(searched.items[0].action, "LOGIN_FAILED");

        assert_eq!(
            distinct_actions(&pool).await.unwrap(),
            vec!["LOGIN_FAILED", "LOGIN_SUCCESS", "LOGOUT"]
        );
    }
}
