use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::constants::RESET_TOKEN_TTL_SECS;

#[derive(Debug, Clone, FromRow)]
pub struct PasswordReset {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl PasswordReset {
    pub fn is_valid(&self) -> bool {
        !self.used && self.expires_at > Utc::now()
    }
}

pub async fn create(pool: &SqlitePool, user_id: i64, token: &str) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO password_resets (user_id, token, expires_at, used, created_at) \
         VALUES (?, ?, ?, 0, ?)",
    )
    .bind(user_id)
    .bind(token)
    .bind(now + Duration::seconds(RESET_TOKEN_TTL_SECS))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns the reset if the token exists, is unused and has not expired.
pub async fn find_valid(
    pool: &SqlitePool,
    token: &str,
) -> Result<Option<PasswordReset>, sqlx::Error> {
    let reset = sqlx::query_as::<_, PasswordReset>(
        "SELECT id, user_id, token, expires_at, used, created_at FROM password_resets \
         WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(reset.filter(PasswordReset::is_valid))
}

pub async fn mark_used(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE password_resets SET used = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Removes used and expired tokens.
pub async fn delete_stale(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM password_resets WHERE used = 1 OR expires_at <= ?")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_user, test_pool};

    #[tokio::test]
    async fn tokens_are_single_use() {
        let pool = test_pool().await;
        let user = create_user(&pool, "jane", "Secret123!", false).await;
        create(&pool, user.id, "reset-token").await.unwrap();

        let reset = find_valid(&pool, "reset-token").await.unwrap().unwrap();
        assert_eq!(reset.user_id, user.id);

        mark_used(&pool, reset.id).await.unwrap();
        assert!(find_valid(&pool, "reset-token").await.unwrap().is_none());
        assert_eq!(delete_stale(&pool).await.unwrap(), 1);
        assert!(find_valid(&pool, "unknown").await.unwrap().is_none());
    }
}
