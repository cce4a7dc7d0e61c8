use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteExecutor, SqlitePool};

use super::{like_pattern, page_offset, Page};

const SUMMARY_COLUMNS: &str = "id, user_id, pack_id, original_filename, saved_filename, \
                               tool_used, width, height, file_size, created_at";

/// The tool that produced a stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Blur,
    Compress,
    Resize,
    Pack,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Blur => "blur",
            Tool::Compress => "compress",
            Tool::Resize => "resize",
            Tool::Pack => "pack",
        }
    }
}

/// A stored image including its bytes.
#[derive(Debug, Clone, FromRow)]
pub struct Image {
    pub id: i64,
    pub user_id: i64,
    pub pack_id: Option<i64>,
    pub original_filename: String,
    pub saved_filename: String,
    pub tool_used: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub file_size: Option<i64>,
    pub image_data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Image metadata without the bytes, used for listings.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImageSummary {
    pub id: i64,
    pub user_id: i64,
    pub pack_id: Option<i64>,
    pub original_filename: String,
    pub saved_filename: String,
    pub tool_used: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

pub struct NewImage<'a> {
    pub user_id: i64,
    pub pack_id: Option<i64>,
    pub original_filename: &'a str,
    pub saved_filename: &'a str,
    pub tool: Tool,
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, Default, FromRow, Serialize, PartialEq)]
pub struct ImageTotals {
    pub count: i64,
    pub size: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, PartialEq)]
pub struct ToolUsage {
    pub tool_used: String,
    pub count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, PartialEq)]
pub struct PackUsage {
    pub name: String,
    pub usage_count: i64,
}

pub async fn insert<'e, E>(executor: E, image: &NewImage<'_>) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO images (user_id, pack_id, original_filename, saved_filename, tool_used, \
                             width, height, file_size, image_data, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(image.user_id)
    .bind(image.pack_id)
    .bind(image.original_filename)
    .bind(image.saved_filename)
    .bind(image.tool.as_str())
    .bind(image.width as i64)
    .bind(image.height as i64)
    .bind(image.data.len() as i64)
    .bind(image.data)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn find(pool: &SqlitePool, id: i64) -> Result<Option<Image>, sqlx::Error> {
    sqlx::query_as::<_, Image>(&format!(
        "SELECT {}, image_data FROM images WHERE id = ?",
        SUMMARY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_summary(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<ImageSummary>, sqlx::Error> {
    sqlx::query_as::<_, ImageSummary>(&format!(
        "SELECT {} FROM images WHERE id = ?",
        SUMMARY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Newest first, optionally filtered by filename search and tool.
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: i64,
    search: Option<&str>,
    tool: Option<&str>,
    page: i64,
    per_page: i64,
) -> Result<Page<ImageSummary>, sqlx::Error> {
    let (page, offset) = page_offset(Some(page), per_page);
    let pattern = search
        .filter(|s| !s.is_empty())
        .map(like_pattern)
        .unwrap_or_else(|| "%".to_owned());
    let tool = tool.filter(|t| !t.is_empty());
    let filter = "user_id = ?1 \
                  AND (original_filename LIKE ?2 ESCAPE '\\' OR saved_filename LIKE ?2 ESCAPE '\\') \
                  AND (?3 IS NULL OR tool_used = ?3)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM images WHERE {}", filter))
        .bind(user_id)
        .bind(&pattern)
        .bind(tool)
        .fetch_one(pool)
        .await?;

    let items = sqlx::query_as::<_, ImageSummary>(&format!(
        "SELECT {} FROM images WHERE {} ORDER BY created_at DESC, id DESC LIMIT ?4 OFFSET ?5",
        SUMMARY_COLUMNS, filter
    ))
    .bind(user_id)
    .bind(&pattern)
    .bind(tool)
    .bind(per_page)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(Page::new(items, page, per_page, total))
}

pub async fn recent_for_user(
    pool: &SqlitePool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<ImageSummary>, sqlx::Error> {
    sqlx::query_as::<_, ImageSummary>(&format!(
        "SELECT {} FROM images WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        SUMMARY_COLUMNS
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn all_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<Image>, sqlx::Error> {
    sqlx::query_as::<_, Image>(&format!(
        "SELECT {}, image_data FROM images WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        SUMMARY_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn pack_for_user(
    pool: &SqlitePool,
    user_id: i64,
    pack_id: i64,
) -> Result<Vec<Image>, sqlx::Error> {
    sqlx::query_as::<_, Image>(&format!(
        "SELECT {}, image_data FROM images WHERE user_id = ? AND pack_id = ? \
         ORDER BY created_at DESC, id DESC",
        SUMMARY_COLUMNS
    ))
    .bind(user_id)
    .bind(pack_id)
    .fetch_all(pool)
    .await
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM images WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_pack_for_user(
    pool: &SqlitePool,
    user_id: i64,
    pack_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM images WHERE user_id = ? AND pack_id = ?")
        .bind(user_id)
        .bind(pack_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_all_for_user(pool: &SqlitePool, user_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM images WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_all<'e, E>(executor: E) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM images").execute(executor).await?;
    Ok(result.rows_affected())
}

pub async fn delete_older_than(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM images WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Count and byte total, for one user or everybody.
pub async fn totals(pool: &SqlitePool, user_id: Option<i64>) -> Result<ImageTotals, sqlx::Error> {
    sqlx::query_as::<_, ImageTotals>(
        "SELECT COUNT(*) AS count, COALESCE(SUM(file_size), 0) AS size FROM images \
         WHERE ?1 IS NULL OR user_id = ?1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn count_since(
    pool: &SqlitePool,
    user_id: Option<i64>,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM images WHERE (?1 IS NULL OR user_id = ?1) AND created_at >= ?2",
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(pool)
    .await
}

pub async fn tool_usage(
    pool: &SqlitePool,
    user_id: Option<i64>,
) -> Result<Vec<ToolUsage>, sqlx::Error> {
    sqlx::query_as::<_, ToolUsage>(
        "SELECT tool_used, COUNT(*) AS count FROM images WHERE ?1 IS NULL OR user_id = ?1 \
         GROUP BY tool_used ORDER BY count DESC, tool_used",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Stored images per pack, most used first.
pub async fn pack_usage(pool: &SqlitePool) -> Result<Vec<PackUsage>, sqlx::Error> {
    sqlx::query_as::<_, PackUsage>(
        "SELECT p.name AS name, COUNT(i.id) AS usage_count \
         FROM packs p JOIN images i ON i.pack_id = p.id \
         GROUP BY p.id ORDER BY usage_count DESC, p.name",
    )
    .fetch_all(pool)
    .await
}

/// Distinct users that stored an image since `since`.
pub async fn active_users_since(
    pool: &SqlitePool,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM images WHERE created_at >= ?")
        .bind(since)
        .fetch_one(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_user, test_pool};

    async fn store(pool: &SqlitePool, user_id: i64, name: &str, tool: Tool, bytes: usize) -> i64 {
        let data = vec![0u8; bytes];
        insert(
            pool,
            &NewImage {
                user_id,
                pack_id: None,
                original_filename: "source.png",
                saved_filename: name,
                tool,
                width: 10,
                height: 10,
                data: &data,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn images_are_listed_newest_first_with_filters() {
        let pool = test_pool().await;
        let user = create_user(&pool, "jane", "Secret123!", false).await;
        store(&pool, user.id, "a-blur.png", Tool::Blur, 10).await;
        let newest = store(&pool, user.id, "b-compressed.jpg", Tool::Compress, 20).await;

        let page = list_for_user(&pool, user.id, None, None, 1, 20).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, newest);

        let blurred = list_for_user(&pool, user.id, None, Some("blur"), 1, 20)
            .await
            .unwrap();
        assert_eq!(blurred.total, 1);

        let searched = list_for_user(&pool, user.id, Some("compressed"), None, 1, 20)
            .await
            .unwrap();
        assert_eq!(searched.items[0].saved_filename, "b-compressed.jpg");
    }

    #[tokio::test]
    async fn totals_and_usage_are_aggregated() {
        let pool = test_pool().await;
        let user = create_user(&pool, "jane", "Secret123!", false).await;
        store(&pool, user.id, "a.png", Tool::Blur, 10).await;
        store(&pool, user.id, "b.png", Tool::Blur, 30).await;
        store(&pool, user.id, "c.jpg", Tool::Compress, 5).await;

        assert_eq!(
            totals(&pool, Some(user.id)).await.unwrap(),
            ImageTotals { count: 3, size: 45 }
        );
        assert_eq!(totals(&pool, Some(user.id + 100)).await.unwrap().count, 0);

        let usage = tool_usage(&pool, None).await.unwrap();
        assert_eq!(usage[0].tool_used, "blur");
        assert_eq!(usage[0].count, 2);

        let since = Utc::now() - chrono::Duration::days(7);
        assert_eq!(count_since(&pool, None, since).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_to_images() {
        let pool = test_pool().await;
        let user = create_user(&pool, "jane", "Secret123!", false).await;
        let id = store(&pool, user.id, "a.png", Tool::Resize, 10).await;

        crate::models::user::delete(&pool, user.id).await.unwrap();
        assert!(find(&pool, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pack_usage_counts_images_per_pack() {
        let pool = test_pool().await;
        let user = create_user(&pool, "jane", "Secret123!", false).await;
        let pack_id = crate::models::pack::create(&pool, "Social", "📦", "[]")
            .await
            .unwrap();
        for name in ["a.png", "b.png"] {
            insert(
                &pool,
                &NewImage {
                    user_id: user.id,
                    pack_id: Some(pack_id),
                    original_filename: "source.png",
                    saved_filename: name,
                    tool: Tool::Pack,
                    width: 10,
                    height: 10,
                    data: &[1],
                },
            )
            .await
            .unwrap();
        }
        store(&pool, user.id, "c.png", Tool::Blur, 1).await;

        let usage = pack_usage(&pool).await.unwrap();
        assert_eq!(
            usage,
            vec![PackUsage {
                name: "Social".to_owned(),
                usage_count: 2
            }]
        );

        let since = Utc::now() - chrono::Duration::days(30);
        assert_eq!(active_users_since(&pool, since).await.unwrap(), 1);
    }
}
