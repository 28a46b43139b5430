use anyhow::Result;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedRow, FeedWithOwner, FeedWithOwnerRow};

const FEED_COLUMNS: &str = "id, name, url, user_id, created_at, updated_at, last_fetched_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed owned by `user_id`. Fails if the URL is already registered.
    pub async fn create_feed(&self, name: &str, url: &str, user_id: i64) -> Result<Feed> {
        let now = Utc::now().timestamp_millis();
        let row: FeedRow = sqlx::query_as(&format!(
            "INSERT INTO feeds (name, url, user_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {FEED_COLUMNS}"
        ))
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_feed())
    }

    /// Get a single feed by ID
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// All feeds with their owner's name, in creation order
    pub async fn list_feeds(&self) -> Result<Vec<FeedWithOwner>> {
        let rows: Vec<FeedWithOwnerRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.name, f.url, f.user_id, f.created_at, f.updated_at,
                   f.last_fetched_at, u.name AS owner_name
            FROM feeds f
            JOIN users u ON u.id = f.user_id
            ORDER BY f.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| FeedWithOwner {
                feed: row.feed.into_feed(),
                owner_name: row.owner_name,
            })
            .collect())
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// The feed that has waited longest since its last fetch.
    ///
    /// Never-fetched feeds (NULL) come first; ties break on the lowest id.
    pub async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        let row: Option<FeedRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             ORDER BY last_fetched_at ASC NULLS FIRST, id ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Record `at` as the feed's last fetch time.
    ///
    /// The stored value never decreases: an older `at` leaves it unchanged.
    pub async fn mark_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let at = at.timestamp_millis();
        sqlx::query(
            "UPDATE feeds SET last_fetched_at = MAX(IFNULL(last_fetched_at, 0), ?), updated_at = ? \
             WHERE id = ?",
        )
        .bind(at)
        .bind(at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Select the next feed and mark it fetched in one statement.
    ///
    /// A single UPDATE with a sub-select runs under SQLite's write lock, so
    /// two pollers sharing the database never claim the same feed in the
    /// same round.
    pub async fn claim_next_feed(&self, at: DateTime<Utc>) -> Result<Option<Feed>, DatabaseError> {
        let at = at.timestamp_millis();
        let row: Option<FeedRow> = sqlx::query_as(&format!(
            r#"
            UPDATE feeds
            SET last_fetched_at = MAX(IFNULL(last_fetched_at, 0), ?), updated_at = ?
            WHERE id = (
                SELECT id FROM feeds
                ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
                LIMIT 1
            )
            RETURNING {FEED_COLUMNS}
        "#
        ))
        .bind(at)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }
}
