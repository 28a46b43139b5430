use anyhow::Result;
use chrono::Utc;

use super::schema::Database;
use super::types::{DatabaseError, NewPost, Post, PostRow};

/// Maximum number of posts to return from any single query (OOM protection)
const MAX_POSTS: i64 = 2000;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert a post unless one with the same URL already exists.
    ///
    /// Returns `true` when a row was written and `false` when the URL was
    /// already stored. A duplicate URL is not an error: the same item shows
    /// up in every poll until it ages out of the source feed.
    pub async fn insert_post(&self, post: &NewPost) -> Result<bool, DatabaseError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO posts (title, url, description, published_at, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
        "#,
        )
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(post.published_at.map(|t| t.timestamp_millis()))
        .bind(post.feed_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Post Queries
    // ========================================================================

    /// Newest posts from the feeds owned by `user_id`.
    ///
    /// Posts without a published date sort after dated ones.
    pub async fn get_posts_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Post>> {
        let limit = limit.clamp(0, MAX_POSTS);
        let rows: Vec<PostRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.title, p.url, p.description, p.published_at, p.feed_id,
                   p.created_at, p.updated_at
            FROM posts p
            JOIN feeds f ON f.id = p.feed_id
            WHERE f.user_id = ?
            ORDER BY p.published_at IS NULL, p.published_at DESC, p.id DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// All posts of one feed in insertion order
    pub async fn get_posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>> {
        let rows: Vec<PostRow> = sqlx::query_as(
            r#"
            SELECT id, title, url, description, published_at, feed_id, created_at, updated_at
            FROM posts
            WHERE feed_id = ?
            ORDER BY id
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_POSTS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// Total number of stored posts
    pub async fn count_posts(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Feed, NewPost};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn test_db_with_feed() -> (Database, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        let feed = db
            .create_feed("Blog", "https://example.com/rss", user.id)
            .await
            .unwrap();
        (db, feed)
    }

    fn test_post(feed_id: i64, slug: &str, published: Option<i64>) -> NewPost {
        NewPost {
            feed_id,
            title: format!("Post {slug}"),
            url: format!("https://example.com/{slug}"),
            description: Some("Test description".to_string()),
            published_at: published.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_insert_post_returns_true_when_new() {
        let (db, feed) = test_db_with_feed().await;
        let inserted = db
            .insert_post(&test_post(feed.id, "a", Some(1_700_000_000)))
            .await
            .unwrap();
        assert!(inserted);

        let posts = db.get_posts_for_feed(feed.id).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "https://example.com/a");
        assert_eq!(posts[0].description.as_deref(), Some("Test description"));
        assert_eq!(
            posts[0].published_at,
            Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_insert_duplicate_url_is_noop() {
        let (db, feed) = test_db_with_feed().await;
        let post = test_post(feed.id, "a", None);

        assert!(db.insert_post(&post).await.unwrap());
        let mut retitled = post.clone();
        retitled.title = "Changed".to_string();
        assert!(!db.insert_post(&retitled).await.unwrap());

        let posts = db.get_posts_for_feed(feed.id).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "Post a");
    }

    #[tokio::test]
    async fn test_posts_for_user_newest_first() {
        let (db, feed) = test_db_with_feed().await;
        db.insert_post(&test_post(feed.id, "old", Some(1_000))).await.unwrap();
        db.insert_post(&test_post(feed.id, "undated", None)).await.unwrap();
        db.insert_post(&test_post(feed.id, "new", Some(2_000))).await.unwrap();

        let titles: Vec<String> = db
            .get_posts_for_user(feed.user_id, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["Post new", "Post old", "Post undated"]);

        let limited = db.get_posts_for_user(feed.user_id, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_posts_for_other_user_hidden() {
        let (db, feed) = test_db_with_feed().await;
        let bob = db.create_user("bob").await.unwrap();
        db.insert_post(&test_post(feed.id, "a", None)).await.unwrap();

        assert!(db.get_posts_for_user(bob.id, 10).await.unwrap().is_empty());
        assert_eq!(db.count_posts().await.unwrap(), 1);
    }
}
