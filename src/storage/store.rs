//! The store seam the polling core depends on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, Feed, NewPost};

/// Read/write access to feeds and posts, as needed by the polling cycle.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// The least-recently-fetched feed (never-fetched first, ties by id).
    async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError>;

    /// Record `at` as the feed's last fetch time. Never moves it backwards.
    async fn mark_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// Insert a post; `Ok(false)` means a post with that URL already exists.
    async fn insert_post(&self, post: &NewPost) -> Result<bool, DatabaseError>;

    /// Select the next feed and mark it fetched at `at`.
    ///
    /// The default composes [`next_feed_to_fetch`](Self::next_feed_to_fetch)
    /// and [`mark_fetched`](Self::mark_fetched). Stores shared between
    /// several writers must override it with a single atomic operation.
    async fn claim_next_feed(&self, at: DateTime<Utc>) -> Result<Option<Feed>, DatabaseError> {
        let Some(mut feed) = self.next_feed_to_fetch().await? else {
            return Ok(None);
        };
        self.mark_fetched(feed.id, at).await?;
        feed.last_fetched_at = Some(feed.last_fetched_at.map_or(at, |prev| prev.max(at)));
        Ok(Some(feed))
    }
}

#[async_trait]
impl FeedStore for Database {
    async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        Database::next_feed_to_fetch(self).await
    }

    async fn mark_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        Database::mark_fetched(self, feed_id, at).await
    }

    async fn insert_post(&self, post: &NewPost) -> Result<bool, DatabaseError> {
        Database::insert_post(self, post).await
    }

    async fn claim_next_feed(&self, at: DateTime<Utc>) -> Result<Option<Feed>, DatabaseError> {
        Database::claim_next_feed(self, at).await
    }
}
