use thiserror::Error;

use crate::feed::{normalize, DateError, FetchedFeed, FetchedItem};
use crate::storage::{DatabaseError, FeedStore, NewPost};

/// Why a single feed item was not stored. Never fatal to the batch.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("item {link:?} has an unusable published date: {source}")]
    Date {
        link: String,
        #[source]
        source: DateError,
    },

    #[error("item {title:?} has no link")]
    MissingLink { title: String },

    #[error("failed to store item {link:?}: {source}")]
    Store {
        link: String,
        #[source]
        source: DatabaseError,
    },
}

/// Outcome of ingesting one fetched feed.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Posts written for the first time
    pub inserted: usize,
    /// Items whose URL was already stored
    pub duplicates: usize,
    /// Items skipped, in feed order
    pub skipped: Vec<ItemError>,
}

impl IngestReport {
    /// Number of items looked at
    pub fn attempted(&self) -> usize {
        self.inserted + self.duplicates + self.skipped.len()
    }
}

/// Turns fetched feed items into stored posts, deduplicated by URL.
pub struct PostIngestor<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: FeedStore + ?Sized> PostIngestor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Store every usable item of `content` under `feed_id`.
    ///
    /// Items are processed in document order. A bad date, a missing link or
    /// a failed write skips only that item; the call always attempts every
    /// item and reports what happened to each.
    pub async fn ingest(&self, feed_id: i64, content: FetchedFeed) -> IngestReport {
        let mut report = IngestReport::default();

        for (position, item) in content.items.into_iter().enumerate() {
            let link = item.link.clone();
            match self.ingest_item(feed_id, item).await {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    tracing::warn!(
                        feed_id = feed_id,
                        position = position,
                        link = %link,
                        error = %e,
                        "Skipping feed item"
                    );
                    report.skipped.push(e);
                }
            }
        }

        report
    }

    async fn ingest_item(&self, feed_id: i64, item: FetchedItem) -> Result<bool, ItemError> {
        let published_at = normalize(&item.pub_date).map_err(|source| ItemError::Date {
            link: item.link.clone(),
            source,
        })?;

        let url = item.link.trim();
        if url.is_empty() {
            return Err(ItemError::MissingLink { title: item.title });
        }

        let description = item.description.trim();
        let post = NewPost {
            feed_id,
            title: item.title.trim().to_string(),
            url: url.to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            published_at: Some(published_at),
        };

        self.store
            .insert_post(&post)
            .await
            .map_err(|source| ItemError::Store {
                link: post.url.clone(),
                source,
            })
    }
}

/// Shorthand for [`PostIngestor::ingest`].
pub async fn ingest<S: FeedStore + ?Sized>(
    store: &S,
    feed_id: i64,
    content: FetchedFeed,
) -> IngestReport {
    PostIngestor::new(store).ingest(feed_id, content).await
}
