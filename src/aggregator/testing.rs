//! In-memory store and scripted fetcher for exercising the polling core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::feed::{FeedFetcher, FetchError, FetchedFeed, FetchedItem};
use crate::storage::{DatabaseError, Feed, FeedStore, NewPost};

pub(crate) fn item(link: &str, pub_date: &str) -> FetchedItem {
    FetchedItem {
        title: format!("Title for {link}"),
        link: link.to_string(),
        description: String::new(),
        pub_date: pub_date.to_string(),
    }
}

pub(crate) fn feed_with(links: &[&str]) -> FetchedFeed {
    FetchedFeed {
        title: "Stub".to_string(),
        link: "https://example.com/".to_string(),
        description: String::new(),
        items: links
            .iter()
            .map(|link| item(link, "2006-01-02T15:04:05Z"))
            .collect(),
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    feeds: Mutex<Vec<Feed>>,
    posts: Mutex<Vec<NewPost>>,
    failing_inserts: Vec<String>,
    fail_selection: bool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_insert(mut self, url: &str) -> Self {
        self.failing_inserts.push(url.to_string());
        self
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            fail_selection: true,
            ..Self::default()
        }
    }

    pub(crate) fn add_feed(&self, url: &str, last_fetched_at: Option<DateTime<Utc>>) -> i64 {
        let mut feeds = self.feeds.lock().unwrap();
        let id = feeds.len() as i64 + 1;
        let now = Utc::now();
        feeds.push(Feed {
            id,
            name: format!("Feed {id}"),
            url: url.to_string(),
            user_id: 1,
            created_at: now,
            updated_at: now,
            last_fetched_at,
        });
        id
    }

    pub(crate) fn feed(&self, id: i64) -> Feed {
        self.feeds
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .unwrap()
    }

    pub(crate) fn posts(&self) -> Vec<NewPost> {
        self.posts.lock().unwrap().clone()
    }

    pub(crate) fn post_urls(&self) -> Vec<String> {
        self.posts().into_iter().map(|p| p.url).collect()
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        if self.fail_selection {
            return Err(DatabaseError::Other(sqlx::Error::PoolClosed));
        }
        Ok(self
            .feeds
            .lock()
            .unwrap()
            .iter()
            .min_by_key(|f| (f.last_fetched_at.is_some(), f.last_fetched_at, f.id))
            .cloned())
    }

    async fn mark_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let mut feeds = self.feeds.lock().unwrap();
        if let Some(feed) = feeds.iter_mut().find(|f| f.id == feed_id) {
            feed.last_fetched_at = Some(feed.last_fetched_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(())
    }

    async fn insert_post(&self, post: &NewPost) -> Result<bool, DatabaseError> {
        if self.failing_inserts.contains(&post.url) {
            return Err(DatabaseError::Other(sqlx::Error::PoolTimedOut));
        }
        let mut posts = self.posts.lock().unwrap();
        if posts.iter().any(|p| p.url == post.url) {
            return Ok(false);
        }
        posts.push(post.clone());
        Ok(true)
    }
}

/// Fetcher that answers every request with the same scripted response.
pub(crate) struct StubFetcher {
    response: Result<FetchedFeed, u16>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub(crate) fn ok(feed: FetchedFeed) -> Self {
        Self {
            response: Ok(feed),
            delay: None,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch fails with the given HTTP status
    pub(crate) fn failing(status: u16) -> Self {
        Self {
            response: Err(status),
            ..Self::ok(FetchedFeed::default())
        }
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.response {
            Ok(feed) => Ok(feed.clone()),
            Err(status) => Err(FetchError::HttpStatus(*status)),
        }
    }
}
