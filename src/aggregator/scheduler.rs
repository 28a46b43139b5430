use chrono::{DateTime, Utc};
use thiserror::Error;

use super::ingest::{IngestReport, PostIngestor};
use crate::feed::{FeedFetcher, FetchError};
use crate::storage::{DatabaseError, Feed, FeedStore};

/// Source of "now" for fetch timestamps.
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Why a polling cycle ended early.
///
/// Neither variant means later cycles will fail; the driver logs and moves on.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The store could not pick (or mark) the next feed
    #[error("could not select the next feed: {0}")]
    Selection(#[source] DatabaseError),

    /// The claimed feed could not be retrieved or parsed
    #[error("failed to fetch feed {feed_id} ({url}): {source}")]
    Fetch {
        feed_id: i64,
        url: String,
        #[source]
        source: FetchError,
    },
}

/// What a successful cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No feeds are registered
    Idle,
    /// One feed was fetched and its items ingested
    Ingested { feed: Feed, report: IngestReport },
}

/// Picks the stalest feed, marks it, fetches it and ingests its items.
pub struct Scheduler<S, F> {
    store: S,
    fetcher: F,
    clock: Clock,
}

impl<S: FeedStore, F: FeedFetcher> Scheduler<S, F> {
    pub fn new(store: S, fetcher: F) -> Self {
        Self {
            store,
            fetcher,
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the wall clock used to stamp `last_fetched_at`.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Run exactly one polling cycle.
    ///
    /// The feed is marked as fetched before the network request goes out, so a
    /// feed that fails to fetch still moves to the back of the rotation and
    /// cannot starve the others.
    pub async fn run_one_cycle(&self) -> Result<CycleOutcome, CycleError> {
        let now = (self.clock)();

        let Some(feed) = self
            .store
            .claim_next_feed(now)
            .await
            .map_err(CycleError::Selection)?
        else {
            tracing::debug!("No feeds to fetch");
            return Ok(CycleOutcome::Idle);
        };

        tracing::info!(feed_id = feed.id, name = %feed.name, url = %feed.url, "Fetching feed");

        let content = self
            .fetcher
            .fetch(&feed.url)
            .await
            .map_err(|source| CycleError::Fetch {
                feed_id: feed.id,
                url: feed.url.clone(),
                source,
            })?;

        let items = content.items.len();
        let report = PostIngestor::new(&self.store).ingest(feed.id, content).await;

        tracing::info!(
            feed_id = feed.id,
            items = items,
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped.len(),
            "Feed ingested"
        );

        Ok(CycleOutcome::Ingested { feed, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::testing::{feed_with, MemoryStore, StubFetcher};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// Clock that advances one second per reading
    fn ticking_clock() -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
        let tick = Arc::new(AtomicI64::new(0));
        move || at(tick.fetch_add(1, Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_never_fetched_feed_goes_first() {
        let store = MemoryStore::new();
        let a = store.add_feed("https://a.example/rss", Some(at(-100)));
        let b = store.add_feed("https://b.example/rss", None);
        let scheduler = Scheduler::new(store, StubFetcher::ok(feed_with(&[])))
            .with_clock(ticking_clock());

        let outcome = scheduler.run_one_cycle().await.unwrap();

        match outcome {
            CycleOutcome::Ingested { feed, .. } => assert_eq!(feed.id, b),
            other => panic!("expected a fetch, got {other:?}"),
        }
        assert_eq!(scheduler.fetcher().urls(), vec!["https://b.example/rss"]);
        assert_eq!(scheduler.store().feed(b).last_fetched_at, Some(at(0)));
        assert_eq!(scheduler.store().feed(a).last_fetched_at, Some(at(-100)));
    }

    #[tokio::test]
    async fn test_rotates_through_stalest_feeds() {
        let store = MemoryStore::new();
        let f1 = store.add_feed("https://one.example/rss", Some(at(-20)));
        let f2 = store.add_feed("https://two.example/rss", Some(at(-10)));
        let scheduler = Scheduler::new(store, StubFetcher::ok(feed_with(&[])))
            .with_clock(ticking_clock());

        scheduler.run_one_cycle().await.unwrap();
        scheduler.run_one_cycle().await.unwrap();
        scheduler.run_one_cycle().await.unwrap();

        assert_eq!(
            scheduler.fetcher().urls(),
            vec![
                "https://one.example/rss",
                "https://two.example/rss",
                "https://one.example/rss",
            ]
        );
        assert_eq!(scheduler.store().feed(f1).last_fetched_at, Some(at(2)));
        assert_eq!(scheduler.store().feed(f2).last_fetched_at, Some(at(1)));
    }

    #[tokio::test]
    async fn test_cycle_ingests_items() {
        let store = MemoryStore::new();
        store.add_feed("https://blog.example/rss", None);
        let fetcher = StubFetcher::ok(feed_with(&[
            "https://blog.example/a",
            "https://blog.example/b",
        ]));
        let scheduler = Scheduler::new(store, fetcher);

        let outcome = scheduler.run_one_cycle().await.unwrap();

        let CycleOutcome::Ingested { report, .. } = outcome else {
            panic!("expected a fetch");
        };
        assert_eq!(report.inserted, 2);
        assert_eq!(
            scheduler.store().post_urls(),
            vec!["https://blog.example/a", "https://blog.example/b"]
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_still_marks_feed() {
        let store = MemoryStore::new();
        let broken = store.add_feed("https://broken.example/rss", None);
        let healthy = store.add_feed("https://healthy.example/rss", Some(at(-5)));
        let scheduler =
            Scheduler::new(store, StubFetcher::failing(503)).with_clock(ticking_clock());

        let err = scheduler.run_one_cycle().await.unwrap_err();

        assert!(matches!(
            err,
            CycleError::Fetch { feed_id, source: FetchError::HttpStatus(503), .. } if feed_id == broken
        ));
        assert_eq!(scheduler.store().feed(broken).last_fetched_at, Some(at(0)));
        assert!(scheduler.store().post_urls().is_empty());

        // The failed feed went to the back of the line
        let _ = scheduler.run_one_cycle().await;
        assert_eq!(
            scheduler.fetcher().urls().last().map(String::as_str),
            Some("https://healthy.example/rss")
        );
        assert_eq!(scheduler.store().feed(healthy).last_fetched_at, Some(at(1)));
    }

    #[tokio::test]
    async fn test_empty_store_is_idle() {
        let fetcher = StubFetcher::ok(feed_with(&[]));
        let scheduler = Scheduler::new(MemoryStore::new(), fetcher);

        let outcome = scheduler.run_one_cycle().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Idle));
        assert_eq!(scheduler.fetcher().calls(), 0);
    }

    #[tokio::test]
    async fn test_selection_failure_skips_fetch() {
        let scheduler = Scheduler::new(MemoryStore::unreachable(), StubFetcher::ok(feed_with(&[])));

        let err = scheduler.run_one_cycle().await.unwrap_err();

        assert!(matches!(err, CycleError::Selection(_)));
        assert_eq!(scheduler.fetcher().calls(), 0);
    }

    #[tokio::test]
    async fn test_clock_going_backwards_keeps_latest_mark() {
        let store = MemoryStore::new();
        let id = store.add_feed("https://a.example/rss", Some(at(100)));
        let scheduler = Scheduler::new(store, StubFetcher::ok(feed_with(&[])))
            .with_clock(|| at(0) - Duration::hours(1));

        scheduler.run_one_cycle().await.unwrap();

        assert_eq!(scheduler.store().feed(id).last_fetched_at, Some(at(100)));
    }
}
