use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::scheduler::{CycleError, CycleOutcome, Scheduler};
use crate::feed::FeedFetcher;
use crate::storage::FeedStore;

/// Counters accumulated over one [`Poller::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub idle_cycles: u64,
    pub failed_cycles: u64,
    pub posts_inserted: u64,
}

/// Runs one polling cycle per interval until told to stop.
pub struct Poller<S, F> {
    scheduler: Scheduler<S, F>,
    interval: Duration,
}

impl<S: FeedStore, F: FeedFetcher> Poller<S, F> {
    pub fn new(scheduler: Scheduler<S, F>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    pub fn scheduler(&self) -> &Scheduler<S, F> {
        &self.scheduler
    }

    /// Poll until `shutdown` turns `true` or its sender is dropped.
    ///
    /// The first cycle starts immediately. Shutdown is only observed between
    /// cycles; a cycle already in flight runs to completion. A slow cycle
    /// delays the next tick instead of causing a burst of catch-up cycles.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> PollStats {
        tracing::info!(interval = ?self.interval, "Collecting feeds");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = PollStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            self.cycle(&mut stats).await;
        }

        tracing::info!(
            cycles = stats.cycles,
            failed = stats.failed_cycles,
            inserted = stats.posts_inserted,
            "Stopped collecting feeds"
        );
        stats
    }

    async fn cycle(&self, stats: &mut PollStats) {
        stats.cycles += 1;
        match self.scheduler.run_one_cycle().await {
            Ok(CycleOutcome::Idle) => {
                stats.idle_cycles += 1;
                tracing::info!("No feeds registered; waiting for the next interval");
            }
            Ok(CycleOutcome::Ingested { report, .. }) => {
                stats.posts_inserted += report.inserted as u64;
            }
            Err(e @ CycleError::Selection(_)) => {
                stats.failed_cycles += 1;
                tracing::error!(error = %e, "Polling cycle failed");
            }
            Err(e @ CycleError::Fetch { .. }) => {
                stats.failed_cycles += 1;
                tracing::warn!(error = %e, "Polling cycle failed");
            }
        }
    }
}

/// A shutdown channel flipped to `true` on the first Ctrl-C.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupt received; finishing the current cycle"),
            Err(e) => tracing::warn!(error = %e, "Could not listen for Ctrl-C"),
        }
        let _ = tx.send(true);
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::testing::{feed_with, MemoryStore, StubFetcher};
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_one_cycle_per_interval_until_shutdown() {
        let store = MemoryStore::new();
        store.add_feed("https://a.example/rss", None);
        let poller = Poller::new(
            Scheduler::new(store, StubFetcher::ok(feed_with(&[]))),
            Duration::from_secs(60),
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { poller.run(rx).await });
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        // Ticks at 0s, 60s and 120s
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.failed_cycles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_in_flight_completes_before_stopping() {
        let store = MemoryStore::new();
        store.add_feed("https://slow.example/rss", None);
        let fetcher = StubFetcher::ok(feed_with(&["https://slow.example/post"]))
            .delayed(Duration::from_secs(10));
        let poller = Poller::new(Scheduler::new(store, fetcher), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let stats = poller.run(rx).await;
            (stats, poller)
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        let (stats, poller) = handle.await.unwrap();

        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.posts_inserted, 1);
        assert_eq!(
            poller.scheduler().store().post_urls(),
            vec!["https://slow.example/post"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_do_not_stop_polling() {
        let store = MemoryStore::new();
        store.add_feed("https://down.example/rss", None);
        store.add_feed("https://also-down.example/rss", None);
        let poller = Poller::new(
            Scheduler::new(store, StubFetcher::failing(500)),
            Duration::from_secs(30),
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let stats = poller.run(rx).await;
            (stats, poller)
        });
        tokio::time::sleep(Duration::from_secs(75)).await;
        tx.send(true).unwrap();
        let (stats, poller) = handle.await.unwrap();

        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.failed_cycles, 3);
        assert_eq!(
            poller.scheduler().fetcher().urls(),
            vec![
                "https://down.example/rss",
                "https://also-down.example/rss",
                "https://down.example/rss",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_store_keeps_polling() {
        let poller = Poller::new(
            Scheduler::new(MemoryStore::new(), StubFetcher::ok(feed_with(&[]))),
            Duration::from_secs(10),
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { poller.run(rx).await });
        tokio::time::sleep(Duration::from_secs(25)).await;
        drop(tx);
        let stats = handle.await.unwrap();

        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.idle_cycles, 3);
    }

    #[tokio::test]
    async fn test_already_shut_down_runs_nothing() {
        let poller = Poller::new(
            Scheduler::new(MemoryStore::new(), StubFetcher::ok(feed_with(&[]))),
            Duration::from_secs(1),
        );
        let (_tx, rx) = watch::channel(true);

        let stats = poller.run(rx).await;

        assert_eq!(stats, PollStats::default());
    }
}
