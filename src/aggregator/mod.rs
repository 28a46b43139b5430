//! The polling core: pick the stalest feed, fetch it, store its new posts.
//!
//! [`Scheduler::run_one_cycle`] performs a single cycle and [`Poller`] repeats
//! it on a fixed interval until shutdown.

mod driver;
mod ingest;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::{shutdown_on_ctrl_c, PollStats, Poller};
pub use ingest::{ingest, IngestReport, ItemError, PostIngestor};
pub use scheduler::{Clock, CycleError, CycleOutcome, Scheduler};
