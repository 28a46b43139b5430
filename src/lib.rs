//! gator: a command-line RSS aggregator.
//!
//! Users register feeds; `gator agg` polls them one at a time, stalest first,
//! and stores each new item as a post keyed by its URL.

pub mod aggregator;
pub mod commands;
pub mod config;
pub mod context;
pub mod feed;
pub mod storage;
pub mod util;
