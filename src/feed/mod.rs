//! Remote feed retrieval and parsing.
//!
//! - `dates` - normalization of item `pubDate` strings
//! - `fetcher` - the [`FeedFetcher`] seam and its HTTP implementation
//! - `parser` - RSS/RDF reading with `quick-xml`, Atom and JSON Feed via `feed-rs`

mod dates;
mod fetcher;
mod parser;

pub use dates::{normalize, DateError};
pub use fetcher::{FeedFetcher, FetchError, HttpFetcher, DEFAULT_TIMEOUT};
pub use parser::{parse_feed, FetchedFeed, FetchedItem};
