//! Feed synchronization: fetching, parsing, sanitizing and merging.
//!
//! - [`parser`] decodes RSS/Atom with `feed-rs`
//! - [`sanitize`] strips markup from item bodies
//! - [`merge`] applies the refreshed/now window and keeps items sorted
//! - [`fetcher`] performs the conditional GET
//! - [`refresh`] ties a fetch to a persist, singly or in batches
//!
//! # Example
//!
//! ```ignore
//! use feedshelf::feed::{refresh, Fetcher, FetcherConfig};
//! use feedshelf::storage::{Database, FeedKey};
//!
//! let db = Database::open("feeds.db").await?;
//! let fetcher = Fetcher::new(FetcherConfig::default())?;
//! let mut feed = db.get_feed(FeedKey::Url("https://example.com/feed.xml")).await?;
//! refresh(&db, &fetcher, &mut feed).await?;
//! ```

pub mod fetcher;
pub mod merge;
pub mod parser;
pub mod refresh;
pub mod sanitize;

pub use fetcher::{FetchError, FetchStatus, Fetcher, FetcherConfig};
pub use merge::{merge, MergeOutcome};
pub use parser::{parse_feed, ParsedEntry, ParsedFeed};
pub use refresh::{refresh, refresh_all, RefreshError, RefreshResult};
pub use sanitize::sanitize;
