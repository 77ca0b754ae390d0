//! Content store: feeds with their embedded items, plus the bookmark and
//! thought tables and their full-text shadow indexes.

mod feeds;
mod schema;
mod search;
mod tags;
mod types;

pub use schema::Database;
pub use tags::{matches_all, TagFilter};
pub use types::{
    Feed, FeedItem, FeedKey, FeedListOptions, SearchHit, SearchIndex, StoreError,
};
