use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::from_millis;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the content store.
///
/// `MissingUrl`, `MissingKey` and `ItemNotFound` are validation errors and
/// never touch the database.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing feed URL")]
    MissingUrl,

    #[error("Missing feed ID or URL")]
    MissingKey,

    #[error("Feed not found")]
    NotFound,

    #[error("Item does not exist in feed")]
    ItemNotFound,

    /// Another process has locked the database file
    #[error("The database is locked by another process. Close it and try again.")]
    InstanceLocked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A JSON column (tags, items) could not be encoded or decoded
    #[error("Invalid JSON column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Map lock-related sqlx errors to [`StoreError::InstanceLocked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Database(err)
    }
}

pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed together with every item it has accepted.
///
/// Timestamps are `None` until the store (or a fetch) fills them in. The URL
/// is the identity of a feed: persisting a feed whose URL already exists
/// resolves to the stored row whatever `id` says.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub id: String,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// Low-water mark: entries dated before this are treated as already seen.
    pub refreshed: Option<DateTime<Utc>>,
    /// Document-level updated time reported by the feed itself.
    pub last_authored: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: String,
    pub url: String,
    /// Last HTTP validator returned by the server; empty if none.
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Sorted by date, newest first, after every fetch.
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

impl Feed {
    /// Convenience constructor for a feed known only by URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Lookup key for this feed, preferring the ID over the URL.
    pub fn key(&self) -> Result<FeedKey<'_>, StoreError> {
        FeedKey::from_parts(&self.id, &self.url)
    }

    pub fn get_item(&self, id: &str) -> Option<&FeedItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Remove an item from the in-memory list. Persist the feed to make it stick.
    pub fn delete_item(&mut self, id: &str) -> Result<FeedItem, StoreError> {
        let position = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or(StoreError::ItemNotFound)?;
        Ok(self.items.remove(position))
    }
}

/// One accepted entry of a feed, stored inside the feed row's `items` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub date: DateTime<Utc>,
    /// Plain text, markup already stripped
    pub content: String,
}

/// How a feed row is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKey<'a> {
    Id(&'a str),
    Url(&'a str),
}

impl<'a> FeedKey<'a> {
    /// Build a key from possibly-empty parts. The ID wins when both are set.
    pub fn from_parts(id: &'a str, url: &'a str) -> Result<Self, StoreError> {
        if !id.is_empty() {
            Ok(FeedKey::Id(id))
        } else if !url.is_empty() {
            Ok(FeedKey::Url(url))
        } else {
            Err(StoreError::MissingKey)
        }
    }

    pub(crate) fn column_and_value(self) -> (&'static str, &'a str) {
        match self {
            FeedKey::Id(id) => ("id", id),
            FeedKey::Url(url) => ("url", url),
        }
    }
}

/// Filters for [`Database::list_feeds`](super::Database::list_feeds).
#[derive(Debug, Clone)]
pub struct FeedListOptions {
    /// Substring matched against title or URL. Empty means no filter.
    pub search: String,
    /// Tag queries; `-tag` excludes, `tag` requires.
    pub tags: Vec<String>,
    /// Only feeds whose `refreshed` is strictly earlier than this.
    pub not_refreshed_since: Option<DateTime<Utc>>,
    /// Page size. Negative means unlimited.
    pub limit: i64,
    pub offset: i64,
}

impl Default for FeedListOptions {
    fn default() -> Self {
        Self {
            search: String::new(),
            tags: Vec::new(),
            not_refreshed_since: None,
            limit: 50,
            offset: 0,
        }
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// Column list matching [`FeedDbRow`].
pub(crate) const FEED_COLUMNS: &str =
    "id, created, updated, refreshed, last_authored, title, url, etag, tags, items";

/// Raw `feeds` row; timestamps are Unix milliseconds, tags/items are JSON.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: String,
    pub created: i64,
    pub updated: i64,
    pub refreshed: i64,
    pub last_authored: i64,
    pub title: String,
    pub url: String,
    pub etag: String,
    pub tags: String,
    pub items: String,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Result<Feed, StoreError> {
        Ok(Feed {
            id: self.id,
            created: from_millis(self.created),
            updated: from_millis(self.updated),
            refreshed: from_millis(self.refreshed),
            last_authored: from_millis(self.last_authored),
            title: self.title,
            url: self.url,
            etag: self.etag,
            tags: serde_json::from_str(&self.tags)?,
            items: serde_json::from_str(&self.items)?,
        })
    }
}

// ============================================================================
// Search
// ============================================================================

/// Tables that carry a full-text shadow index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchIndex {
    Bookmarks,
    Thoughts,
}

impl SearchIndex {
    pub const ALL: [SearchIndex; 2] = [SearchIndex::Bookmarks, SearchIndex::Thoughts];

    pub fn table(self) -> &'static str {
        match self {
            SearchIndex::Bookmarks => "bookmarks",
            SearchIndex::Thoughts => "thoughts",
        }
    }

    pub fn fts_table(self) -> &'static str {
        match self {
            SearchIndex::Bookmarks => "bookmarks_fts",
            SearchIndex::Thoughts => "thoughts_fts",
        }
    }

    /// Thoughts have no URL column.
    pub(crate) fn url_column(self) -> &'static str {
        match self {
            SearchIndex::Bookmarks => "t.url",
            SearchIndex::Thoughts => "NULL",
        }
    }
}

impl std::str::FromStr for SearchIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bookmarks" | "bookmark" => Ok(SearchIndex::Bookmarks),
            "thoughts" | "thought" => Ok(SearchIndex::Thoughts),
            other => Err(format!("unknown index '{other}' (expected bookmarks or thoughts)")),
        }
    }
}

/// A row matched by [`Database::search`](super::Database::search).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str) -> FeedItem {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        FeedItem {
            id: id.to_string(),
            created: ts,
            updated: ts,
            title: format!("Item {id}"),
            url: format!("https://example.com/{id}"),
            date: ts,
            content: String::new(),
        }
    }

    #[test]
    fn test_key_prefers_id() {
        let feed = Feed {
            id: "abc".into(),
            url: "https://example.com/feed.xml".into(),
            ..Feed::default()
        };
        assert_eq!(feed.key().unwrap(), FeedKey::Id("abc"));
    }

    #[test]
    fn test_key_falls_back_to_url() {
        let feed = Feed::with_url("https://example.com/feed.xml");
        assert_eq!(
            feed.key().unwrap(),
            FeedKey::Url("https://example.com/feed.xml")
        );
    }

    #[test]
    fn test_key_missing() {
        assert!(matches!(
            Feed::default().key(),
            Err(StoreError::MissingKey)
        ));
    }

    #[test]
    fn test_get_and_delete_item() {
        let mut feed = Feed {
            items: vec![item("a"), item("b"), item("c")],
            ..Feed::with_url("https://example.com/feed.xml")
        };

        assert_eq!(feed.get_item("b").map(|i| i.title.as_str()), Some("Item b"));
        assert!(feed.get_item("zzz").is_none());

        let removed = feed.delete_item("b").unwrap();
        assert_eq!(removed.id, "b");
        let ids: Vec<_> = feed.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);

        assert!(matches!(
            feed.delete_item("b"),
            Err(StoreError::ItemNotFound)
        ));
    }

    #[test]
    fn test_lock_message_detection() {
        assert!(is_lock_message("error returned from database: database is locked"));
        assert!(is_lock_message("(code: 14) unable to open database file"));
        assert!(!is_lock_message("no such table: feeds"));
    }

    #[test]
    fn test_search_index_from_str() {
        assert_eq!("Bookmarks".parse::<SearchIndex>(), Ok(SearchIndex::Bookmarks));
        assert_eq!("thought".parse::<SearchIndex>(), Ok(SearchIndex::Thoughts));
        assert!("feeds".parse::<SearchIndex>().is_err());
    }
}
