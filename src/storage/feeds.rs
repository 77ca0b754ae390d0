use chrono::Duration;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::schema::{Database, NOW_MILLIS};
use super::tags::push_tag_filters;
use super::types::{Feed, FeedDbRow, FeedKey, FeedListOptions, StoreError, FEED_COLUMNS};
use crate::util::{from_millis, now, to_millis};

/// How far back a brand-new feed's first fetch reaches.
const INITIAL_BACKFILL_DAYS: i64 = 7;

/// `(id, created, last_authored)` as written by an insert or update.
type WrittenRow = (String, i64, i64);

impl Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// List feeds matching `options`, newest-authored first, with the total
    /// number of matches before paging.
    ///
    /// A storage failure is logged and reported as an empty page with a zero
    /// count. Use [`try_list_feeds`](Self::try_list_feeds) to tell the two apart.
    pub async fn list_feeds(&self, options: &FeedListOptions) -> (Vec<Feed>, i64) {
        match self.try_list_feeds(options).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "Error fetching feeds");
                (Vec::new(), 0)
            }
        }
    }

    /// Like [`list_feeds`](Self::list_feeds) but surfaces storage errors.
    pub async fn try_list_feeds(
        &self,
        options: &FeedListOptions,
    ) -> Result<(Vec<Feed>, i64), StoreError> {
        // Count and page read from the same snapshot
        let mut tx = self.pool.begin().await?;

        let mut count_query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(id) FROM feeds WHERE 1 = 1");
        push_feed_filters(&mut count_query, options);
        let (total,): (i64,) = count_query.build_query_as().fetch_one(&mut *tx).await?;

        let mut page_query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {FEED_COLUMNS} FROM feeds WHERE 1 = 1"));
        push_feed_filters(&mut page_query, options);
        page_query
            .push(" ORDER BY last_authored DESC LIMIT ")
            .push_bind(options.limit)
            .push(" OFFSET ")
            .push_bind(options.offset);
        let rows: Vec<FeedDbRow> = page_query.build_query_as().fetch_all(&mut *tx).await?;

        tx.commit().await?;

        let feeds = rows
            .into_iter()
            .map(FeedDbRow::into_feed)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(total = total, returned = feeds.len(), "Listed feeds");
        Ok((feeds, total))
    }

    /// Load a single feed by ID or URL.
    pub async fn get_feed(&self, key: FeedKey<'_>) -> Result<Feed, StoreError> {
        let (column, value) = key.column_and_value();
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE {column} = ? LIMIT 1");

        let row: Option<FeedDbRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(StoreError::NotFound)?.into_feed()
    }

    // ========================================================================
    // Feed Writes
    // ========================================================================

    /// Insert or update `feed`, using its URL as the identity.
    ///
    /// Defaults are filled in first: an empty title becomes the URL, a
    /// missing `created` becomes now, a missing `refreshed` becomes now minus
    /// seven days (so the first fetch backfills a week), and duplicate tags
    /// are dropped. `updated` is always set to now.
    ///
    /// If a row with the same URL exists its ID and creation time are adopted
    /// whatever the caller passed. If none exists but `feed.id` names a stored
    /// row, that row is updated (the caller changed the URL). Otherwise a new
    /// row with a fresh ID is inserted. The lookup and the write run in one
    /// `BEGIN IMMEDIATE` transaction, so concurrent writers queue on the
    /// database's busy timeout and each later one merges into the row the
    /// first created. The insert also falls back to an update on a URL
    /// conflict, so the same URL can never produce two rows.
    ///
    /// A `None` `last_authored` never overwrites a stored value.
    ///
    /// On success `feed.id`, `feed.created` and `feed.last_authored` reflect
    /// the stored row.
    pub async fn persist_feed(&self, feed: &mut Feed) -> Result<(), StoreError> {
        if feed.url.is_empty() {
            return Err(StoreError::MissingUrl);
        }

        let now = now();

        if feed.title.is_empty() {
            feed.title = feed.url.clone();
        }
        if feed.created.is_none() {
            feed.created = Some(now);
        }
        if feed.refreshed.is_none() {
            feed.refreshed = Some(now - Duration::days(INITIAL_BACKFILL_DAYS));
        }
        dedup_tags(&mut feed.tags);
        feed.updated = Some(now);

        let tags = serde_json::to_string(&feed.tags)?;
        let items = serde_json::to_string(&feed.items)?;

        // Write lock before the lookup, so concurrent writers wait on busy_timeout
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM feeds WHERE url = ? LIMIT 1")
                .bind(&feed.url)
                .fetch_optional(&mut *tx)
                .await?;

        let target_id = match existing {
            Some((id,)) => Some(id),
            None if !feed.id.is_empty() => Some(feed.id.clone()),
            None => None,
        };

        let updated: Option<WrittenRow> = match &target_id {
            Some(id) => {
                sqlx::query_as(
                    r#"
                    UPDATE feeds SET
                        etag = ?, items = ?, last_authored = COALESCE(?, last_authored),
                        refreshed = ?, tags = ?, title = ?, updated = ?, url = ?
                    WHERE id = ?
                    RETURNING id, created, last_authored
                "#,
                )
                .bind(&feed.etag)
                .bind(&items)
                .bind(feed.last_authored.map(to_millis))
                .bind(feed.refreshed.map(to_millis))
                .bind(&tags)
                .bind(&feed.title)
                .bind(feed.updated.map(to_millis))
                .bind(&feed.url)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
            }
            None => None,
        };

        let (row, inserted) = match updated {
            Some(row) => (row, false),
            None => {
                let row = insert_feed_row(&mut tx, feed, &tags, &items)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, url = %feed.url, "Error creating feed");
                        e
                    })?;
                (row, true)
            }
        };

        tx.commit().await?;

        let (id, created, last_authored) = row;
        feed.id = id;
        feed.created = from_millis(created);
        feed.last_authored = from_millis(last_authored);

        tracing::info!(
            id = %feed.id,
            url = %feed.url,
            inserted = inserted,
            items = feed.items.len(),
            "Persisted feed"
        );

        Ok(())
    }

    /// Delete the feed addressed by `key`, returning the number of rows removed.
    ///
    /// Deleting a feed that does not exist is not an error.
    pub async fn delete_feed(&self, key: FeedKey<'_>) -> Result<u64, StoreError> {
        let (column, value) = key.column_and_value();
        let sql = format!("DELETE FROM feeds WHERE {column} = ?");

        let result = sqlx::query(&sql)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, key = %value, "Error deleting feed");
                e
            })?;

        tracing::info!(key = %value, removed = result.rows_affected(), "Feed deleted");
        Ok(result.rows_affected())
    }
}

/// Insert `feed` under a fresh UUID, merging into the existing row on a URL
/// conflict. A `None` `last_authored` defaults to now on insert and keeps the
/// stored value on conflict.
async fn insert_feed_row(
    conn: &mut SqliteConnection,
    feed: &Feed,
    tags: &str,
    items: &str,
) -> Result<WrittenRow, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let last_authored = feed.last_authored.map(to_millis);

    sqlx::query_as(&format!(
        r#"
        INSERT INTO feeds
            (id, created, updated, refreshed, last_authored, title, url, etag, tags, items)
        VALUES (?, ?, ?, ?, COALESCE(?, {now}), ?, ?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET
            etag = excluded.etag,
            items = excluded.items,
            last_authored = COALESCE(?, feeds.last_authored),
            refreshed = excluded.refreshed,
            tags = excluded.tags,
            title = excluded.title,
            updated = excluded.updated
        RETURNING id, created, last_authored
    "#,
        now = NOW_MILLIS
    ))
    .bind(&id)
    .bind(feed.created.map(to_millis))
    .bind(feed.updated.map(to_millis))
    .bind(feed.refreshed.map(to_millis))
    .bind(last_authored)
    .bind(&feed.title)
    .bind(&feed.url)
    .bind(&feed.etag)
    .bind(tags)
    .bind(items)
    .bind(last_authored)
    .fetch_one(conn)
    .await
}

fn push_feed_filters(builder: &mut QueryBuilder<'_, Sqlite>, options: &FeedListOptions) {
    if !options.search.is_empty() {
        let pattern = format!("%{}%", options.search);
        builder
            .push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR url LIKE ")
            .push_bind(pattern)
            .push(")");
    }

    if let Some(cutoff) = options.not_refreshed_since {
        builder.push(" AND refreshed < ").push_bind(to_millis(cutoff));
    }

    push_tag_filters(builder, "feeds.tags", &options.tags);
}

/// Drop empty and repeated tags, keeping first occurrences in order.
fn dedup_tags(tags: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    tags.retain(|tag| !tag.is_empty() && seen.insert(tag.clone()));
}
