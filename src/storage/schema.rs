use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, StoreError};

// ============================================================================
// Database
// ============================================================================

/// SQL expression for "now" in Unix milliseconds, used for column defaults.
pub(crate) const NOW_MILLIS: &str = "(CAST(strftime('%s', 'now') AS INTEGER) * 1000)";

/// Handle to the content store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    ///
    /// `":memory:"` gives a private in-memory database shared by every
    /// connection of this handle's pool.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process holds the
    /// database lock, `StoreError::Migration` if the schema cannot be applied.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5 seconds for a competing writer
        // before SQLITE_BUSY is returned. Every pooled connection inherits it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                StoreError::InstanceLocked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Apply the schema in a single transaction.
    ///
    /// Every statement is `IF NOT EXISTS`, so running this against an
    /// existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Feeds keep their items embedded as a JSON array
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY,
                created INTEGER NOT NULL DEFAULT {now},
                updated INTEGER NOT NULL DEFAULT {now},
                refreshed INTEGER NOT NULL DEFAULT {now},
                last_authored INTEGER NOT NULL DEFAULT {now},
                title TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL,
                etag TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                items TEXT NOT NULL DEFAULT '[]'
            )
        "#,
            now = NOW_MILLIS
        ))
        .execute(&mut *tx)
        .await?;

        // list_feeds orders by last_authored; the scheduler filters on refreshed
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_last_authored ON feeds(last_authored DESC)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_refreshed ON feeds(refreshed)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS bookmarks (
                id TEXT PRIMARY KEY,
                created INTEGER NOT NULL DEFAULT {now},
                updated INTEGER NOT NULL DEFAULT {now},
                title TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL,
                excerpt TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                archived INTEGER NOT NULL DEFAULT 0
            )
        "#,
            now = NOW_MILLIS
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS thoughts (
                id TEXT PRIMARY KEY,
                created INTEGER NOT NULL DEFAULT {now},
                updated INTEGER NOT NULL DEFAULT {now},
                title TEXT UNIQUE NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                content TEXT NOT NULL DEFAULT ''
            )
        "#,
            now = NOW_MILLIS
        ))
        .execute(&mut *tx)
        .await?;

        // Shadow indexes: external-content FTS5 tables kept in step by triggers.
        // Triggers run inside the statement's transaction, so the index row set
        // always equals the base table's.
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS bookmarks_fts
            USING fts5(title, url, content, content=bookmarks, content_rowid=rowid)
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS bookmarks_fts_insert AFTER INSERT ON bookmarks BEGIN
                INSERT INTO bookmarks_fts(rowid, title, url, content)
                VALUES (new.rowid, new.title, new.url, new.content);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS bookmarks_fts_delete AFTER DELETE ON bookmarks BEGIN
                INSERT INTO bookmarks_fts(bookmarks_fts, rowid, title, url, content)
                VALUES ('delete', old.rowid, old.title, old.url, old.content);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS bookmarks_fts_update AFTER UPDATE ON bookmarks BEGIN
                INSERT INTO bookmarks_fts(bookmarks_fts, rowid, title, url, content)
                VALUES ('delete', old.rowid, old.title, old.url, old.content);
                INSERT INTO bookmarks_fts(rowid, title, url, content)
                VALUES (new.rowid, new.title, new.url, new.content);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS thoughts_fts
            USING fts5(title, content, content=thoughts, content_rowid=rowid)
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS thoughts_fts_insert AFTER INSERT ON thoughts BEGIN
                INSERT INTO thoughts_fts(rowid, title, content)
                VALUES (new.rowid, new.title, new.content);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS thoughts_fts_delete AFTER DELETE ON thoughts BEGIN
                INSERT INTO thoughts_fts(thoughts_fts, rowid, title, content)
                VALUES ('delete', old.rowid, old.title, old.content);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS thoughts_fts_update AFTER UPDATE ON thoughts BEGIN
                INSERT INTO thoughts_fts(thoughts_fts, rowid, title, content)
                VALUES ('delete', old.rowid, old.title, old.content);
                INSERT INTO thoughts_fts(rowid, title, content)
                VALUES (new.rowid, new.title, new.content);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
