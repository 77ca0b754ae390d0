use anyhow::Result;

use super::schema::Database;
use super::types::{SearchHit, SearchIndex, StoreError};

// ============================================================================
// FTS5 Query Validation
// ============================================================================

const MAX_QUERY_LENGTH: usize = 256;
const MAX_WILDCARDS: usize = 3;
const MAX_OR_OPERATORS: usize = 5;
const MAX_PARENTHESES: usize = 5;
const MAX_AND_OPERATORS: usize = 10;

/// Maximum number of hits returned by a single search
const MAX_HITS: i64 = 500;

/// Reject FTS5 queries whose wildcard/boolean expansion could get expensive.
fn validate_fts_query(query: &str) -> Result<()> {
    if query.len() > MAX_QUERY_LENGTH {
        anyhow::bail!(
            "Search query exceeds maximum length of {} characters",
            MAX_QUERY_LENGTH
        );
    }

    if query.matches('*').count() > MAX_WILDCARDS {
        anyhow::bail!(
            "Search query contains too many wildcards (max {})",
            MAX_WILDCARDS
        );
    }

    let upper = query.to_uppercase();
    if upper.matches(" OR ").count() > MAX_OR_OPERATORS {
        anyhow::bail!(
            "Search query contains too many OR operators (max {})",
            MAX_OR_OPERATORS
        );
    }
    if upper.matches(" AND ").count() > MAX_AND_OPERATORS {
        anyhow::bail!(
            "Search query contains too many AND operators (max {})",
            MAX_AND_OPERATORS
        );
    }

    let open = query.chars().filter(|&c| c == '(').count();
    let close = query.chars().filter(|&c| c == ')').count();
    if open > MAX_PARENTHESES {
        anyhow::bail!(
            "Search query contains too many parentheses (max {})",
            MAX_PARENTHESES
        );
    }
    if open != close {
        anyhow::bail!("Search query has unbalanced parentheses");
    }

    Ok(())
}

impl Database {
    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Full-text search over one of the shadow indexes, best match first.
    ///
    /// Queries that FTS5 cannot parse fall back to a `LIKE` scan of title
    /// and content.
    pub async fn search(&self, index: SearchIndex, query: &str) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        validate_fts_query(query)?;

        let table = index.table();
        let fts = index.fts_table();
        let url = index.url_column();

        let fts_result = sqlx::query_as::<_, SearchHit>(&format!(
            r#"
            SELECT t.id, t.title, {url} AS url
            FROM {table} t
            INNER JOIN {fts} ON t.rowid = {fts}.rowid
            WHERE {fts} MATCH ?
            ORDER BY {fts}.rank
            LIMIT ?
        "#
        ))
        .bind(query)
        .bind(MAX_HITS)
        .fetch_all(&self.pool)
        .await;

        match fts_result {
            Ok(hits) => Ok(hits),
            Err(e) => {
                tracing::warn!(error = %e, index = table, query = %query, "FTS5 search failed, falling back to LIKE");
                let pattern = format!("%{}%", query);
                let hits = sqlx::query_as::<_, SearchHit>(&format!(
                    r#"
                    SELECT t.id, t.title, {url} AS url
                    FROM {table} t
                    WHERE t.title LIKE ?1 OR t.content LIKE ?1
                    ORDER BY t.updated DESC
                    LIMIT ?2
                "#
                ))
                .bind(&pattern)
                .bind(MAX_HITS)
                .fetch_all(&self.pool)
                .await?;
                Ok(hits)
            }
        }
    }

    // ========================================================================
    // FTS5 Maintenance Operations
    // ========================================================================

    /// Check that the shadow index matches its base table exactly.
    ///
    /// Runs FTS5 `integrity-check` against the external content table; any
    /// orphaned or missing entry makes it fail with a corruption error, which
    /// is reported as `Ok(false)`. Every other failure is an error.
    pub async fn check_fts_consistency(&self, index: SearchIndex) -> Result<bool, StoreError> {
        let fts = index.fts_table();
        let result = sqlx::query(&format!(
            "INSERT INTO {fts}({fts}, rank) VALUES('integrity-check', 1)"
        ))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(index = fts, "FTS5 index is consistent");
                Ok(true)
            }
            Err(sqlx::Error::Database(db_err)) if is_corruption(db_err.code().as_deref()) => {
                tracing::warn!(index = fts, error = %db_err, "FTS5 integrity check failed");
                Ok(false)
            }
            Err(e) => {
                tracing::error!(index = fts, error = %e, "Error running FTS5 integrity check");
                Err(e.into())
            }
        }
    }

    /// Rebuild a shadow index from its base table, returning the row count.
    pub async fn rebuild_fts_index(&self, index: SearchIndex) -> Result<usize, StoreError> {
        let fts = index.fts_table();
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("INSERT INTO {fts}({fts}) VALUES('rebuild')"))
            .execute(&mut *tx)
            .await?;

        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", index.table()))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(index = fts, rows = count, "FTS5 index rebuilt");
        Ok(count as usize)
    }
}

/// SQLITE_CORRUPT and its extended codes, SQLITE_CORRUPT_VTAB among them.
fn is_corruption(code: Option<&str>) -> bool {
    const SQLITE_CORRUPT: i32 = 11;
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| c & 0xff == SQLITE_CORRUPT)
}
