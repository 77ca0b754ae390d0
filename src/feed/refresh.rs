use futures::stream::{self, StreamExt};
use thiserror::Error;

use super::fetcher::{FetchError, FetchStatus, Fetcher};
use crate::storage::{Database, Feed, StoreError};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one feed in a [`refresh_all`] batch.
///
/// `feed` holds the state after the attempt: merged and persisted on
/// success, unchanged by the fetch on failure.
#[derive(Debug)]
pub struct RefreshResult {
    pub feed: Feed,
    pub result: Result<FetchStatus, RefreshError>,
}

/// Fetch `feed` then persist it.
///
/// A 304 still persists, which bumps `updated` but leaves `refreshed` where
/// it was. Nothing is written when the fetch fails.
pub async fn refresh(
    db: &Database,
    fetcher: &Fetcher,
    feed: &mut Feed,
) -> Result<FetchStatus, RefreshError> {
    let status = fetcher.fetch(feed).await?;
    db.persist_feed(feed).await?;

    if let FetchStatus::Updated(outcome) = status {
        tracing::info!(
            id = %feed.id,
            url = %feed.url,
            items = outcome.accepted,
            "Feed refreshed"
        );
    }
    Ok(status)
}

/// Refresh a batch of distinct feeds with at most `concurrency` in flight.
///
/// Results come back in completion order, not input order. The caller must
/// not pass the same feed twice.
pub async fn refresh_all(
    db: &Database,
    fetcher: &Fetcher,
    feeds: Vec<Feed>,
    concurrency: usize,
) -> Vec<RefreshResult> {
    if feeds.is_empty() {
        return Vec::new();
    }

    let total = feeds.len();
    let results: Vec<RefreshResult> = stream::iter(feeds)
        .map(|mut feed| async move {
            let result = refresh(db, fetcher, &mut feed).await;
            if let Err(e) = &result {
                tracing::warn!(id = %feed.id, url = %feed.url, error = %e, "Feed refresh failed");
            }
            RefreshResult { feed, result }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|r| r.result.is_err()).count();
    tracing::info!(total = total, failed = failed, "Refresh batch complete");

    results
}
