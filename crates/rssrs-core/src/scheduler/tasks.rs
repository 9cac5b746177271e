use chrono::Utc;

use crate::backend::Backend;
use crate::feed::{Feed, FeedFetcher};
use crate::sync::FeedDirectory;
use crate::Result;

/// Outcome of one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub attempted: u32,
    pub failed: u32,
    pub new_items: u32,
}

/// Fetch one feed, store its new items and record the outcome.
/// A fetch failure is recorded on the feed and then returned.
pub async fn refresh_feed(backend: &Backend, fetcher: &FeedFetcher, feed: &Feed) -> Result<u32> {
    tracing::info!("Refreshing feed: {}", feed.name);

    match fetcher.fetch(&feed.url, feed.id).await {
        Ok(parsed) => {
            let created = backend.store_items(feed.id, &parsed.items).await?;
            backend.record_fetch(feed.id, true).await?;
            tracing::debug!("Feed '{}': {} new items", feed.name, created);
            Ok(created)
        }
        Err(e) => {
            tracing::warn!("Failed to fetch feed '{}': {}", feed.name, e);
            backend.record_fetch(feed.id, false).await?;
            Err(e)
        }
    }
}

/// Refresh feeds whose interval has elapsed, or every feed when `force` is set
pub async fn refresh_feeds(
    backend: &Backend,
    fetcher: &FeedFetcher,
    force: bool,
) -> Result<RefreshSummary> {
    let now = Utc::now();
    let feeds = backend.list_feeds().await?;
    let mut summary = RefreshSummary::default();

    for feed in feeds.iter().filter(|f| force || f.should_fetch(now)) {
        summary.attempted += 1;
        match refresh_feed(backend, fetcher, feed).await {
            Ok(created) => summary.new_items += created,
            Err(_) => summary.failed += 1,
        }
    }

    if summary.attempted > 0 {
        tracing::info!(
            "Refreshed {} feeds: {} new items, {} failed",
            summary.attempted,
            summary.new_items,
            summary.failed
        );
    }

    Ok(summary)
}
