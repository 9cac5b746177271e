use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::feed::{Feed, Page, Scope};
use crate::Result;

/// An unread count together with the bus sequence number it reflects.
/// Every count-changing event numbered `seq` or lower is already included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSnapshot {
    pub unread_count: u32,
    pub seq: u64,
}

/// Query and write interface of the item store as seen by the sync core
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// One page of items for `scope`, starting after `cursor`
    async fn get_page(&self, scope: &Scope, cursor: Option<&str>, limit: u32) -> Result<Page>;

    /// Unread items in a feed, or across all feeds for `None`
    async fn get_unread_count(&self, feed_id: Option<i64>) -> Result<u32>;

    /// Unread count with the sequence number it was read at. Sources
    /// without a numbered event stream report 0, which orders before
    /// every event.
    async fn unread_snapshot(&self, feed_id: Option<i64>) -> Result<UnreadSnapshot> {
        Ok(UnreadSnapshot {
            unread_count: self.get_unread_count(feed_id).await?,
            seq: 0,
        })
    }

    /// Set one item's read state; `false` when the item does not exist
    async fn mark_item_read(&self, id: i64, unread: bool) -> Result<bool>;

    /// Mark a feed (or every feed) as read
    async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<bool>;
}

/// Feed list and watch list as seen by the shared stores
#[async_trait]
pub trait FeedDirectory: Send + Sync {
    async fn list_feeds(&self) -> Result<Vec<Feed>>;

    async fn watchlist(&self) -> Result<Vec<String>>;
}
