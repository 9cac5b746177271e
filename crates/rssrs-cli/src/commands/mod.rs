pub mod daemon;
pub mod edit;
pub mod items;
pub mod list;
pub mod mark;
pub mod refresh;
pub mod subscribe;
pub mod unsubscribe;
pub mod watch;
pub mod watchlist;

use anyhow::{anyhow, Result};
use rssrs_core::{feed::Feed, Backend};

/// Resolve a subscription by its local name
pub(crate) async fn feed_by_name(backend: &Backend, name: &str) -> Result<Feed> {
    backend
        .find_feed(name)
        .await?
        .ok_or_else(|| anyhow!("Feed '{}' not found. Run 'rssrs list' to see subscriptions.", name))
}
