//! Store-backed item source that announces every write on the event bus
//!
//! Writes that change unread counts commit and publish while holding the
//! write side of `counts`; an unread snapshot reads its count and the bus
//! sequence number under the read side, so the number names exactly the
//! events the count includes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::events::{
    Channel, EventBus, FeedsChangedEvent, ItemReadEvent, UnreadCountEvent, WatchListChangedEvent,
    FEEDS_CHANGED, FEED_NEW, FEED_UNREAD, ITEM_UNREAD, WATCHLIST_CHANGED,
};
use crate::feed::{Feed, NewFeed, NewItem, Page, Scope};
use crate::storage::{Database, FeedRepository, ItemRepository, SettingsRepository};
use crate::sync::{FeedDirectory, ItemSource, UnreadSnapshot};
use crate::{Error, Result};

/// The local store plus the bus its changes are published on
#[derive(Clone)]
pub struct Backend {
    db: Database,
    bus: EventBus,
    counts: Arc<RwLock<()>>,
}

impl Backend {
    pub fn new(db: Database, bus: EventBus) -> Self {
        Self {
            db,
            bus,
            counts: Arc::new(RwLock::new(())),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish after a committed write; a failed publish does not undo the write
    fn emit<T: Serialize>(&self, channel: Channel<T>, payload: &T) {
        if let Err(e) = self.bus.publish(channel, payload) {
            tracing::warn!("Failed to publish on '{}': {}", channel.name(), e);
        }
    }

    /// Publish fresh absolute counters for a feed and for the aggregate
    async fn emit_unread_counts(&self, feed_id: Option<i64>) -> Result<()> {
        let items = ItemRepository::new(&self.db);

        if let Some(feed_id) = feed_id {
            let count = items.unread_count(Some(feed_id)).await?;
            self.emit(FEED_UNREAD, &UnreadCountEvent::new(Some(feed_id), i64::from(count)));
        }

        let total = items.unread_count(None).await?;
        self.emit(FEED_UNREAD, &UnreadCountEvent::new(None, i64::from(total)));
        Ok(())
    }

    pub async fn find_feed(&self, name: &str) -> Result<Option<Feed>> {
        FeedRepository::new(&self.db).find_by_name(name).await
    }

    pub async fn feed(&self, id: i64) -> Result<Option<Feed>> {
        FeedRepository::new(&self.db).find_by_id(id).await
    }

    pub async fn add_feed(&self, new_feed: &NewFeed) -> Result<Feed> {
        let feed = FeedRepository::new(&self.db).create(new_feed).await?;
        tracing::info!("Subscribed to '{}' ({})", feed.name, feed.url);

        self.emit(FEEDS_CHANGED, &FeedsChangedEvent { feed_id: Some(feed.id) });
        Ok(feed)
    }

    /// Delete a feed with its items; `false` when it did not exist
    pub async fn delete_feed(&self, id: i64) -> Result<bool> {
        let _counts = self.counts.write().await;
        let deleted = FeedRepository::new(&self.db).delete(id).await?;
        if deleted {
            tracing::info!("Unsubscribed feed {}", id);
            self.emit(FEEDS_CHANGED, &FeedsChangedEvent { feed_id: Some(id) });
            self.emit_unread_counts(None).await?;
        }
        Ok(deleted)
    }

    /// Rename a feed or point it at another URL; unset fields are kept
    pub async fn update_feed(&self, id: i64, name: Option<&str>, url: Option<&str>) -> Result<Feed> {
        let repo = FeedRepository::new(&self.db);
        let missing = || Error::FeedNotFound(id.to_string());
        let current = repo.find_by_id(id).await?.ok_or_else(missing)?;

        let name = name.unwrap_or(&current.name);
        let url = url.unwrap_or(&current.url);
        if !repo.update(id, name, url).await? {
            return Err(missing());
        }
        let feed = repo.find_by_id(id).await?.ok_or_else(missing)?;
        tracing::info!("Updated feed {}: '{}' ({})", id, feed.name, feed.url);

        self.emit(FEEDS_CHANGED, &FeedsChangedEvent { feed_id: Some(id) });
        Ok(feed)
    }

    /// Store fetched items and announce how many were new
    pub async fn store_items(&self, feed_id: i64, items: &[NewItem]) -> Result<u32> {
        let _counts = self.counts.write().await;
        let created = ItemRepository::new(&self.db).insert_many(items).await?;

        if created > 0 {
            tracing::info!("Feed {}: {} new items", feed_id, created);
            let delta = i64::from(created);
            self.emit(FEED_NEW, &UnreadCountEvent::new(Some(feed_id), delta));
            self.emit(FEED_NEW, &UnreadCountEvent::new(None, delta));
        }

        Ok(created)
    }

    pub async fn record_fetch(&self, feed_id: i64, ok: bool) -> Result<()> {
        FeedRepository::new(&self.db).record_fetch(feed_id, ok).await?;
        self.emit(FEEDS_CHANGED, &FeedsChangedEvent { feed_id: Some(feed_id) });
        Ok(())
    }

    pub async fn set_watchlist(&self, keywords: &[String]) -> Result<Vec<String>> {
        let stored = SettingsRepository::new(&self.db)
            .set_watchlist(keywords)
            .await?;
        self.emit(WATCHLIST_CHANGED, &WatchListChangedEvent {});
        Ok(stored)
    }
}

#[async_trait]
impl ItemSource for Backend {
    async fn get_page(&self, scope: &Scope, cursor: Option<&str>, limit: u32) -> Result<Page> {
        ItemRepository::new(&self.db).page(scope, cursor, limit).await
    }

    async fn get_unread_count(&self, feed_id: Option<i64>) -> Result<u32> {
        ItemRepository::new(&self.db).unread_count(feed_id).await
    }

    async fn unread_snapshot(&self, feed_id: Option<i64>) -> Result<UnreadSnapshot> {
        let _counts = self.counts.read().await;
        let unread_count = ItemRepository::new(&self.db).unread_count(feed_id).await?;
        Ok(UnreadSnapshot {
            unread_count,
            seq: self.bus.last_seq(),
        })
    }

    async fn mark_item_read(&self, id: i64, unread: bool) -> Result<bool> {
        let _counts = self.counts.write().await;
        let Some(feed_id) = ItemRepository::new(&self.db).set_unread(id, unread).await? else {
            tracing::debug!("Item {} not found, nothing to mark", id);
            return Ok(false);
        };

        self.emit(ITEM_UNREAD, &ItemReadEvent::item(id, unread));
        self.emit_unread_counts(Some(feed_id)).await?;
        Ok(true)
    }

    async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<bool> {
        let _counts = self.counts.write().await;
        let changed = ItemRepository::new(&self.db).mark_all_read(feed_id).await?;
        tracing::debug!("Marked {} items read", changed);

        self.emit(ITEM_UNREAD, &ItemReadEvent::all_in_feed(feed_id, false));
        self.emit_unread_counts(feed_id).await?;
        Ok(true)
    }
}

#[async_trait]
impl FeedDirectory for Backend {
    async fn list_feeds(&self) -> Result<Vec<Feed>> {
        FeedRepository::new(&self.db).list_all().await
    }

    async fn watchlist(&self) -> Result<Vec<String>> {
        SettingsRepository::new(&self.db).watchlist().await
    }
}
