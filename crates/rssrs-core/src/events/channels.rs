//! Named channels and their payloads

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A named channel carrying payloads of type `T`
pub struct Channel<T> {
    name: &'static str,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Channel<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Channel<T> {}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Channel").field(&self.name).finish()
    }
}

/// Item read-state changes
pub const ITEM_UNREAD: Channel<ItemReadEvent> = Channel::new("item/unread");
/// Absolute unread counter per feed (or aggregate)
pub const FEED_UNREAD: Channel<UnreadCountEvent> = Channel::new("feed/unread");
/// Newly stored items per feed (or aggregate); the count is a delta
pub const FEED_NEW: Channel<UnreadCountEvent> = Channel::new("feed/new");
/// Feed list changed (added, removed, fetch metadata updated)
pub const FEEDS_CHANGED: Channel<FeedsChangedEvent> = Channel::new("feed/changed");
/// Watch-list keywords changed
pub const WATCHLIST_CHANGED: Channel<WatchListChangedEvent> = Channel::new("watchlist/changed");

/// Read-state change of one item, or of every item when `id` is the sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReadEvent {
    pub id: i64,
    pub unread: bool,
    /// Restricts a sentinel event to one feed's items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<i64>,
}

/// Target of an [`ItemReadEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    Item(i64),
    /// Every item, or every item of one feed
    All(Option<i64>),
}

impl ItemReadEvent {
    /// Sentinel id meaning "every item"
    pub const ALL: i64 = 0;

    pub fn item(id: i64, unread: bool) -> Self {
        Self {
            id,
            unread,
            feed_id: None,
        }
    }

    pub fn all(unread: bool) -> Self {
        Self::item(Self::ALL, unread)
    }

    pub fn all_in_feed(feed_id: Option<i64>, unread: bool) -> Self {
        Self {
            feed_id,
            ..Self::all(unread)
        }
    }

    pub fn target(&self) -> ReadTarget {
        if self.id > 0 {
            ReadTarget::Item(self.id)
        } else {
            ReadTarget::All(self.feed_id)
        }
    }
}

/// Unread count for a feed; `id = None` addresses the aggregate over all feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountEvent {
    pub id: Option<i64>,
    pub unread_count: i64,
}

impl UnreadCountEvent {
    pub fn new(id: Option<i64>, unread_count: i64) -> Self {
        Self { id, unread_count }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedsChangedEvent {
    /// The feed that changed, when a single one did
    #[serde(default)]
    pub feed_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchListChangedEvent {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_target() {
        assert_eq!(ItemReadEvent::item(5, false).target(), ReadTarget::Item(5));
        assert_eq!(ItemReadEvent::all(false).target(), ReadTarget::All(None));
        assert_eq!(ItemReadEvent::item(-1, true).target(), ReadTarget::All(None));
        assert_eq!(
            ItemReadEvent::all_in_feed(Some(3), false).target(),
            ReadTarget::All(Some(3))
        );
    }

    #[test]
    fn test_item_read_wire_format() {
        let json = serde_json::to_string(&ItemReadEvent::item(7, true)).unwrap();
        assert_eq!(json, r#"{"id":7,"unread":true}"#);

        let event: ItemReadEvent = serde_json::from_str(r#"{"id":0,"unread":false}"#).unwrap();
        assert_eq!(event, ItemReadEvent::all(false));
    }

    #[test]
    fn test_unread_count_wire_format() {
        let json = serde_json::to_string(&UnreadCountEvent::new(None, 3)).unwrap();
        assert_eq!(json, r#"{"id":null,"unreadCount":3}"#);
    }
}
