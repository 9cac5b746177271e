//! Event transport: named channels with typed payloads

mod bus;
pub mod channels;

pub use bus::{Envelope, EventBus, Sequenced, Subscription, ALL_CHANNELS};
pub use channels::{
    Channel, FeedsChangedEvent, ItemReadEvent, ReadTarget, UnreadCountEvent,
    WatchListChangedEvent, FEEDS_CHANGED, FEED_NEW, FEED_UNREAD, ITEM_UNREAD, WATCHLIST_CHANGED,
};
