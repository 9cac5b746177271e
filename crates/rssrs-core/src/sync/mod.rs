//! Incremental synchronization of a local item list with the store
//!
//! A [`ListView`] pages items in through an [`ItemSource`] and keeps them
//! current from bus events. Fetches carry the epoch they were issued under,
//! and a result from an older epoch is dropped on arrival.

mod observe;
mod pager;
mod read_state;
mod reload;
mod shared;
mod source;
mod unread;
mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use observe::{ListenerGuard, Listeners};
pub use pager::{ItemPager, PagerChange};
pub use read_state::{apply_read_event, ReadStateSync};
pub use reload::{PendingReload, ReloadBridge};
pub use shared::{FeedList, WatchList};
pub use source::{FeedDirectory, ItemSource, UnreadSnapshot};
pub use unread::UnreadCounter;
pub use view::{ListView, ViewChange};
