//! Process-wide feed list and watch list, refreshed from the bus

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::observe::{ListenerGuard, Listeners};
use super::FeedDirectory;
use crate::events::{
    EventBus, FeedsChangedEvent, Subscription, UnreadCountEvent, WatchListChangedEvent,
    FEEDS_CHANGED, FEED_NEW, FEED_UNREAD, WATCHLIST_CHANGED,
};
use crate::feed::{Feed, Item};
use crate::Result;

/// A value replaced by refreshes; a refresh older than the latest one is dropped
struct Store<T> {
    value: Mutex<T>,
    generation: AtomicU64,
    listeners: Listeners<T>,
}

impl<T: Clone + Default + 'static> Store<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(T::default()),
            generation: AtomicU64::new(0),
            listeners: Listeners::new(),
        }
    }

    fn get(&self) -> T {
        self.value.lock().clone()
    }

    async fn refresh<F>(&self, load: F) -> Result<bool>
    where
        F: Future<Output = Result<T>>,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let loaded = load.await?;

        let snapshot = {
            let mut value = self.value.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                return Ok(false);
            }
            *value = loaded;
            value.clone()
        };
        self.listeners.notify(&snapshot);
        Ok(true)
    }

    fn update<F: FnOnce(&mut T) -> bool>(&self, update: F) {
        let snapshot = {
            let mut value = self.value.lock();
            if !update(&mut value) {
                return;
            }
            value.clone()
        };
        self.listeners.notify(&snapshot);
    }
}

/// Run `refresh` on the current runtime; events may arrive outside one
fn spawn_refresh<S, F, Fut>(target: Weak<S>, what: &'static str, refresh: F)
where
    S: Send + Sync + 'static,
    F: FnOnce(Arc<S>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No runtime to refresh the {} on", what);
        return;
    };

    handle.spawn(async move {
        if let Some(target) = target.upgrade() {
            if let Err(e) = refresh(target).await {
                tracing::warn!("Failed to refresh the {}: {}", what, e);
            }
        }
    });
}

/// Subscribed feeds with their unread counts
pub struct FeedList {
    directory: Arc<dyn FeedDirectory>,
    store: Store<Vec<Feed>>,
    _changed: Subscription<FeedsChangedEvent>,
    _absolute: Subscription<UnreadCountEvent>,
    _delta: Subscription<UnreadCountEvent>,
}

impl FeedList {
    /// Create the list; it stays empty until the first [`refresh`](Self::refresh)
    pub fn new(directory: Arc<dyn FeedDirectory>, bus: &EventBus) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let changed = {
                let this = this.clone();
                bus.subscribe(FEEDS_CHANGED, move |_: &FeedsChangedEvent| {
                    spawn_refresh(this.clone(), "feed list", |list: Arc<Self>| async move {
                        list.refresh().await
                    });
                })
            };
            let absolute = {
                let this = this.clone();
                bus.subscribe(FEED_UNREAD, move |event: &UnreadCountEvent| {
                    if let Some(list) = this.upgrade() {
                        list.patch_count(event, |_, count| count);
                    }
                })
            };
            let delta = {
                let this = this.clone();
                bus.subscribe(FEED_NEW, move |event: &UnreadCountEvent| {
                    if let Some(list) = this.upgrade() {
                        list.patch_count(event, |current, added| current + added);
                    }
                })
            };

            Self {
                directory,
                store: Store::new(),
                _changed: changed,
                _absolute: absolute,
                _delta: delta,
            }
        })
    }

    pub fn feeds(&self) -> Vec<Feed> {
        self.store.get()
    }

    pub fn find(&self, id: i64) -> Option<Feed> {
        self.store.value.lock().iter().find(|f| f.id == id).cloned()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&Vec<Feed>) + Send + Sync + 'static,
    {
        self.store.listeners.subscribe(listener)
    }

    pub async fn refresh(&self) -> Result<bool> {
        self.store.refresh(self.directory.list_feeds()).await
    }

    fn patch_count(&self, event: &UnreadCountEvent, combine: fn(i64, i64) -> i64) {
        let Some(id) = event.id else {
            return;
        };
        self.store.update(|feeds| match feeds.iter_mut().find(|f| f.id == id) {
            Some(feed) => {
                let count = combine(i64::from(feed.unread_count), event.unread_count);
                feed.unread_count = count.clamp(0, i64::from(u32::MAX)) as u32;
                true
            }
            None => false,
        });
    }
}

/// Watch-list keywords
pub struct WatchList {
    directory: Arc<dyn FeedDirectory>,
    store: Store<Vec<String>>,
    _changed: Subscription<WatchListChangedEvent>,
}

impl WatchList {
    pub fn new(directory: Arc<dyn FeedDirectory>, bus: &EventBus) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            let changed = bus.subscribe(WATCHLIST_CHANGED, move |_: &WatchListChangedEvent| {
                spawn_refresh(this.clone(), "watch list", |list: Arc<Self>| async move {
                    list.refresh().await
                });
            });

            Self {
                directory,
                store: Store::new(),
                _changed: changed,
            }
        })
    }

    pub fn keywords(&self) -> Vec<String> {
        self.store.get()
    }

    /// Keywords found in the item's title
    pub fn matches(&self, item: &Item) -> Vec<String> {
        let keywords = self.store.value.lock();
        let matched: Vec<String> = item
            .matched_keywords(&keywords)
            .into_iter()
            .map(str::to_string)
            .collect();
        matched
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&Vec<String>) + Send + Sync + 'static,
    {
        self.store.listeners.subscribe(listener)
    }

    pub async fn refresh(&self) -> Result<bool> {
        self.store.refresh(self.directory.watchlist()).await
    }
}
