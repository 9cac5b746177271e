//! Reactive list binding for one scope

use std::sync::Arc;

use super::observe::{ListenerGuard, Listeners};
use super::pager::ItemPager;
use super::read_state::ReadStateSync;
use super::reload::{PendingReload, ReloadBridge};
use super::unread::UnreadCounter;
use super::ItemSource;
use crate::events::EventBus;
use crate::feed::{Item, Scope};
use crate::Result;

/// What part of a [`ListView`] changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Items,
    UnreadCount(u32),
    PendingReload(Option<PendingReload>),
}

/// A paginated item list kept live by bus events: read flags are patched in
/// place, the unread counter follows the scope, and new items arm a reload.
pub struct ListView {
    source: Arc<dyn ItemSource>,
    pager: ItemPager,
    _read_state: ReadStateSync,
    counter: UnreadCounter,
    bridge: ReloadBridge,
    listeners: Listeners<ViewChange>,
    _forwarding: Vec<ListenerGuard>,
}

impl ListView {
    /// Bind to `scope` without fetching; see [`open`](Self::open)
    pub fn new(source: Arc<dyn ItemSource>, bus: &EventBus, scope: Scope, page_size: u32) -> Self {
        let feed_id = scope.feed_id;
        let pager = ItemPager::new(Arc::clone(&source), scope, page_size);
        let read_state = ReadStateSync::attach(bus, &pager);
        let counter = UnreadCounter::new(Arc::clone(&source), bus, feed_id);
        let bridge = ReloadBridge::new(bus, pager.clone());

        let listeners = Listeners::new();
        let forwarding = vec![
            {
                let listeners = listeners.clone();
                pager.subscribe(move |_| listeners.notify(&ViewChange::Items))
            },
            {
                let listeners = listeners.clone();
                counter.subscribe(move |count| listeners.notify(&ViewChange::UnreadCount(*count)))
            },
            {
                let listeners = listeners.clone();
                bridge.subscribe(move |pending| {
                    listeners.notify(&ViewChange::PendingReload(*pending))
                })
            },
        ];

        Self {
            source,
            pager,
            _read_state: read_state,
            counter,
            bridge,
            listeners,
            _forwarding: forwarding,
        }
    }

    /// Fetch the unread count and the first page
    pub async fn open(&self) -> Result<()> {
        let (count, page) = tokio::join!(self.counter.refresh(), self.pager.load_more());
        count?;
        page?;
        Ok(())
    }

    pub fn scope(&self) -> Scope {
        self.pager.scope()
    }

    pub fn items(&self) -> Vec<Item> {
        self.pager.items()
    }

    pub fn more(&self) -> bool {
        self.pager.more()
    }

    pub fn unread_count(&self) -> u32 {
        self.counter.value()
    }

    pub fn pending_reload(&self) -> Option<PendingReload> {
        self.bridge.pending()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&ViewChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub async fn load_more(&self) -> Result<bool> {
        self.pager.load_more().await
    }

    /// Reload from the first page, resolving any pending signal
    pub async fn reload(&self) -> Result<bool> {
        self.bridge.reload().await
    }

    /// Switch scope: the collection is dropped, counters and signals follow
    pub async fn set_scope(&self, scope: Scope) -> Result<()> {
        let feed_id = scope.feed_id;
        if !self.pager.reset_scope(scope) {
            return Ok(());
        }
        self.bridge.set_feed(feed_id);

        if self.counter.reset_scope(feed_id) {
            let (count, page) = tokio::join!(self.counter.refresh(), self.pager.load_more());
            count?;
            page?;
        } else {
            self.pager.load_more().await?;
        }
        Ok(())
    }

    /// Change one item's read state through the store. The local copy only
    /// changes when the store's `item/unread` event comes back.
    pub async fn mark_read(&self, id: i64, unread: bool) -> Result<bool> {
        self.source.mark_item_read(id, unread).await
    }

    /// Mark everything in the current feed (or every feed) read
    pub async fn mark_all_read(&self) -> Result<bool> {
        self.source.mark_all_read(self.scope().feed_id).await
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::events::{
        ItemReadEvent, UnreadCountEvent, FEED_NEW, FEED_UNREAD, ITEM_UNREAD,
    };
    use crate::sync::testing::{ids, item, ScriptedSource};

    fn view(source: &Arc<ScriptedSource>, bus: &EventBus, scope: Scope) -> ListView {
        ListView::new(Arc::clone(source) as Arc<dyn ItemSource>, bus, scope, 2)
    }

    #[tokio::test]
    async fn test_feed_scenario() {
        let source = ScriptedSource::new();
        source.page(Some(10), None, vec![item(5, 10, 500), item(3, 10, 300)], Some("c1"));
        source.page(Some(10), Some("c1"), vec![item(1, 10, 100)], None);
        source.count(Some(10), 3);
        let bus = EventBus::new();
        let view = view(&source, &bus, Scope::feed(10));

        view.open().await.unwrap();
        assert_eq!(ids(&view.items()), vec![5, 3]);
        assert!(view.more());
        assert_eq!(view.unread_count(), 3);

        view.load_more().await.unwrap();
        assert_eq!(ids(&view.items()), vec![5, 3, 1]);
        assert!(!view.more());

        // Patch for an item that is not loaded
        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(77, false)).unwrap();
        assert_eq!(view.items().len(), 3);

        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(3, false)).unwrap();
        bus.publish(FEED_UNREAD, &UnreadCountEvent::new(Some(10), 2)).unwrap();
        assert!(!view.items()[1].unread);
        assert_eq!(view.unread_count(), 2);
    }

    #[tokio::test]
    async fn test_new_items_wait_for_explicit_reload() {
        let source = ScriptedSource::new();
        source.page(None, None, vec![item(1, 1, 100)], None);
        let bus = EventBus::new();
        let view = view(&source, &bus, Scope::all());
        view.open().await.unwrap();

        source.page(None, None, vec![item(2, 1, 200), item(1, 1, 100)], None);
        bus.publish(FEED_NEW, &UnreadCountEvent::new(None, 1)).unwrap();

        assert_eq!(view.pending_reload(), Some(PendingReload { new_items: 1 }));
        assert_eq!(view.unread_count(), 1);
        assert_eq!(ids(&view.items()), vec![1]);

        view.reload().await.unwrap();
        assert_eq!(view.pending_reload(), None);
        assert_eq!(ids(&view.items()), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_scope_change_rebinds_everything() {
        let source = ScriptedSource::new();
        source.page(Some(1), None, vec![item(1, 1, 100)], None);
        source.page(Some(2), None, vec![item(2, 2, 200)], None);
        source.count(Some(1), 1);
        source.count(Some(2), 4);
        let bus = EventBus::new();
        let view = view(&source, &bus, Scope::feed(1));
        view.open().await.unwrap();
        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 1)).unwrap();

        view.set_scope(Scope::feed(2)).await.unwrap();
        assert_eq!(ids(&view.items()), vec![2]);
        assert_eq!(view.unread_count(), 4);
        assert_eq!(view.pending_reload(), None);

        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 1)).unwrap();
        assert_eq!(view.pending_reload(), None);
        assert_eq!(view.unread_count(), 4);
    }

    #[tokio::test]
    async fn test_search_change_keeps_counter() {
        let source = ScriptedSource::new();
        source.count(Some(1), 5);
        let bus = EventBus::new();
        let view = view(&source, &bus, Scope::feed(1));
        view.open().await.unwrap();

        view.set_scope(Scope::feed(1).with_search("rust")).await.unwrap();
        assert_eq!(view.unread_count(), 5);
        assert_eq!(source.page_calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_read_is_not_optimistic() {
        let source = ScriptedSource::new();
        source.page(None, None, vec![item(1, 1, 100)], None);
        let bus = EventBus::new();
        let view = view(&source, &bus, Scope::all());
        view.open().await.unwrap();

        assert!(view.mark_read(1, false).await.unwrap());
        assert_eq!(*source.marks.lock(), vec![(1, false)]);
        assert!(view.items()[0].unread);
    }

    #[tokio::test]
    async fn test_listeners_see_view_changes() {
        let source = ScriptedSource::new();
        source.page(None, None, vec![item(1, 1, 100)], None);
        source.count(None, 1);
        let bus = EventBus::new();
        let view = view(&source, &bus, Scope::all());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = view.subscribe(move |c| sink.lock().push(*c));

        view.open().await.unwrap();
        bus.publish(FEED_NEW, &UnreadCountEvent::new(None, 2)).unwrap();

        let seen = seen.lock();
        assert!(seen.contains(&ViewChange::Items));
        assert!(seen.contains(&ViewChange::UnreadCount(1)));
        assert!(seen.contains(&ViewChange::UnreadCount(3)));
        assert!(seen.contains(&ViewChange::PendingReload(Some(PendingReload { new_items: 2 }))));
    }
}
