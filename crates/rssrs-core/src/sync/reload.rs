//! Turns `feed/new` notifications into a pending, user-triggered reload

use std::sync::Arc;

use parking_lot::Mutex;

use super::observe::{ListenerGuard, Listeners};
use super::ItemPager;
use crate::events::{EventBus, Subscription, UnreadCountEvent, FEED_NEW};
use crate::Result;

/// New items are available for the displayed scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReload {
    /// Items announced since the signal was armed
    pub new_items: u32,
}

/// Arms a coalesced reload signal for the pager's feed; never reloads by itself
pub struct ReloadBridge {
    pager: ItemPager,
    pending: Arc<Mutex<Option<PendingReload>>>,
    listeners: Listeners<Option<PendingReload>>,
    subscription: Subscription<UnreadCountEvent>,
}

impl ReloadBridge {
    pub fn new(bus: &EventBus, pager: ItemPager) -> Self {
        let pending = Arc::new(Mutex::new(None));
        let listeners = Listeners::new();
        let subscription = bus.subscribe(
            FEED_NEW,
            on_new_items(pager.scope().feed_id, Arc::clone(&pending), listeners.clone()),
        );

        Self {
            pager,
            pending,
            listeners,
            subscription,
        }
    }

    pub fn pending(&self) -> Option<PendingReload> {
        *self.pending.lock()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&Option<PendingReload>) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Resolve the pending signal and reload the pager from its first page
    pub async fn reload(&self) -> Result<bool> {
        self.clear();
        self.pager.reload().await
    }

    /// Track a different feed; any pending signal belonged to the old one
    pub fn set_feed(&self, feed_id: Option<i64>) {
        self.subscription.rebind(on_new_items(
            feed_id,
            Arc::clone(&self.pending),
            self.listeners.clone(),
        ));
        self.clear();
    }

    fn clear(&self) {
        if self.pending.lock().take().is_some() {
            self.listeners.notify(&None);
        }
    }
}

fn on_new_items(
    feed_id: Option<i64>,
    pending: Arc<Mutex<Option<PendingReload>>>,
    listeners: Listeners<Option<PendingReload>>,
) -> impl Fn(&UnreadCountEvent) + Send + Sync + 'static {
    move |event: &UnreadCountEvent| {
        if event.id != feed_id || event.unread_count <= 0 {
            return;
        }
        let added = u32::try_from(event.unread_count).unwrap_or(u32::MAX);
        let armed = {
            let mut pending = pending.lock();
            let new_items = pending
                .map_or(0, |p| p.new_items)
                .saturating_add(added);
            let armed = Some(PendingReload { new_items });
            *pending = armed;
            armed
        };
        tracing::debug!(?feed_id, added, "Reload pending");
        listeners.notify(&armed);
    }
}
