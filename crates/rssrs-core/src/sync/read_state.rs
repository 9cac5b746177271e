//! Applies `item/unread` patches to a pager's collection

use crate::events::{EventBus, ItemReadEvent, ReadTarget, Subscription, ITEM_UNREAD};
use crate::feed::Item;

use super::ItemPager;

/// Apply a read-state patch in place. Positions never change; an id that is
/// not in the collection is ignored. Returns whether anything changed.
pub fn apply_read_event(items: &mut [Item], event: &ItemReadEvent) -> bool {
    match event.target() {
        ReadTarget::Item(id) => match items.iter_mut().find(|item| item.id == id) {
            Some(item) if item.unread != event.unread => {
                item.unread = event.unread;
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!(id, "Read-state patch for an item not loaded");
                false
            }
        },
        ReadTarget::All(feed_id) => {
            let mut changed = false;
            for item in items
                .iter_mut()
                .filter(|item| feed_id.map_or(true, |feed_id| item.feed_id == feed_id))
            {
                changed |= item.unread != event.unread;
                item.unread = event.unread;
            }
            changed
        }
    }
}

/// Keeps a pager's read flags in step with `item/unread` events
pub struct ReadStateSync {
    _subscription: Subscription<ItemReadEvent>,
}

impl ReadStateSync {
    pub fn attach(bus: &EventBus, pager: &ItemPager) -> Self {
        Self {
            _subscription: bus.subscribe(ITEM_UNREAD, patcher(pager.clone())),
        }
    }
}

fn patcher(pager: ItemPager) -> impl Fn(&ItemReadEvent) + Send + Sync + 'static {
    move |event: &ItemReadEvent| {
        pager.patch(|items| apply_read_event(items, event));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::feed::Scope;
    use crate::sync::testing::{ids, item, ScriptedSource};
    use crate::sync::ItemSource;

    fn unread_flags(items: &[Item]) -> Vec<bool> {
        items.iter().map(|i| i.unread).collect()
    }

    #[test]
    fn test_specific_item_patch_keeps_position() {
        let mut items = vec![item(5, 1, 500), item(3, 1, 300), item(1, 1, 100)];

        assert!(apply_read_event(&mut items, &ItemReadEvent::item(3, false)));
        assert_eq!(ids(&items), vec![5, 3, 1]);
        assert_eq!(unread_flags(&items), vec![true, false, true]);

        // Same value again: nothing changes
        assert!(!apply_read_event(&mut items, &ItemReadEvent::item(3, false)));
    }

    #[test]
    fn test_absent_item_is_dropped() {
        let mut items = vec![item(5, 1, 500), item(3, 1, 300)];
        let before = items.clone();

        assert!(!apply_read_event(&mut items, &ItemReadEvent::item(99, false)));
        assert_eq!(items, before);
    }

    #[test]
    fn test_sentinel_patches_everything() {
        let mut items = vec![item(5, 1, 500), item(3, 2, 300)];

        assert!(apply_read_event(&mut items, &ItemReadEvent::all(false)));
        assert_eq!(unread_flags(&items), vec![false, false]);
    }

    #[test]
    fn test_feed_scoped_sentinel() {
        let mut items = vec![item(5, 1, 500), item(3, 2, 300)];

        assert!(apply_read_event(&mut items, &ItemReadEvent::all_in_feed(Some(2), false)));
        assert_eq!(unread_flags(&items), vec![true, false]);
    }

    #[tokio::test]
    async fn test_bus_events_patch_the_pager() {
        let source = ScriptedSource::new();
        source.page(None, None, vec![item(5, 1, 500), item(3, 1, 300)], None);
        let pager = ItemPager::new(Arc::clone(&source) as Arc<dyn ItemSource>, Scope::all(), 20);
        pager.load_more().await.unwrap();

        let bus = EventBus::new();
        let sync = ReadStateSync::attach(&bus, &pager);

        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(5, false)).unwrap();
        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(42, false)).unwrap();
        assert_eq!(unread_flags(&pager.items()), vec![false, true]);
        assert_eq!(pager.len(), 2);

        drop(sync);
        bus.publish(ITEM_UNREAD, &ItemReadEvent::all(false)).unwrap();
        assert_eq!(unread_flags(&pager.items()), vec![false, true]);
    }
}
