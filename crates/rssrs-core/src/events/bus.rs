//! In-process publish/subscribe over named channels
//!
//! Delivery is synchronous: `publish` runs every handler bound to the channel
//! before returning, in subscription order. Each subscription owns a lock
//! that is held while its handler runs and while it is rebound or dropped,
//! so once `rebind`/`unsubscribe` returns the previous handler never runs
//! again. The lock is reentrant: a handler may rebind or drop its own
//! subscription (or the last owner of it) while it runs. Handlers must not
//! publish on the bus themselves.
//!
//! Every envelope published here is stamped with a sequence number, strictly
//! increasing per bus. Forwarded envelopes keep the number they arrived with.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::channels::Channel;
use crate::{Error, Result};

/// Channel name that receives every published envelope
pub const ALL_CHANNELS: &str = "*";

/// A published event as it travels between processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub payload: serde_json::Value,
    /// Publish order on the originating bus; 0 when unknown
    #[serde(default)]
    pub seq: u64,
}

/// A decoded payload with the sequence number it was published under
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced<T> {
    pub seq: u64,
    pub payload: T,
}

type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;
type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Slot {
    id: u64,
    channel: String,
    handler: ReentrantMutex<RefCell<Option<Handler>>>,
}

#[derive(Default)]
struct Inner {
    channels: RwLock<HashMap<String, Vec<Arc<Slot>>>>,
    next_id: AtomicU64,
    last_seq: AtomicU64,
}

/// Shared handle to the event transport
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `channel` until the returned subscription is dropped
    pub fn subscribe<T, F>(&self, channel: Channel<T>, handler: F) -> Subscription<T>
    where
        T: DeserializeOwned + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.bind(channel.name(), decoding::<T>, Box::new(handler))
    }

    /// Like `subscribe`, but the handler also sees each event's sequence number
    pub fn subscribe_sequenced<T, F>(
        &self,
        channel: Channel<T>,
        handler: F,
    ) -> Subscription<Sequenced<T>>
    where
        T: DeserializeOwned + 'static,
        F: Fn(&Sequenced<T>) + Send + Sync + 'static,
    {
        self.bind(channel.name(), sequenced::<T>, Box::new(handler))
    }

    /// Bind `handler` to every channel, receiving raw envelopes
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription<Envelope>
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.bind(ALL_CHANNELS, raw, Box::new(handler))
    }

    fn bind<T>(
        &self,
        channel: &str,
        wrap: fn(Callback<T>) -> Handler,
        callback: Callback<T>,
    ) -> Subscription<T> {
        let slot = Arc::new(Slot {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            channel: channel.to_string(),
            handler: ReentrantMutex::new(RefCell::new(Some(wrap(callback)))),
        });

        self.inner
            .channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .push(Arc::clone(&slot));

        tracing::trace!(channel, id = slot.id, "Subscribed");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            slot,
            wrap,
        }
    }

    /// Publish a typed payload, returning the number of handlers reached
    pub fn publish<T: Serialize>(&self, channel: Channel<T>, payload: &T) -> Result<usize> {
        let payload = serde_json::to_value(payload).map_err(|e| {
            Error::Transport(format!("Failed to encode '{}' payload: {}", channel.name(), e))
        })?;

        Ok(self.publish_envelope(&Envelope {
            channel: channel.name().to_string(),
            payload,
            seq: self.inner.last_seq.fetch_add(1, Ordering::SeqCst) + 1,
        }))
    }

    /// Sequence number of the latest envelope published or forwarded here
    pub fn last_seq(&self) -> u64 {
        self.inner.last_seq.load(Ordering::SeqCst)
    }

    /// Publish an already encoded envelope (used when forwarding)
    pub fn publish_envelope(&self, envelope: &Envelope) -> usize {
        self.inner.last_seq.fetch_max(envelope.seq, Ordering::SeqCst);

        let targets: Vec<Arc<Slot>> = {
            let channels = self.inner.channels.read();
            channels
                .get(&envelope.channel)
                .into_iter()
                .chain(channels.get(ALL_CHANNELS))
                .flatten()
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for slot in targets {
            let guard = slot.handler.lock();
            // Clone out so the handler may rebind or drop its own slot
            let handler = guard.borrow().clone();
            if let Some(handler) = handler {
                handler(envelope);
                delivered += 1;
            }
        }

        tracing::trace!(channel = %envelope.channel, delivered, "Published");
        delivered
    }

    /// Number of live handlers bound to `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .read()
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn decoding<T: DeserializeOwned + 'static>(callback: Callback<T>) -> Handler {
    Arc::new(move |envelope: &Envelope| match T::deserialize(&envelope.payload) {
        Ok(payload) => callback(&payload),
        Err(e) => undecodable(envelope, &e),
    })
}

fn sequenced<T: DeserializeOwned + 'static>(callback: Callback<Sequenced<T>>) -> Handler {
    Arc::new(move |envelope: &Envelope| match T::deserialize(&envelope.payload) {
        Ok(payload) => callback(&Sequenced {
            seq: envelope.seq,
            payload,
        }),
        Err(e) => undecodable(envelope, &e),
    })
}

fn undecodable(envelope: &Envelope, error: &serde_json::Error) {
    tracing::warn!(
        channel = %envelope.channel,
        error = %error,
        "Dropping event with undecodable payload"
    );
}

fn raw(callback: Callback<Envelope>) -> Handler {
    Arc::from(callback)
}

/// A live handler binding; dropping it unsubscribes
pub struct Subscription<T> {
    bus: Weak<Inner>,
    slot: Arc<Slot>,
    wrap: fn(Callback<T>) -> Handler,
}

impl<T> Subscription<T> {
    pub fn channel(&self) -> &str {
        &self.slot.channel
    }

    /// Replace the handler; no event reaches the old one after this returns
    pub fn rebind<F>(&self, handler: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let guard = self.slot.handler.lock();
        let mut slot = guard.borrow_mut();
        if slot.is_some() {
            *slot = Some((self.wrap)(Box::new(handler)));
        }
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        // Waits for an in-flight dispatch to this slot on another thread
        let handler = self.slot.handler.lock().borrow_mut().take();
        drop(handler);

        if let Some(inner) = self.bus.upgrade() {
            let mut channels = inner.channels.write();
            if let Some(slots) = channels.get_mut(&self.slot.channel) {
                slots.retain(|s| s.id != self.slot.id);
                if slots.is_empty() {
                    channels.remove(&self.slot.channel);
                }
            }
        }

        tracing::trace!(channel = %self.slot.channel, id = self.slot.id, "Unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::events::channels::{ItemReadEvent, UnreadCountEvent, FEED_NEW, ITEM_UNREAD};

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &T| sink.lock().push(event.clone()))
    }

    #[test]
    fn test_delivery_in_publish_order() {
        let bus = EventBus::new();
        let (seen, handler) = recorder::<ItemReadEvent>();
        let _sub = bus.subscribe(ITEM_UNREAD, handler);

        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(1, false)).unwrap();
        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(2, true)).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![ItemReadEvent::item(1, false), ItemReadEvent::item(2, true)]
        );
    }

    #[test]
    fn test_channels_are_isolated() {
        let bus = EventBus::new();
        let (seen, handler) = recorder::<ItemReadEvent>();
        let _sub = bus.subscribe(ITEM_UNREAD, handler);

        let delivered = bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 2)).unwrap();

        assert_eq!(delivered, 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let (seen, handler) = recorder::<ItemReadEvent>();
        let sub = bus.subscribe(ITEM_UNREAD, handler);
        assert_eq!(bus.subscriber_count(ITEM_UNREAD.name()), 1);

        sub.unsubscribe();
        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(1, false)).unwrap();

        assert!(seen.lock().is_empty());
        assert_eq!(bus.subscriber_count(ITEM_UNREAD.name()), 0);
    }

    #[test]
    fn test_rebind_switches_handler() {
        let bus = EventBus::new();
        let (old_seen, old_handler) = recorder::<ItemReadEvent>();
        let (new_seen, new_handler) = recorder::<ItemReadEvent>();

        let sub = bus.subscribe(ITEM_UNREAD, old_handler);
        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(1, false)).unwrap();
        sub.rebind(new_handler);
        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(2, false)).unwrap();

        assert_eq!(old_seen.lock().len(), 1);
        assert_eq!(*new_seen.lock(), vec![ItemReadEvent::item(2, false)]);
        assert_eq!(bus.subscriber_count(ITEM_UNREAD.name()), 1);
    }

    #[test]
    fn test_subscribe_all_sees_every_channel() {
        let bus = EventBus::new();
        let (seen, handler) = recorder::<Envelope>();
        let _all = bus.subscribe_all(handler);

        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(1, false)).unwrap();
        bus.publish(FEED_NEW, &UnreadCountEvent::new(None, 4)).unwrap();

        let channels: Vec<String> = seen.lock().iter().map(|e| e.channel.clone()).collect();
        assert_eq!(channels, vec!["item/unread", "feed/new"]);
    }

    #[test]
    fn test_undecodable_payload_is_skipped() {
        let bus = EventBus::new();
        let (seen, handler) = recorder::<ItemReadEvent>();
        let _sub = bus.subscribe(ITEM_UNREAD, handler);

        bus.publish_envelope(&Envelope {
            channel: "item/unread".to_string(),
            payload: serde_json::json!({ "bogus": true }),
            seq: 0,
        });

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let (_seen, handler) = recorder::<ItemReadEvent>();
        let sub = {
            let bus = EventBus::new();
            bus.subscribe(ITEM_UNREAD, handler)
        };
        drop(sub);
    }

    #[test]
    fn test_publishes_are_numbered_in_order() {
        let bus = EventBus::new();
        let (seen, handler) = recorder::<Sequenced<UnreadCountEvent>>();
        let _sub = bus.subscribe_sequenced(FEED_NEW, handler);

        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(1, false)).unwrap();
        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 2)).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![Sequenced {
                seq: 2,
                payload: UnreadCountEvent::new(Some(1), 2)
            }]
        );
        assert_eq!(bus.last_seq(), 2);
    }

    #[test]
    fn test_forwarded_envelopes_keep_their_number() {
        let bus = EventBus::new();
        let (seen, handler) = recorder::<Envelope>();
        let _all = bus.subscribe_all(handler);

        let forwarded = Envelope {
            channel: "feed/new".to_string(),
            payload: serde_json::to_value(UnreadCountEvent::new(None, 1)).unwrap(),
            seq: 40,
        };
        bus.publish_envelope(&forwarded);

        assert_eq!(*seen.lock(), vec![forwarded]);
        assert_eq!(bus.last_seq(), 40);
        bus.publish(FEED_NEW, &UnreadCountEvent::new(None, 1)).unwrap();
        assert_eq!(seen.lock()[1].seq, 41);
    }

    #[test]
    fn test_handler_can_drop_its_own_subscription() {
        let bus = EventBus::new();
        let own: Arc<Mutex<Option<Subscription<ItemReadEvent>>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let (slot, counter) = (Arc::clone(&own), Arc::clone(&calls));
        let sub = bus.subscribe(ITEM_UNREAD, move |_: &ItemReadEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            // The last owner goes away while its handler is running
            let taken = slot.lock().take();
            drop(taken);
        });
        *own.lock() = Some(sub);

        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(1, false)).unwrap();
        bus.publish(ITEM_UNREAD, &ItemReadEvent::item(2, false)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(ITEM_UNREAD.name()), 0);
    }
}
