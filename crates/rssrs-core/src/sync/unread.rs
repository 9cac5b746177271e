//! Unread counter for one scope, reconciling an initial fetch with live events
//!
//! Events are numbered by the bus and the store reports the number its count
//! was read at, so the fetched snapshot is ordered against every event:
//! - an absolute `feed/unread` event numbered after the snapshot is newer,
//!   so the fetch result is dropped when it lands;
//! - `feed/new` deltas numbered after the snapshot are applied on top of the
//!   fetched value, while those at or below it are already counted;
//! - events at or below the last applied snapshot are ignored when they
//!   arrive late.
//!
//! Sequence number 0 means unknown: such a snapshot orders before every
//! event, and such an event after every snapshot.

use std::sync::Arc;

use parking_lot::Mutex;

use super::observe::{ListenerGuard, Listeners};
use super::ItemSource;
use crate::events::{EventBus, Sequenced, Subscription, UnreadCountEvent, FEED_NEW, FEED_UNREAD};
use crate::Result;

#[derive(Debug, Default)]
struct CounterState {
    feed_id: Option<i64>,
    epoch: u64,
    value: i64,
    /// Events numbered at or below this are already in `value`
    floor_seq: u64,
    fetching: bool,
    /// Newest absolute event seen while fetching
    absolute_seq: Option<u64>,
    /// Deltas seen while fetching, with their sequence numbers
    pending: Vec<(u64, i64)>,
}

impl CounterState {
    fn set(&mut self, value: i64) {
        self.value = value.max(0);
    }

    fn covers(&self, seq: u64) -> bool {
        seq != 0 && seq <= self.floor_seq
    }

    fn start_fetch(&mut self) {
        self.fetching = true;
        self.absolute_seq = None;
        self.pending.clear();
    }

    fn end_fetch(&mut self) -> (Option<u64>, Vec<(u64, i64)>) {
        self.fetching = false;
        (self.absolute_seq.take(), std::mem::take(&mut self.pending))
    }
}

fn is_newer(seq: u64, snapshot_seq: u64) -> bool {
    seq == 0 || seq > snapshot_seq
}

/// Unread count of a feed, or of all feeds
pub struct UnreadCounter {
    source: Arc<dyn ItemSource>,
    state: Arc<Mutex<CounterState>>,
    listeners: Listeners<u32>,
    absolute: Subscription<Sequenced<UnreadCountEvent>>,
    delta: Subscription<Sequenced<UnreadCountEvent>>,
}

impl UnreadCounter {
    /// Subscribe for `feed_id`; call [`refresh`](Self::refresh) to fetch the initial count
    pub fn new(source: Arc<dyn ItemSource>, bus: &EventBus, feed_id: Option<i64>) -> Self {
        let state = Arc::new(Mutex::new(CounterState {
            feed_id,
            ..CounterState::default()
        }));
        let listeners = Listeners::new();

        let absolute = bus.subscribe_sequenced(
            FEED_UNREAD,
            on_absolute(feed_id, Arc::clone(&state), listeners.clone()),
        );
        let delta = bus.subscribe_sequenced(
            FEED_NEW,
            on_delta(feed_id, Arc::clone(&state), listeners.clone()),
        );

        Self {
            source,
            state,
            listeners,
            absolute,
            delta,
        }
    }

    pub fn value(&self) -> u32 {
        self.state.lock().value.clamp(0, i64::from(u32::MAX)) as u32
    }

    pub fn feed_id(&self) -> Option<i64> {
        self.state.lock().feed_id
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&u32) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Fetch the absolute count. Returns `false` when the result was
    /// superseded by a scope change, a newer fetch or a newer absolute event.
    pub async fn refresh(&self) -> Result<bool> {
        let (feed_id, epoch) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.start_fetch();
            (state.feed_id, state.epoch)
        };

        let fetched = self.source.unread_snapshot(feed_id).await;

        let value = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                tracing::debug!(?feed_id, "Dropping unread count of an older fetch");
                return fetched.map(|_| false);
            }
            let (absolute_seq, pending) = state.end_fetch();
            let snapshot = fetched?;

            if absolute_seq.is_some_and(|seq| is_newer(seq, snapshot.seq)) {
                tracing::debug!(?feed_id, ?snapshot, "Dropping superseded unread count");
                return Ok(false);
            }

            let newer: i64 = pending
                .iter()
                .filter(|(seq, _)| is_newer(*seq, snapshot.seq))
                .map(|(_, delta)| delta)
                .sum();
            state.floor_seq = state.floor_seq.max(snapshot.seq);
            state.set(i64::from(snapshot.unread_count) + newer);
            state.value
        };

        self.listeners.notify(&(value as u32));
        Ok(true)
    }

    /// Switch to another feed (or the aggregate) and fetch its count
    pub async fn set_scope(&self, feed_id: Option<i64>) -> Result<bool> {
        if !self.reset_scope(feed_id) {
            return Ok(false);
        }
        self.refresh().await
    }

    pub(crate) fn reset_scope(&self, feed_id: Option<i64>) -> bool {
        {
            let mut state = self.state.lock();
            if state.feed_id == feed_id {
                return false;
            }
            *state = CounterState {
                feed_id,
                epoch: state.epoch + 1,
                ..CounterState::default()
            };
        }

        // Handlers capture the feed they match against
        self.absolute.rebind(on_absolute(
            feed_id,
            Arc::clone(&self.state),
            self.listeners.clone(),
        ));
        self.delta.rebind(on_delta(
            feed_id,
            Arc::clone(&self.state),
            self.listeners.clone(),
        ));

        self.listeners.notify(&0);
        true
    }
}

fn on_absolute(
    feed_id: Option<i64>,
    state: Arc<Mutex<CounterState>>,
    listeners: Listeners<u32>,
) -> impl Fn(&Sequenced<UnreadCountEvent>) + Send + Sync + 'static {
    move |event: &Sequenced<UnreadCountEvent>| {
        let Sequenced { seq, payload } = event;
        if payload.id != feed_id {
            return;
        }
        let value = {
            let mut state = state.lock();
            if state.covers(*seq) {
                return;
            }
            if state.fetching {
                state.absolute_seq = Some(state.absolute_seq.map_or(*seq, |s| s.max(*seq)));
            }
            state.floor_seq = state.floor_seq.max(*seq);
            state.set(payload.unread_count);
            state.value
        };
        listeners.notify(&(value as u32));
    }
}

fn on_delta(
    feed_id: Option<i64>,
    state: Arc<Mutex<CounterState>>,
    listeners: Listeners<u32>,
) -> impl Fn(&Sequenced<UnreadCountEvent>) + Send + Sync + 'static {
    move |event: &Sequenced<UnreadCountEvent>| {
        let Sequenced { seq, payload } = event;
        if payload.id != feed_id {
            return;
        }
        let value = {
            let mut state = state.lock();
            if state.covers(*seq) {
                tracing::trace!(seq, "Delta already counted");
                return;
            }
            if state.fetching {
                state.pending.push((*seq, payload.unread_count));
            }
            let value = state.value + payload.unread_count;
            state.set(value);
            state.value
        };
        listeners.notify(&(value as u32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Envelope;
    use crate::sync::testing::{settle, ScriptedSource};

    fn counter(source: &Arc<ScriptedSource>, bus: &EventBus, feed_id: Option<i64>) -> Arc<UnreadCounter> {
        Arc::new(UnreadCounter::new(
            Arc::clone(source) as Arc<dyn ItemSource>,
            bus,
            feed_id,
        ))
    }

    #[tokio::test]
    async fn test_delta_then_absolute() {
        let source = ScriptedSource::new();
        source.count(Some(1), 3);
        let bus = EventBus::new();
        let counter = counter(&source, &bus, Some(1));

        assert!(counter.refresh().await.unwrap());
        assert_eq!(counter.value(), 3);

        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 2)).unwrap();
        assert_eq!(counter.value(), 5);

        bus.publish(FEED_UNREAD, &UnreadCountEvent::new(Some(1), 7)).unwrap();
        assert_eq!(counter.value(), 7);
    }

    #[tokio::test]
    async fn test_other_scopes_are_ignored() {
        let source = ScriptedSource::new();
        let bus = EventBus::new();
        let counter = counter(&source, &bus, None);
        counter.refresh().await.unwrap();

        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 2)).unwrap();
        bus.publish(FEED_UNREAD, &UnreadCountEvent::new(Some(1), 9)).unwrap();
        assert_eq!(counter.value(), 0);

        bus.publish(FEED_NEW, &UnreadCountEvent::new(None, 4)).unwrap();
        assert_eq!(counter.value(), 4);
    }

    #[tokio::test]
    async fn test_clamped_at_zero() {
        let source = ScriptedSource::new();
        source.count(None, 1);
        let bus = EventBus::new();
        let counter = counter(&source, &bus, None);
        counter.refresh().await.unwrap();

        bus.publish(FEED_NEW, &UnreadCountEvent::new(None, -5)).unwrap();
        assert_eq!(counter.value(), 0);
        bus.publish(FEED_UNREAD, &UnreadCountEvent::new(None, -2)).unwrap();
        assert_eq!(counter.value(), 0);
    }

    #[tokio::test]
    async fn test_absolute_event_beats_slow_fetch() {
        let source = ScriptedSource::new();
        source.count(Some(1), 3);
        let gate = source.gate_counts();
        let bus = EventBus::new();
        let counter = counter(&source, &bus, Some(1));

        let fetch = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move { counter.refresh().await })
        };
        settle().await;

        bus.publish(FEED_UNREAD, &UnreadCountEvent::new(Some(1), 8)).unwrap();
        gate.add_permits(1);

        assert!(!fetch.await.unwrap().unwrap());
        assert_eq!(counter.value(), 8);
    }

    #[tokio::test]
    async fn test_deltas_during_fetch_apply_on_top() {
        let source = ScriptedSource::new();
        source.count(Some(1), 3);
        let gate = source.gate_counts();
        let bus = EventBus::new();
        let counter = counter(&source, &bus, Some(1));

        let fetch = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move { counter.refresh().await })
        };
        settle().await;

        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 2)).unwrap();
        assert_eq!(counter.value(), 2);
        gate.add_permits(1);

        assert!(fetch.await.unwrap().unwrap());
        assert_eq!(counter.value(), 5);
    }

    #[tokio::test]
    async fn test_items_committed_during_fetch_are_counted_once() {
        let source = ScriptedSource::new();
        source.count(Some(1), 3);
        let gate = source.gate_counts();
        let bus = EventBus::new();
        source.number_counts_from(&bus);
        let counter = counter(&source, &bus, Some(1));

        let fetch = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move { counter.refresh().await })
        };
        settle().await;

        // Two items land and are announced before the count is read
        source.count(Some(1), 5);
        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 2)).unwrap();
        gate.add_permits(1);

        assert!(fetch.await.unwrap().unwrap());
        assert_eq!(counter.value(), 5);
    }

    #[tokio::test]
    async fn test_late_events_behind_the_snapshot_are_ignored() {
        let source = ScriptedSource::new();
        source.count_at(Some(1), 5, 4);
        let bus = EventBus::new();
        let counter = counter(&source, &bus, Some(1));
        assert!(counter.refresh().await.unwrap());

        let forward = |seq: u64, channel: &str, count: i64| {
            bus.publish_envelope(&Envelope {
                channel: channel.to_string(),
                payload: serde_json::to_value(UnreadCountEvent::new(Some(1), count)).unwrap(),
                seq,
            });
        };

        forward(4, FEED_NEW.name(), 2);
        forward(3, FEED_UNREAD.name(), 1);
        assert_eq!(counter.value(), 5);

        forward(5, FEED_NEW.name(), 2);
        assert_eq!(counter.value(), 7);
    }

    #[tokio::test]
    async fn test_absolute_event_older_than_snapshot_loses() {
        let source = ScriptedSource::new();
        source.count_at(Some(1), 6, 2);
        let gate = source.gate_counts();
        let bus = EventBus::new();
        let counter = counter(&source, &bus, Some(1));

        let fetch = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move { counter.refresh().await })
        };
        settle().await;

        // Numbered 1, the snapshot at 2 already reflects it
        bus.publish(FEED_UNREAD, &UnreadCountEvent::new(Some(1), 4)).unwrap();
        assert_eq!(counter.value(), 4);
        gate.add_permits(1);

        assert!(fetch.await.unwrap().unwrap());
        assert_eq!(counter.value(), 6);
    }

    #[tokio::test]
    async fn test_scope_change_drops_old_fetch_and_rebinds() {
        let source = ScriptedSource::new();
        source.count(Some(1), 3);
        source.count(Some(2), 6);
        let gate = source.gate_counts();
        let bus = EventBus::new();
        let counter = counter(&source, &bus, Some(1));

        let stale = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move { counter.refresh().await })
        };
        settle().await;

        let current = {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move { counter.set_scope(Some(2)).await })
        };
        settle().await;
        gate.add_permits(2);

        assert!(!stale.await.unwrap().unwrap());
        assert!(current.await.unwrap().unwrap());
        assert_eq!(counter.value(), 6);
        assert_eq!(counter.feed_id(), Some(2));

        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(1), 10)).unwrap();
        assert_eq!(counter.value(), 6);
        bus.publish(FEED_NEW, &UnreadCountEvent::new(Some(2), 1)).unwrap();
        assert_eq!(counter.value(), 7);
    }

    #[tokio::test]
    async fn test_listeners_hear_every_change() {
        let source = ScriptedSource::new();
        source.count(None, 3);
        let bus = EventBus::new();
        let counter = counter(&source, &bus, None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = counter.subscribe(move |v| sink.lock().push(*v));

        counter.refresh().await.unwrap();
        bus.publish(FEED_NEW, &UnreadCountEvent::new(None, 1)).unwrap();
        assert_eq!(*seen.lock(), vec![3, 4]);
    }
}
