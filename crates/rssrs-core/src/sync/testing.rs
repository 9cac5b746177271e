//! Scripted in-memory item source for exercising the sync core

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{ItemSource, UnreadSnapshot};
use crate::events::EventBus;
use crate::feed::{Item, Page, Scope};
use crate::{Error, Result};

pub(crate) fn item(id: i64, feed_id: i64, publish_time: i64) -> Item {
    Item {
        id,
        feed_id,
        feed_name: format!("feed-{}", feed_id),
        guid: id.to_string(),
        title: format!("Item {}", id),
        author: None,
        description: None,
        link: None,
        publish_time,
        unread: true,
    }
}

pub(crate) fn ids(items: &[Item]) -> Vec<i64> {
    items.iter().map(|i| i.id).collect()
}

type PageKey = (Option<i64>, Option<String>);

/// Serves pre-scripted pages and counts; optional gates hold responses back
#[derive(Default)]
pub(crate) struct ScriptedSource {
    pages: Mutex<HashMap<PageKey, Page>>,
    counts: Mutex<HashMap<Option<i64>, (u32, Option<u64>)>>,
    numbering: Mutex<Option<EventBus>>,
    page_gate: Mutex<Option<Arc<Semaphore>>>,
    count_gate: Mutex<Option<Arc<Semaphore>>>,
    fail_pages: Mutex<bool>,
    pub(crate) page_calls: Mutex<Vec<PageKey>>,
    pub(crate) marks: Mutex<Vec<(i64, bool)>>,
}

impl ScriptedSource {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn page(&self, feed_id: Option<i64>, cursor: Option<&str>, items: Vec<Item>, next: Option<&str>) {
        self.pages.lock().insert(
            (feed_id, cursor.map(str::to_string)),
            Page {
                items,
                next_cursor: next.map(str::to_string),
            },
        );
    }

    /// Counts are read when the reply is sent, not when it is requested
    pub(crate) fn count(&self, feed_id: Option<i64>, count: u32) {
        self.counts.lock().insert(feed_id, (count, None));
    }

    /// A count already including every event numbered `seq` or lower
    pub(crate) fn count_at(&self, feed_id: Option<i64>, count: u32, seq: u64) {
        self.counts.lock().insert(feed_id, (count, Some(seq)));
    }

    /// Stamp counts set with [`count`](Self::count) with the bus's latest
    /// sequence number at reply time, the way the store does
    pub(crate) fn number_counts_from(&self, bus: &EventBus) {
        *self.numbering.lock() = Some(bus.clone());
    }

    pub(crate) fn fail_pages(&self, fail: bool) {
        *self.fail_pages.lock() = fail;
    }

    /// Hold page responses until permits are released on the returned gate
    pub(crate) fn gate_pages(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.page_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn gate_counts(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.count_gate.lock() = Some(Arc::clone(&gate));
        gate
    }
}

async fn pass(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl ItemSource for ScriptedSource {
    async fn get_page(&self, scope: &Scope, cursor: Option<&str>, _limit: u32) -> Result<Page> {
        let key = (scope.feed_id, cursor.map(str::to_string));
        self.page_calls.lock().push(key.clone());

        let gate = self.page_gate.lock().clone();
        pass(gate).await;

        if *self.fail_pages.lock() {
            return Err(Error::Other("scripted page failure".to_string()));
        }
        Ok(self.pages.lock().get(&key).cloned().unwrap_or_default())
    }

    async fn get_unread_count(&self, feed_id: Option<i64>) -> Result<u32> {
        Ok(self.unread_snapshot(feed_id).await?.unread_count)
    }

    async fn unread_snapshot(&self, feed_id: Option<i64>) -> Result<UnreadSnapshot> {
        let gate = self.count_gate.lock().clone();
        pass(gate).await;

        let (unread_count, seq) = self.counts.lock().get(&feed_id).copied().unwrap_or((0, None));
        let numbered = self.numbering.lock().as_ref().map_or(0, EventBus::last_seq);
        Ok(UnreadSnapshot {
            unread_count,
            seq: seq.unwrap_or(numbered),
        })
    }

    async fn mark_item_read(&self, id: i64, unread: bool) -> Result<bool> {
        self.marks.lock().push((id, unread));
        Ok(true)
    }

    async fn mark_all_read(&self, _feed_id: Option<i64>) -> Result<bool> {
        Ok(true)
    }
}

/// Yield until spawned tasks have reached their next await point
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
