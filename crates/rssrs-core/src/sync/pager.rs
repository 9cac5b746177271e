//! Cursor-driven pagination into a deduplicated, ordered item collection

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::observe::{ListenerGuard, Listeners};
use super::ItemSource;
use crate::feed::{Item, Scope};
use crate::Result;

/// What changed in a pager's collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerChange {
    /// The collection was cleared or replaced wholesale
    Replaced,
    /// A page was merged in
    Merged,
    /// Items were patched in place
    Patched,
}

#[derive(Default)]
struct PagerState {
    scope: Scope,
    /// Bumped on every reset; a fetch issued under an older epoch is discarded
    epoch: u64,
    items: Vec<Item>,
    cursor: Option<String>,
    more: bool,
    /// The next accepted page replaces the collection instead of merging
    replace_next: bool,
}

/// Paginated view of the items in one scope
#[derive(Clone)]
pub struct ItemPager {
    source: Arc<dyn ItemSource>,
    page_size: u32,
    state: Arc<Mutex<PagerState>>,
    listeners: Listeners<PagerChange>,
}

impl ItemPager {
    pub fn new(source: Arc<dyn ItemSource>, scope: Scope, page_size: u32) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            state: Arc::new(Mutex::new(PagerState {
                scope,
                more: true,
                ..PagerState::default()
            })),
            listeners: Listeners::new(),
        }
    }

    pub fn items(&self) -> Vec<Item> {
        self.state.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether another page may exist for the current scope
    pub fn more(&self) -> bool {
        self.state.lock().more
    }

    pub fn scope(&self) -> Scope {
        self.state.lock().scope.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&PagerChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Fetch the next page and merge it. Returns `false` when nothing was
    /// applied: the scope is exhausted or the page arrived after a reset.
    pub async fn load_more(&self) -> Result<bool> {
        let (scope, cursor, epoch) = {
            let state = self.state.lock();
            if !state.more {
                return Ok(false);
            }
            (state.scope.clone(), state.cursor.clone(), state.epoch)
        };

        let page = self
            .source
            .get_page(&scope, cursor.as_deref(), self.page_size)
            .await?;

        let change = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                tracing::debug!(
                    issued = epoch,
                    current = state.epoch,
                    "Discarding page fetched before a reset"
                );
                return Ok(false);
            }

            let change = if state.replace_next {
                state.replace_next = false;
                state.items = merge(Vec::new(), page.items);
                PagerChange::Replaced
            } else {
                let current = std::mem::take(&mut state.items);
                state.items = merge(current, page.items);
                PagerChange::Merged
            };

            state.more = page.next_cursor.is_some();
            state.cursor = page.next_cursor;
            tracing::debug!(len = state.items.len(), more = state.more, "Page applied");
            change
        };

        self.listeners.notify(&change);
        Ok(true)
    }

    /// Start over from the first page. Items stay visible until it arrives.
    pub async fn reload(&self) -> Result<bool> {
        {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.cursor = None;
            state.more = true;
            state.replace_next = true;
        }
        self.load_more().await
    }

    /// Switch scope, dropping the collection; the first page of the new scope
    /// is fetched. An unchanged scope is a no-op.
    pub async fn set_scope(&self, scope: Scope) -> Result<bool> {
        if !self.reset_scope(scope) {
            return Ok(false);
        }
        self.load_more().await
    }

    pub(crate) fn reset_scope(&self, scope: Scope) -> bool {
        {
            let mut state = self.state.lock();
            if state.scope == scope {
                return false;
            }
            tracing::debug!(?scope, "Pager scope changed");
            state.scope = scope;
            state.epoch += 1;
            state.items.clear();
            state.cursor = None;
            state.more = true;
            state.replace_next = true;
        }
        self.listeners.notify(&PagerChange::Replaced);
        true
    }

    /// Mutate items in place; listeners hear about it when `patch` reports a change
    pub(crate) fn patch<F>(&self, patch: F) -> bool
    where
        F: FnOnce(&mut [Item]) -> bool,
    {
        let changed = patch(&mut self.state.lock().items);
        if changed {
            self.listeners.notify(&PagerChange::Patched);
        }
        changed
    }
}

/// Union by id (incoming wins), in display order
fn merge(current: Vec<Item>, incoming: Vec<Item>) -> Vec<Item> {
    let mut by_id: HashMap<i64, Item> = current.into_iter().map(|i| (i.id, i)).collect();
    for item in incoming {
        by_id.insert(item.id, item);
    }

    let mut items: Vec<Item> = by_id.into_values().collect();
    items.sort_by(Item::display_order);
    items
}
