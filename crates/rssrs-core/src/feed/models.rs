use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A subscribed feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Refresh period in minutes
    pub interval_mins: u32,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_fetch_ok: Option<bool>,
    /// Computed field (not stored in DB)
    #[serde(default)]
    pub unread_count: u32,
}

/// Data required to create a new feed
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
    pub interval_mins: u32,
}

/// A single feed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub feed_name: String,
    pub guid: String,
    pub title: String,
    pub author: Option<String>,
    /// Raw markup as published by the feed
    pub description: Option<String>,
    pub link: Option<String>,
    /// Unix seconds
    pub publish_time: i64,
    pub unread: bool,
}

/// Data required to insert a new item
#[derive(Debug, Clone)]
pub struct NewItem {
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub publish_time: i64,
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Item>,
    /// `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

/// Which subset of items a list view displays
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// `None` is the aggregate view over all feeds
    pub feed_id: Option<i64>,
    pub search: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn feed(feed_id: i64) -> Self {
        Self {
            feed_id: Some(feed_id),
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = if search.trim().is_empty() {
            None
        } else {
            Some(search)
        };
        self
    }

    pub fn unread_only(mut self, unread_only: bool) -> Self {
        self.unread_only = unread_only;
        self
    }
}

impl Item {
    /// Display order: newest first, ties broken by ascending id
    pub fn display_order(a: &Item, b: &Item) -> Ordering {
        b.publish_time
            .cmp(&a.publish_time)
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Plain-text rendering of the description, truncated to `max_len` bytes
    pub fn excerpt(&self, max_len: usize) -> String {
        let text = self
            .description
            .as_deref()
            .map(|html| {
                html2text::from_read(html.as_bytes(), 80).unwrap_or_else(|_| html.to_string())
            })
            .unwrap_or_default();
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

        if text.len() <= max_len {
            return text;
        }

        let mut end = 0;
        for (idx, ch) in text.char_indices() {
            let next = idx + ch.len_utf8();
            if next > max_len {
                break;
            }
            end = next;
        }
        format!("{}...", &text[..end])
    }

    /// Watch-list keywords that occur in the title, case-insensitively
    pub fn matched_keywords<'k>(&self, keywords: &'k [String]) -> Vec<&'k str> {
        let title = self.title.to_lowercase();
        keywords
            .iter()
            .filter(|k| !k.is_empty() && title.contains(&k.to_lowercase()))
            .map(String::as_str)
            .collect()
    }
}

impl Feed {
    /// Whether the feed is due for a refresh at `now`
    pub fn should_fetch(&self, now: DateTime<Utc>) -> bool {
        match self.last_fetched_at {
            Some(last) => last + Duration::minutes(i64::from(self.interval_mins)) <= now,
            None => true,
        }
    }

    /// Check if the last fetch failed
    pub fn has_error(&self) -> bool {
        self.last_fetch_ok == Some(false)
    }
}
