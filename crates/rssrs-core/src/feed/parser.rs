use chrono::Utc;
use feed_rs::parser;

use super::models::NewItem;
use crate::{Error, Result};

/// Parsed feed data from RSS/Atom content
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<NewItem>,
}

/// Parse RSS/Atom feed content into items for `feed_id`
pub fn parse_feed(content: &[u8], feed_id: i64) -> Result<ParsedFeed> {
    let feed = parser::parse(content).map_err(|e| Error::FeedParse(e.to_string()))?;

    let title = feed.title.map(|t| t.content);
    let fetched_at = Utc::now().timestamp();

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());

            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            let author = entry.authors.first().map(|a| a.name.clone());

            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));

            // Entries without a date sort as if published when first seen
            let publish_time = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp())
                .unwrap_or(fetched_at);

            NewItem {
                feed_id,
                guid: entry.id,
                title,
                author,
                description,
                link,
                publish_time,
            }
        })
        .collect();

    Ok(ParsedFeed { title, items })
}
