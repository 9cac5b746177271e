use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};

use rssrs_core::{
    feed::{CoverFilter, Item, Scope},
    sync::{FeedDirectory, ItemPager},
    AppConfig, Backend,
};

use super::feed_by_name;

const EXCERPT_LEN: usize = 160;

pub struct ItemsOptions {
    pub feed: Option<String>,
    pub search: Option<String>,
    pub unread_only: bool,
    pub pages: u32,
}

pub async fn run(backend: &Backend, config: &AppConfig, options: ItemsOptions) -> Result<()> {
    let mut scope = match options.feed.as_deref() {
        Some(name) => Scope::feed(feed_by_name(backend, name).await?.id),
        None => Scope::all(),
    };
    if let Some(search) = options.search {
        scope = scope.with_search(search);
    }
    scope = scope.unread_only(options.unread_only);

    let pager = ItemPager::new(Arc::new(backend.clone()), scope, config.sync.page_size);
    for _ in 0..options.pages.max(1) {
        pager.load_more().await?;
        if !pager.more() {
            break;
        }
    }

    if pager.is_empty() {
        println!("No items.");
        return Ok(());
    }

    let covers = CoverFilter::new(&config.cover)?;
    let keywords = backend.watchlist().await?;
    for item in pager.items() {
        print_item(&item, &covers, &item.matched_keywords(&keywords));
    }

    if pager.more() {
        println!("More items available; pass --pages {} to see them.", options.pages + 1);
    }

    Ok(())
}

/// One item as a short block: header line, optional cover and excerpt
pub(crate) fn print_item<S: AsRef<str>>(item: &Item, covers: &CoverFilter, matched: &[S]) {
    let marker = if item.unread { "*" } else { " " };
    let date = DateTime::from_timestamp(item.publish_time, 0)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    println!("{} [{}] {} {} - {}", marker, item.id, date, item.feed_name, item.title);

    if !matched.is_empty() {
        let matched: Vec<&str> = matched.iter().map(AsRef::as_ref).collect();
        println!("    watch: {}", matched.join(", "));
    }
    if let Some(cover) = item.description.as_deref().and_then(|d| covers.first_image(d)) {
        println!("    cover: {}", cover);
    }
    let excerpt = item.excerpt(EXCERPT_LEN);
    if !excerpt.is_empty() {
        println!("    {}", excerpt);
    }
}
