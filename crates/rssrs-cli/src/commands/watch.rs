use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use rssrs_core::{
    feed::{CoverFilter, Scope},
    ipc::DaemonClient,
    sync::{FeedDirectory, FeedList, ListView, ViewChange, WatchList},
    AppConfig, EventBus,
};

use super::items::print_item;

const HELP: &str = "Commands: r reload, m more, x ID mark read, u ID mark unread, a mark all read, f feeds, q quit";

pub async fn run(config: &AppConfig, feed: Option<&str>) -> Result<()> {
    let client = DaemonClient::new(config.socket_path());
    if !client.ping().await {
        bail!("Daemon is not running. Start it with 'rssrs daemon start'.");
    }

    let bus = EventBus::new();
    let forwarder = client.forward_events(bus.clone()).await?;

    let directory: Arc<dyn FeedDirectory> = Arc::new(client.clone());
    let feeds = FeedList::new(Arc::clone(&directory), &bus);
    let watchlist = WatchList::new(directory, &bus);
    let (loaded_feeds, loaded_keywords) = tokio::join!(feeds.refresh(), watchlist.refresh());
    loaded_feeds?;
    loaded_keywords?;

    let scope = match feed {
        Some(name) => {
            let feed = feeds
                .feeds()
                .into_iter()
                .find(|f| f.name == name)
                .ok_or_else(|| anyhow!("Feed '{}' not found.", name))?;
            Scope::feed(feed.id)
        }
        None => Scope::all(),
    };

    let view = ListView::new(Arc::new(client), &bus, scope, config.sync.page_size);
    let _changes = view.subscribe(|change| match change {
        ViewChange::UnreadCount(count) => println!("-- {} unread", count),
        ViewChange::PendingReload(Some(pending)) => {
            println!("-- {} new items, type 'r' to reload", pending.new_items)
        }
        ViewChange::PendingReload(None) | ViewChange::Items => {}
    });
    view.open().await?;

    let covers = CoverFilter::new(&config.cover)?;
    let render = |view: &ListView| {
        for item in view.items() {
            print_item(&item, &covers, &watchlist.matches(&item));
        }
        let more = if view.more() { ", 'm' for more" } else { "" };
        println!("-- {} items, {} unread{}", view.items().len(), view.unread_count(), more);
    };

    render(&view);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let command = parts.next();
        let id = parts.next().and_then(|s| s.parse::<i64>().ok());

        let outcome = match (command, id) {
            (Some("q"), _) => break,
            (Some("r"), _) => view.reload().await.map(|_| render(&view)),
            (Some("m"), _) if !view.more() => {
                println!("No more items.");
                Ok(())
            }
            (Some("m"), _) => view.load_more().await.map(|_| render(&view)),
            (Some(mark @ ("x" | "u")), Some(id)) => {
                view.mark_read(id, mark == "u").await.map(|found| {
                    if !found {
                        println!("Item {} not found.", id);
                    }
                })
            }
            (Some("a"), _) => view.mark_all_read().await.map(|_| ()),
            (Some("f"), _) => {
                for feed in feeds.feeds() {
                    println!("  {} [{}] {} unread", feed.name, feed.id, feed.unread_count);
                }
                Ok(())
            }
            (None, _) => Ok(()),
            _ => {
                println!("{}", HELP);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            println!("Error: {}", e);
        }
        if !forwarder.is_active() {
            warn!("Event stream closed");
            println!("Lost the daemon's event stream; the list no longer updates.");
        }
    }

    Ok(())
}
