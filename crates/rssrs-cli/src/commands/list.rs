use anyhow::Result;

use rssrs_core::{sync::FeedDirectory, Backend};

pub async fn run(backend: &Backend) -> Result<()> {
    let feeds = backend.list_feeds().await?;

    if feeds.is_empty() {
        println!("No subscriptions yet.");
        println!("\nTo subscribe to a feed, run:");
        println!("  rssrs -s <url> -n <name>");
        return Ok(());
    }

    println!("Subscriptions ({}):\n", feeds.len());

    for feed in &feeds {
        let unread = if feed.unread_count > 0 {
            format!(" ({} unread)", feed.unread_count)
        } else {
            String::new()
        };
        let error = if feed.has_error() { " [last fetch failed]" } else { "" };

        println!("  {} [{}]{}{}", feed.name, feed.id, unread, error);
        println!("    URL: {}", feed.url);
        println!("    Every {} minutes", feed.interval_mins);
        if let Some(last) = feed.last_fetched_at {
            println!("    Last fetched: {}", last.format("%Y-%m-%d %H:%M"));
        }
        println!();
    }

    Ok(())
}
