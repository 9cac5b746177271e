use anyhow::Result;

use rssrs_core::{
    feed::{FeedFetcher, NewFeed},
    scheduler::refresh_feed,
    AppConfig, Backend,
};

pub async fn run(
    backend: &Backend,
    config: &AppConfig,
    url: &str,
    name: &str,
    interval_mins: Option<u32>,
) -> Result<()> {
    println!("Subscribing to feed: {}", url);

    if backend.find_feed(name).await?.is_some() {
        println!("A subscription named '{}' already exists.", name);
        return Ok(());
    }

    let new_feed = NewFeed {
        url: url.to_string(),
        name: name.to_string(),
        interval_mins: interval_mins.unwrap_or(config.sync.default_feed_interval_mins),
    };
    let feed = backend.add_feed(&new_feed).await?;
    println!(
        "Created subscription: {} ({}), refreshed every {} minutes",
        name, feed.id, feed.interval_mins
    );

    // Fetch initial items
    println!("Fetching items...");
    let fetcher = FeedFetcher::new(config)?;
    match refresh_feed(backend, &fetcher, &feed).await {
        Ok(count) => println!("Successfully fetched {} items from '{}'", count, name),
        Err(e) => {
            println!("Warning: Failed to fetch items: {}", e);
            println!("The subscription was created, but initial fetch failed.");
            println!("Try running 'rssrs refresh' later.");
        }
    }

    Ok(())
}
