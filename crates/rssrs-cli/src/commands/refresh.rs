use anyhow::Result;

use rssrs_core::{
    feed::FeedFetcher,
    scheduler::{refresh_feed, refresh_feeds},
    AppConfig, Backend,
};

use super::feed_by_name;

/// Refresh every feed, or only the one named `feed`
pub async fn run(backend: &Backend, config: &AppConfig, feed: Option<&str>) -> Result<()> {
    let fetcher = FeedFetcher::new(config)?;

    if let Some(name) = feed {
        let feed = feed_by_name(backend, name).await?;
        println!("Refreshing '{}'...", feed.name);
        let created = refresh_feed(backend, &fetcher, &feed).await?;
        println!("Refresh complete. {} new items.", created);
        return Ok(());
    }

    println!("Refreshing all feeds...\n");
    let summary = refresh_feeds(backend, &fetcher, true).await?;

    println!(
        "\nRefresh complete. {} new items from {} feeds.",
        summary.new_items, summary.attempted
    );
    if summary.failed > 0 {
        println!("{} feeds failed; see 'rssrs list'.", summary.failed);
    }

    Ok(())
}
