use anyhow::Result;

use rssrs_core::{sync::FeedDirectory, Backend};

pub async fn run(backend: &Backend, name: &str) -> Result<()> {
    match backend.find_feed(name).await? {
        Some(feed) => {
            backend.delete_feed(feed.id).await?;
            println!("Unsubscribed from: {}", name);
        }
        None => {
            println!("Feed '{}' not found.", name);
            println!("\nAvailable subscriptions:");
            for f in backend.list_feeds().await? {
                println!("  - {}", f.name);
            }
        }
    }

    Ok(())
}
