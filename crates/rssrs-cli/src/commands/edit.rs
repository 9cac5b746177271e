use anyhow::{bail, Result};

use rssrs_core::Backend;

use super::feed_by_name;

pub async fn run(
    backend: &Backend,
    name: &str,
    new_name: Option<&str>,
    url: Option<&str>,
) -> Result<()> {
    if new_name.is_none() && url.is_none() {
        bail!("Nothing to change; pass --name and/or --url");
    }

    let feed = feed_by_name(backend, name).await?;
    if let Some(new_name) = new_name.filter(|n| *n != feed.name) {
        if backend.find_feed(new_name).await?.is_some() {
            bail!("A subscription named '{}' already exists.", new_name);
        }
    }

    let updated = backend.update_feed(feed.id, new_name, url).await?;
    println!("Updated subscription {}: {} ({})", updated.id, updated.name, updated.url);

    Ok(())
}
