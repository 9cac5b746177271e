use anyhow::{anyhow, Result};

use rssrs_core::{storage::ItemRepository, sync::ItemSource, Backend};

use super::feed_by_name;

pub async fn item(backend: &Backend, id: i64, unread: bool) -> Result<()> {
    if !backend.mark_item_read(id, unread).await? {
        return Err(anyhow!("Item {} not found.", id));
    }
    println!("Marked item {} {}.", id, if unread { "unread" } else { "read" });
    Ok(())
}

pub async fn all(backend: &Backend, feed: Option<&str>) -> Result<()> {
    let feed_id = match feed {
        Some(name) => Some(feed_by_name(backend, name).await?.id),
        None => None,
    };
    backend.mark_all_read(feed_id).await?;

    match feed {
        Some(name) => println!("Marked all items in '{}' read.", name),
        None => println!("Marked all items read."),
    }
    Ok(())
}

pub async fn open(backend: &Backend, id: i64) -> Result<()> {
    let item = ItemRepository::new(backend.db())
        .find_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("Item {} not found.", id))?;
    let link = item
        .link
        .as_deref()
        .ok_or_else(|| anyhow!("Item {} has no link.", id))?;

    open::that(link)?;
    println!("Opened {}", link);

    backend.mark_item_read(id, false).await?;
    Ok(())
}
