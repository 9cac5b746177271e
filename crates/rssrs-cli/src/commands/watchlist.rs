use anyhow::Result;

use rssrs_core::{sync::FeedDirectory, Backend};

pub async fn add(backend: &Backend, keywords: &[String]) -> Result<()> {
    let mut current = backend.watchlist().await?;
    current.extend(keywords.iter().cloned());
    let stored = backend.set_watchlist(&current).await?;
    print_keywords(&stored);
    Ok(())
}

pub async fn remove(backend: &Backend, keywords: &[String]) -> Result<()> {
    let removed: Vec<String> = keywords.iter().map(|k| k.trim().to_lowercase()).collect();
    let current: Vec<String> = backend
        .watchlist()
        .await?
        .into_iter()
        .filter(|k| !removed.contains(&k.to_lowercase()))
        .collect();
    let stored = backend.set_watchlist(&current).await?;
    print_keywords(&stored);
    Ok(())
}

pub async fn show(backend: &Backend) -> Result<()> {
    print_keywords(&backend.watchlist().await?);
    Ok(())
}

fn print_keywords(keywords: &[String]) {
    if keywords.is_empty() {
        println!("Watch list is empty.");
        return;
    }
    println!("Watch list ({}):", keywords.len());
    for keyword in keywords {
        println!("  - {}", keyword);
    }
}
