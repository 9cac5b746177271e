use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rssrs_core::{storage::Database, AppConfig, Backend, EventBus};

mod commands;

#[derive(Parser)]
#[command(name = "rssrs")]
#[command(author, version, about = "A headless feed reader with live-updating item lists")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Subscribe to a feed (shorthand for `subscribe`)
    #[arg(short = 's', long = "subscribe")]
    subscribe_url: Option<String>,

    /// Name for the subscription (used with -s)
    #[arg(short = 'n', long = "name")]
    subscribe_name: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a feed
    Subscribe {
        /// Feed URL
        #[arg(short = 'u', long)]
        url: String,
        /// Local name for the subscription
        #[arg(short = 'n', long)]
        name: String,
        /// Refresh period in minutes
        #[arg(short = 'i', long)]
        interval: Option<u32>,
    },
    /// Unsubscribe from a feed
    Unsubscribe {
        /// Name of the subscription to remove
        name: String,
    },
    /// Rename a subscription or change its URL
    Edit {
        /// Current name of the subscription
        name: String,
        /// New local name
        #[arg(short = 'n', long = "name")]
        new_name: Option<String>,
        /// New feed URL
        #[arg(short = 'u', long)]
        url: Option<String>,
    },
    /// List all subscriptions
    List,
    /// Print items, newest first
    Items {
        /// Only items of this subscription
        #[arg(short = 'f', long)]
        feed: Option<String>,
        /// Only items whose title or description contains this text
        #[arg(short = 'q', long)]
        search: Option<String>,
        /// Only unread items
        #[arg(short = 'u', long)]
        unread: bool,
        /// Number of pages to load
        #[arg(short = 'p', long, default_value_t = 1)]
        pages: u32,
    },
    /// Mark an item read
    Read { id: i64 },
    /// Mark an item unread
    Unread { id: i64 },
    /// Mark a subscription (or everything) read
    ReadAll {
        #[arg(short = 'f', long)]
        feed: Option<String>,
    },
    /// Open an item's link in the browser and mark it read
    Open { id: i64 },
    /// Refresh all feeds now, or a single one
    Refresh {
        /// Only this subscription
        #[arg(short = 'f', long)]
        feed: Option<String>,
    },
    /// Follow a live item list through the daemon
    Watch {
        #[arg(short = 'f', long)]
        feed: Option<String>,
    },
    /// Manage watch-list keywords
    Watchlist {
        #[command(subcommand)]
        action: Option<WatchlistAction>,
    },
    /// Background daemon serving clients and refreshing feeds
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum WatchlistAction {
    /// Add keywords
    Add { keywords: Vec<String> },
    /// Remove keywords
    Remove { keywords: Vec<String> },
    /// Show keywords
    Show,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the background daemon
    Start,
    /// Stop the background daemon
    Stop,
    /// Check daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Commands that talk to the daemon never open the database themselves
    match cli.command {
        Some(Commands::Watch { feed }) => return commands::watch::run(&config, feed.as_deref()).await,
        Some(Commands::Daemon { action }) => {
            return match action {
                DaemonAction::Start => commands::daemon::start(config).await,
                DaemonAction::Stop => commands::daemon::stop(&config).await,
                DaemonAction::Status => commands::daemon::status(&config).await,
            }
        }
        _ => {}
    }

    let db = Database::new(&config).await?;
    let backend = Backend::new(db, EventBus::new());

    // Handle shorthand subscription (-s -n flags)
    if let (Some(url), Some(name)) = (cli.subscribe_url, cli.subscribe_name) {
        return commands::subscribe::run(&backend, &config, &url, &name, None).await;
    }

    match cli.command {
        Some(Commands::Subscribe { url, name, interval }) => {
            commands::subscribe::run(&backend, &config, &url, &name, interval).await
        }
        Some(Commands::Unsubscribe { name }) => commands::unsubscribe::run(&backend, &name).await,
        Some(Commands::Edit {
            name,
            new_name,
            url,
        }) => commands::edit::run(&backend, &name, new_name.as_deref(), url.as_deref()).await,
        Some(Commands::List) | None => commands::list::run(&backend).await,
        Some(Commands::Items {
            feed,
            search,
            unread,
            pages,
        }) => {
            let options = commands::items::ItemsOptions {
                feed,
                search,
                unread_only: unread,
                pages,
            };
            commands::items::run(&backend, &config, options).await
        }
        Some(Commands::Read { id }) => commands::mark::item(&backend, id, false).await,
        Some(Commands::Unread { id }) => commands::mark::item(&backend, id, true).await,
        Some(Commands::ReadAll { feed }) => commands::mark::all(&backend, feed.as_deref()).await,
        Some(Commands::Open { id }) => commands::mark::open(&backend, id).await,
        Some(Commands::Refresh { feed }) => {
            commands::refresh::run(&backend, &config, feed.as_deref()).await
        }
        Some(Commands::Watchlist { action }) => match action {
            Some(WatchlistAction::Add { keywords }) => {
                commands::watchlist::add(&backend, &keywords).await
            }
            Some(WatchlistAction::Remove { keywords }) => {
                commands::watchlist::remove(&backend, &keywords).await
            }
            Some(WatchlistAction::Show) | None => commands::watchlist::show(&backend).await,
        },
        // Handled before the database is opened
        Some(Commands::Watch { .. }) | Some(Commands::Daemon { .. }) => Ok(()),
    }
}
