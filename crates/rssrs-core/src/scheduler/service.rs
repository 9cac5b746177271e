use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::config::AppConfig;
use crate::feed::FeedFetcher;
use crate::Result;

use super::tasks::{refresh_feeds, RefreshSummary};

/// Events emitted by the scheduler after each pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A refresh pass finished
    FeedsRefreshed { new_items: u32, failed: u32 },
    /// A background task failed as a whole
    Error { task: String, message: String },
}

/// Background service that refreshes due feeds on a fixed tick
pub struct SchedulerService {
    backend: Backend,
    fetcher: FeedFetcher,
    config: Arc<AppConfig>,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl SchedulerService {
    pub fn new(backend: Backend, config: Arc<AppConfig>) -> Result<Self> {
        Ok(Self {
            backend,
            fetcher: FeedFetcher::new(&config)?,
            config,
            event_tx: None,
        })
    }

    /// Set the event sender for pass notifications
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send_event(&self, event: SchedulerEvent) {
        if let Some(ref tx) = self.event_tx {
            if tx.send(event).is_err() {
                warn!("Failed to send scheduler event: receiver dropped");
            }
        }
    }

    /// Run refresh passes until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let refresh_secs = self.config.sync.refresh_interval_secs;

        if refresh_secs == 0 {
            info!("Background scheduler disabled (refresh_interval_secs = 0)");
            let _ = shutdown.changed().await;
            return;
        }

        info!("Scheduler started: tick={}s", refresh_secs);

        // The first tick fires immediately, so due feeds refresh on startup
        let mut ticker = tokio::time::interval(Duration::from_secs(refresh_secs));

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Scheduler received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    debug!("Running scheduled feed refresh");
                    if let Err(e) = self.refresh(false).await {
                        error!("Scheduled refresh failed: {}", e);
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Run a refresh pass now; `force` ignores per-feed intervals
    pub async fn refresh(&self, force: bool) -> Result<RefreshSummary> {
        match refresh_feeds(&self.backend, &self.fetcher, force).await {
            Ok(summary) => {
                self.send_event(SchedulerEvent::FeedsRefreshed {
                    new_items: summary.new_items,
                    failed: summary.failed,
                });
                Ok(summary)
            }
            Err(e) => {
                self.send_event(SchedulerEvent::Error {
                    task: "refresh".to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
