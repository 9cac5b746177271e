//! IPC Client for connecting to daemon
//!
//! Provides a type-safe interface for communicating with the daemon.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

use super::protocol::*;
use crate::events::{Envelope, EventBus};
use crate::feed::{Feed, Page, Scope};
use crate::sync::{FeedDirectory, ItemSource, UnreadSnapshot};
use crate::{Error, Result};

/// Client for communicating with the daemon
#[derive(Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Create a new daemon client
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Check if daemon is running by sending a ping
    pub async fn ping(&self) -> bool {
        self.call(methods::PING, serde_json::Value::Null).await.is_ok()
    }

    /// Get daemon status
    pub async fn status(&self) -> Result<StatusResponse> {
        self.call_as(methods::STATUS, serde_json::Value::Null).await
    }

    /// Add a new feed; `interval_mins` falls back to the daemon's default
    pub async fn add_feed(&self, url: &str, name: &str, interval_mins: Option<u32>) -> Result<Feed> {
        let params = serde_json::json!({
            "url": url,
            "name": name,
            "interval_mins": interval_mins
        });
        let response: FeedResponse = self.call_as(methods::FEED_ADD, params).await?;
        Ok(response.feed)
    }

    /// Rename a feed or change its URL; `None` keeps the current value
    pub async fn update_feed(&self, id: i64, name: Option<&str>, url: Option<&str>) -> Result<Feed> {
        let params = serde_json::json!({ "id": id, "name": name, "url": url });
        let response: FeedResponse = self.call_as(methods::FEED_UPDATE, params).await?;
        Ok(response.feed)
    }

    /// Delete a feed
    pub async fn delete_feed(&self, id: i64) -> Result<bool> {
        let params = serde_json::json!({ "id": id });
        let response: DeletedResponse = self.call_as(methods::FEED_DELETE, params).await?;
        Ok(response.deleted)
    }

    /// Refresh one feed or all of them
    pub async fn refresh(&self, feed_id: Option<i64>, force: bool) -> Result<RefreshResponse> {
        let params = serde_json::json!({ "id": feed_id, "force": force });
        self.call_as(methods::FEED_REFRESH, params).await
    }

    /// Replace the watch list, returning what the daemon stored
    pub async fn set_watchlist(&self, keywords: &[String]) -> Result<Vec<String>> {
        let params = serde_json::json!({ "keywords": keywords });
        let response: WatchListResponse = self.call_as(methods::WATCHLIST_SET, params).await?;
        Ok(response.keywords)
    }

    /// Republish every daemon event on `bus` until the returned forwarder is
    /// dropped or the daemon goes away.
    pub async fn forward_events(&self, bus: EventBus) -> Result<EventForwarder> {
        let (mut reader, mut writer) = self.connect().await?;
        self.exchange(&mut reader, &mut writer, methods::EVENTS_SUBSCRIBE, serde_json::Value::Null)
            .await?;

        let task = tokio::spawn(async move {
            // Keep the write half open; closing it ends push mode on the server
            let _writer = writer;
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tracing::warn!("Daemon closed the event stream");
                        break;
                    }
                    Ok(_) => match serde_json::from_str::<Envelope>(&line) {
                        Ok(envelope) => {
                            bus.publish_envelope(&envelope);
                        }
                        Err(e) => tracing::warn!("Dropping malformed event: {}", e),
                    },
                    Err(e) => {
                        tracing::warn!("Event stream failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(EventForwarder { task })
    }

    async fn connect(&self) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Transport(format!(
                "Failed to connect to daemon at {}: {}. Is the daemon running?",
                self.socket_path.display(),
                e
            ))
        })?;

        let (reader, writer) = stream.into_split();
        Ok((BufReader::new(reader), writer))
    }

    /// Write one request and read its response on an open connection
    async fn exchange(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let request = Request::new(method).with_params(params);
        let request_json = serde_json::to_string(&request)?;

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            return Err(Error::Transport("Daemon closed the connection".to_string()));
        }

        let response: Response = serde_json::from_str(&response_line)?;

        if let Some(error) = response.error {
            return Err(Error::Other(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        response.result.ok_or_else(|| Error::Other("Empty response".to_string()))
    }

    /// Send a request and receive a response
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let (mut reader, mut writer) = self.connect().await?;
        self.exchange(&mut reader, &mut writer, method, params).await
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ItemSource for DaemonClient {
    async fn get_page(&self, scope: &Scope, cursor: Option<&str>, limit: u32) -> Result<Page> {
        let params = serde_json::json!({
            "scope": scope,
            "cursor": cursor,
            "limit": limit
        });
        self.call_as(methods::ITEM_PAGE, params).await
    }

    async fn get_unread_count(&self, feed_id: Option<i64>) -> Result<u32> {
        Ok(self.unread_snapshot(feed_id).await?.unread_count)
    }

    async fn unread_snapshot(&self, feed_id: Option<i64>) -> Result<UnreadSnapshot> {
        let params = serde_json::json!({ "feed_id": feed_id });
        let response: UnreadCountResponse = self.call_as(methods::ITEM_UNREAD_COUNT, params).await?;
        Ok(UnreadSnapshot {
            unread_count: response.unread_count,
            seq: response.seq,
        })
    }

    async fn mark_item_read(&self, id: i64, unread: bool) -> Result<bool> {
        let params = serde_json::json!({ "id": id, "unread": unread });
        let response: OkResponse = self.call_as(methods::ITEM_MARK_READ, params).await?;
        Ok(response.ok)
    }

    async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<bool> {
        let params = serde_json::json!({ "feed_id": feed_id });
        let response: OkResponse = self.call_as(methods::ITEM_MARK_ALL_READ, params).await?;
        Ok(response.ok)
    }
}

#[async_trait]
impl FeedDirectory for DaemonClient {
    async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let response: FeedListResponse = self.call_as(methods::FEED_LIST, serde_json::Value::Null).await?;
        Ok(response.feeds)
    }

    async fn watchlist(&self) -> Result<Vec<String>> {
        let response: WatchListResponse =
            self.call_as(methods::WATCHLIST_GET, serde_json::Value::Null).await?;
        Ok(response.keywords)
    }
}

/// Background task republishing daemon events; stops when dropped
pub struct EventForwarder {
    task: JoinHandle<()>,
}

impl EventForwarder {
    /// Whether the daemon connection is still being read
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for EventForwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Check if daemon is reachable
pub async fn is_daemon_running(socket_path: &Path) -> bool {
    DaemonClient::new(socket_path.to_path_buf()).ping().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::watch;
    use uuid::Uuid;

    use super::*;
    use crate::backend::Backend;
    use crate::config::AppConfig;
    use crate::events::{ItemReadEvent, ITEM_UNREAD};
    use crate::feed::NewItem;
    use crate::ipc::DaemonServer;
    use crate::storage::Database;

    struct Harness {
        backend: Backend,
        client: DaemonClient,
        shutdown: watch::Sender<bool>,
        data_dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = self.shutdown.send(true);
            let _ = std::fs::remove_dir_all(&self.data_dir);
        }
    }

    async fn start() -> Harness {
        let data_dir = std::env::temp_dir().join(format!("rssrs-{}", Uuid::new_v4().simple()));
        let mut config = AppConfig::default();
        config.general.data_dir = data_dir.clone();
        config.sync.proxy = "none".to_string();
        let config = Arc::new(config);

        let backend = Backend::new(Database::new_in_memory().await.unwrap(), EventBus::new());
        let server = DaemonServer::new(backend.clone(), Arc::clone(&config)).unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move { server.run(shutdown_rx).await });

        let client = DaemonClient::new(config.socket_path());
        for _ in 0..100 {
            if client.ping().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Harness {
            backend,
            client,
            shutdown,
            data_dir,
        }
    }

    fn new_item(feed_id: i64, guid: &str, publish_time: i64) -> NewItem {
        NewItem {
            feed_id,
            guid: guid.to_string(),
            title: guid.to_string(),
            author: None,
            description: None,
            link: None,
            publish_time,
        }
    }

    #[tokio::test]
    async fn test_item_source_over_socket() {
        let h = start().await;
        let feed = h.client.add_feed("https://example.com/a.xml", "a", None).await.unwrap();
        assert_eq!(feed.interval_mins, 10);

        h.backend
            .store_items(feed.id, &[new_item(feed.id, "1", 100), new_item(feed.id, "2", 200)])
            .await
            .unwrap();

        let page = h.client.get_page(&Scope::feed(feed.id), None, 1).await.unwrap();
        assert_eq!(page.items.len(), 1);
        let cursor = page.next_cursor.clone().unwrap();
        let rest = h.client.get_page(&Scope::feed(feed.id), Some(&cursor), 1).await.unwrap();
        assert_eq!(rest.next_cursor, None);

        assert!(h.client.mark_item_read(page.items[0].id, false).await.unwrap());
        assert!(!h.client.mark_item_read(9999, false).await.unwrap());
        assert_eq!(h.client.get_unread_count(Some(feed.id)).await.unwrap(), 1);

        let feeds = h.client.list_feeds().await.unwrap();
        assert_eq!(feeds[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_update_feed_and_numbered_count() {
        let h = start().await;
        let feed = h.client.add_feed("https://example.com/a.xml", "a", None).await.unwrap();

        let updated = h.client.update_feed(feed.id, Some("b"), None).await.unwrap();
        assert_eq!(updated.name, "b");
        assert_eq!(updated.url, feed.url);
        assert!(h.client.update_feed(9999, Some("c"), None).await.is_err());

        h.backend.store_items(feed.id, &[new_item(feed.id, "1", 100)]).await.unwrap();
        let snapshot = h.client.unread_snapshot(Some(feed.id)).await.unwrap();
        assert_eq!(snapshot.unread_count, 1);
        assert_eq!(snapshot.seq, h.backend.bus().last_seq());
    }

    #[tokio::test]
    async fn test_bad_cursor_is_an_rpc_error() {
        let h = start().await;
        let err = h.client.get_page(&Scope::all(), Some("???"), 10).await.unwrap_err();
        assert!(err.to_string().contains(&ERR_INVALID_PARAMS.to_string()));
    }

    #[tokio::test]
    async fn test_forwarded_events_reach_local_bus() {
        let h = start().await;
        let local = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = local.subscribe(ITEM_UNREAD, move |e: &ItemReadEvent| sink.lock().push(*e));

        let forwarder = h.client.forward_events(local.clone()).await.unwrap();
        assert!(forwarder.is_active());

        h.client.mark_all_read(None).await.unwrap();
        for _ in 0..100 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(*seen.lock(), vec![ItemReadEvent::all(false)]);
    }

    #[tokio::test]
    async fn test_unreachable_daemon() {
        let client = DaemonClient::new(std::env::temp_dir().join("rssrs-missing.sock"));
        assert!(!client.ping().await);
        assert!(matches!(
            client.get_unread_count(None).await,
            Err(Error::Transport(_))
        ));
    }
}
