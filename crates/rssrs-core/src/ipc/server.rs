//! IPC Server for daemon
//!
//! Listens on Unix socket and handles client requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::*;
use crate::backend::Backend;
use crate::config::AppConfig;
use crate::events::{Envelope, ALL_CHANNELS};
use crate::feed::{FeedFetcher, NewFeed};
use crate::scheduler::tasks;
use crate::sync::{FeedDirectory, ItemSource};
use crate::{Error, Result};

/// Maximum number of concurrent IPC requests to prevent connection pool exhaustion
const MAX_CONCURRENT_REQUESTS: usize = 10;

/// Events queued for one push-mode client before it is dropped as too slow
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Shared by every connection
struct ServerContext {
    backend: Backend,
    fetcher: FeedFetcher,
    config: Arc<AppConfig>,
    start_time: Instant,
    request_semaphore: Semaphore,
}

/// IPC Server that handles client connections
pub struct DaemonServer {
    context: Arc<ServerContext>,
    socket_path: PathBuf,
}

impl DaemonServer {
    pub fn new(backend: Backend, config: Arc<AppConfig>) -> Result<Self> {
        let socket_path = config.socket_path();
        Ok(Self {
            context: Arc::new(ServerContext {
                backend,
                fetcher: FeedFetcher::new(&config)?,
                config,
                start_time: Instant::now(),
                request_semaphore: Semaphore::new(MAX_CONCURRENT_REQUESTS),
            }),
            socket_path,
        })
    }

    /// Run the IPC server
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        // Remove old socket file if exists
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on: {}", self.socket_path.display());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let context = Arc::clone(&self.context);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, context).await {
                                    warn!("Error handling connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("IPC server shutting down");
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_connection(stream: UnixStream, context: Arc<ServerContext>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // Connection closed
        }

        let request = match serde_json::from_str::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                let response = Response::error(Uuid::nil(), ERR_PARSE, format!("Parse error: {}", e));
                write_line(&mut writer, &response).await?;
                continue;
            }
        };
        debug!("Received request: {} (id: {})", request.method, request.id);

        if request.method == methods::EVENTS_SUBSCRIBE {
            return push_events(request.id, reader, writer, &context).await;
        }

        let response = {
            let _permit = context
                .request_semaphore
                .acquire()
                .await
                .map_err(|e| Error::Other(format!("Failed to acquire semaphore: {}", e)))?;
            handle_request(request, &context).await
        };

        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

/// Forward every bus event to the client until it disconnects
///
/// The subscription is in place before the acknowledgement is written, so the
/// client sees every event published after it reads the ack. A client that
/// lets [`EVENT_QUEUE_CAPACITY`] events pile up is disconnected.
async fn push_events(
    id: Uuid,
    mut reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    context: &ServerContext,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Envelope>(EVENT_QUEUE_CAPACITY);
    let overflow = Arc::new(Notify::new());
    let full = Arc::clone(&overflow);
    let _subscription = context.backend.bus().subscribe_all(move |envelope: &Envelope| {
        match tx.try_send(envelope.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => full.notify_one(),
            // The receiver only goes away with the connection
            Err(TrySendError::Closed(_)) => {}
        }
    });
    write_line(&mut writer, &Response::ok(id)).await?;
    info!("Event subscriber connected");

    let mut discard = String::new();
    loop {
        tokio::select! {
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                // A full queue means this write is not going anywhere soon
                tokio::select! {
                    written = write_line(&mut writer, &envelope) => {
                        if let Err(e) = written {
                            debug!("Event subscriber went away: {}", e);
                            break;
                        }
                    }
                    _ = overflow.notified() => {
                        warn!(
                            "Event subscriber fell {} events behind, disconnecting",
                            EVENT_QUEUE_CAPACITY
                        );
                        break;
                    }
                }
            }
            read = reader.read_line(&mut discard) => {
                // Anything other than EOF is ignored in push mode
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => discard.clear(),
                }
            }
        }
    }

    info!("Event subscriber disconnected");
    Ok(())
}

/// Missing params read as an empty object
fn parse_params<T: serde::de::DeserializeOwned>(
    id: Uuid,
    params: serde_json::Value,
) -> std::result::Result<T, Response> {
    let params = if params.is_null() { serde_json::json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| Response::error(id, ERR_INVALID_PARAMS, e.to_string()))
}

fn respond<T: Serialize>(id: Uuid, result: Result<T>) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::error(id, ERR_INTERNAL, e.to_string()),
        },
        Err(e @ Error::InvalidCursor(_)) => Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
        Err(e @ (Error::FeedNotFound(_) | Error::ItemNotFound(_))) => {
            Response::error(id, ERR_NOT_FOUND, e.to_string())
        }
        Err(e) => Response::error(id, ERR_INTERNAL, e.to_string()),
    }
}

async fn handle_request(request: Request, context: &ServerContext) -> Response {
    match dispatch(request, context).await {
        Ok(response) | Err(response) => response,
    }
}

async fn dispatch(request: Request, context: &ServerContext) -> std::result::Result<Response, Response> {
    let id = request.id;
    let backend = &context.backend;

    let response = match request.method.as_str() {
        methods::PING => Response::ok(id),

        methods::STATUS => respond(
            id,
            Ok(StatusResponse {
                running: true,
                uptime_secs: context.start_time.elapsed().as_secs(),
                scheduler_running: context.config.sync.refresh_interval_secs > 0,
                event_subscribers: backend.bus().subscriber_count(ALL_CHANNELS),
            }),
        ),

        methods::ITEM_PAGE => {
            let params: ItemPageParams = parse_params(id, request.params)?;
            let limit = params.limit.unwrap_or(context.config.sync.page_size);
            respond(
                id,
                backend
                    .get_page(&params.scope, params.cursor.as_deref(), limit)
                    .await,
            )
        }

        methods::ITEM_UNREAD_COUNT => {
            let params: FeedScopeParams = parse_params(id, request.params)?;
            respond(
                id,
                backend
                    .unread_snapshot(params.feed_id)
                    .await
                    .map(|snapshot| UnreadCountResponse {
                        unread_count: snapshot.unread_count,
                        seq: snapshot.seq,
                    }),
            )
        }

        methods::ITEM_MARK_READ => {
            let params: MarkReadParams = parse_params(id, request.params)?;
            respond(
                id,
                backend
                    .mark_item_read(params.id, params.unread)
                    .await
                    .map(|ok| OkResponse { ok }),
            )
        }

        methods::ITEM_MARK_ALL_READ => {
            let params: FeedScopeParams = parse_params(id, request.params)?;
            respond(
                id,
                backend
                    .mark_all_read(params.feed_id)
                    .await
                    .map(|ok| OkResponse { ok }),
            )
        }

        methods::FEED_LIST => respond(
            id,
            backend.list_feeds().await.map(|feeds| FeedListResponse { feeds }),
        ),

        methods::FEED_ADD => {
            let params: FeedAddParams = parse_params(id, request.params)?;
            let new_feed = NewFeed {
                url: params.url,
                name: params.name,
                interval_mins: params
                    .interval_mins
                    .unwrap_or(context.config.sync.default_feed_interval_mins),
            };
            respond(
                id,
                backend.add_feed(&new_feed).await.map(|feed| FeedResponse { feed }),
            )
        }

        methods::FEED_UPDATE => {
            let params: FeedUpdateParams = parse_params(id, request.params)?;
            respond(
                id,
                backend
                    .update_feed(params.id, params.name.as_deref(), params.url.as_deref())
                    .await
                    .map(|feed| FeedResponse { feed }),
            )
        }

        methods::FEED_DELETE => {
            let params: FeedIdParams = parse_params(id, request.params)?;
            respond(
                id,
                backend
                    .delete_feed(params.id)
                    .await
                    .map(|deleted| DeletedResponse { deleted }),
            )
        }

        methods::FEED_REFRESH => {
            let params: FeedRefreshParams = parse_params(id, request.params)?;
            respond(id, refresh(context, params).await)
        }

        methods::WATCHLIST_GET => respond(
            id,
            backend
                .watchlist()
                .await
                .map(|keywords| WatchListResponse { keywords }),
        ),

        methods::WATCHLIST_SET => {
            let params: WatchListParams = parse_params(id, request.params)?;
            respond(
                id,
                backend
                    .set_watchlist(&params.keywords)
                    .await
                    .map(|keywords| WatchListResponse { keywords }),
            )
        }

        _ => Response::error(id, ERR_METHOD_NOT_FOUND, "Method not found"),
    };

    Ok(response)
}

async fn refresh(context: &ServerContext, params: FeedRefreshParams) -> Result<RefreshResponse> {
    let backend = &context.backend;

    let Some(feed_id) = params.id else {
        let summary = tasks::refresh_feeds(backend, &context.fetcher, params.force).await?;
        return Ok(RefreshResponse {
            attempted: summary.attempted,
            failed: summary.failed,
            new_items: summary.new_items,
        });
    };

    let feed = backend
        .feed(feed_id)
        .await?
        .ok_or_else(|| Error::FeedNotFound(feed_id.to_string()))?;

    let (failed, new_items) = match tasks::refresh_feed(backend, &context.fetcher, &feed).await {
        Ok(created) => (0, created),
        Err(_) => (1, 0),
    };

    Ok(RefreshResponse {
        attempted: 1,
        failed,
        new_items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::storage::Database;

    async fn context() -> ServerContext {
        let mut config = AppConfig::default();
        config.sync.proxy = "none".to_string();
        let config = Arc::new(config);

        ServerContext {
            backend: Backend::new(Database::new_in_memory().await.unwrap(), EventBus::new()),
            fetcher: FeedFetcher::new(&config).unwrap(),
            config,
            start_time: Instant::now(),
            request_semaphore: Semaphore::new(MAX_CONCURRENT_REQUESTS),
        }
    }

    fn error_code(response: &Response) -> Option<i32> {
        response.error.as_ref().map(|e| e.code)
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let context = context().await;
        let response = handle_request(Request::new("item.delete"), &context).await;
        assert_eq!(error_code(&response), Some(ERR_METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let context = context().await;
        let request = Request::new(methods::ITEM_MARK_READ).with_params(serde_json::json!({"id": "x"}));
        let response = handle_request(request, &context).await;
        assert_eq!(error_code(&response), Some(ERR_INVALID_PARAMS));
    }

    #[tokio::test]
    async fn test_refresh_unknown_feed() {
        let context = context().await;
        let request = Request::new(methods::FEED_REFRESH).with_params(serde_json::json!({"id": 42}));
        let response = handle_request(request, &context).await;
        assert_eq!(error_code(&response), Some(ERR_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_page_without_params() {
        let context = context().await;
        let request = Request::new(methods::ITEM_PAGE).with_params(serde_json::json!({}));
        let response = handle_request(request, &context).await;
        assert!(response.is_success());

        let page: crate::feed::Page = serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_feed_update_keeps_unset_fields() {
        let context = context().await;
        let request = Request::new(methods::FEED_ADD)
            .with_params(serde_json::json!({"url": "https://example.com/a.xml", "name": "a"}));
        let added: FeedResponse =
            serde_json::from_value(handle_request(request, &context).await.result.unwrap()).unwrap();

        let request = Request::new(methods::FEED_UPDATE)
            .with_params(serde_json::json!({"id": added.feed.id, "name": "b"}));
        let response = handle_request(request, &context).await;
        let updated: FeedResponse = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(updated.feed.name, "b");
        assert_eq!(updated.feed.url, "https://example.com/a.xml");

        let request = Request::new(methods::FEED_UPDATE).with_params(serde_json::json!({"id": 42}));
        let response = handle_request(request, &context).await;
        assert_eq!(error_code(&response), Some(ERR_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_slow_event_subscriber_is_disconnected() {
        use crate::events::{UnreadCountEvent, FEED_NEW};

        let context = Arc::new(context().await);
        let (server_side, client_side) = UnixStream::pair().unwrap();
        let (reader, writer) = server_side.into_split();
        let task = {
            let context = Arc::clone(&context);
            tokio::spawn(async move {
                push_events(Uuid::new_v4(), BufReader::new(reader), writer, &context).await
            })
        };

        // Read the ack, then stop reading
        let (client_reader, _client_writer) = client_side.into_split();
        let mut client_reader = BufReader::new(client_reader);
        let mut ack = String::new();
        client_reader.read_line(&mut ack).await.unwrap();
        assert!(serde_json::from_str::<Response>(&ack).unwrap().is_success());

        let bus = context.backend.bus();
        assert_eq!(bus.subscriber_count(ALL_CHANNELS), 1);
        for _ in 0..EVENT_QUEUE_CAPACITY * 4 {
            bus.publish(FEED_NEW, &UnreadCountEvent::new(None, 1)).unwrap();
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(bus.subscriber_count(ALL_CHANNELS), 0);
    }
}
