//! IPC Protocol definitions for daemon-client communication
//!
//! JSON-RPC style requests and responses, one JSON document per line, over a
//! Unix socket. After a successful `events.subscribe` the server only writes:
//! one [`Envelope`](crate::events::Envelope) per line for every bus event.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::feed::{Feed, Scope};

/// JSON-RPC style request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// JSON-RPC style response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Uuid, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn ok(id: Uuid) -> Self {
        Self::success(id, serde_json::json!({"ok": true}))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// Error codes
pub const ERR_PARSE: i32 = -32700;
pub const ERR_INVALID_REQUEST: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;
pub const ERR_NOT_FOUND: i32 = -32001;

// Method names
pub mod methods {
    pub const PING: &str = "ping";
    pub const STATUS: &str = "status";

    // Item methods
    pub const ITEM_PAGE: &str = "item.page";
    pub const ITEM_UNREAD_COUNT: &str = "item.unread_count";
    pub const ITEM_MARK_READ: &str = "item.mark_read";
    pub const ITEM_MARK_ALL_READ: &str = "item.mark_all_read";

    // Feed methods
    pub const FEED_LIST: &str = "feed.list";
    pub const FEED_ADD: &str = "feed.add";
    pub const FEED_UPDATE: &str = "feed.update";
    pub const FEED_DELETE: &str = "feed.delete";
    pub const FEED_REFRESH: &str = "feed.refresh";

    // Watch list
    pub const WATCHLIST_GET: &str = "watchlist.get";
    pub const WATCHLIST_SET: &str = "watchlist.set";

    /// Switches the connection to event push mode
    pub const EVENTS_SUBSCRIBE: &str = "events.subscribe";
}

// Parameter structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPageParams {
    #[serde(default)]
    pub scope: Scope,
    pub cursor: Option<String>,
    /// Falls back to the daemon's configured page size
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedScopeParams {
    pub feed_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadParams {
    pub id: i64,
    pub unread: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedAddParams {
    pub url: String,
    pub name: String,
    pub interval_mins: Option<u32>,
}

/// Unset fields keep their current value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedUpdateParams {
    pub id: i64,
    pub name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedIdParams {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRefreshParams {
    /// A single feed, or every feed
    pub id: Option<i64>,
    /// Ignore per-feed intervals
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchListParams {
    pub keywords: Vec<String>,
}

// Response structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub scheduler_running: bool,
    pub event_subscribers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread_count: u32,
    /// Latest event sequence number the count includes
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedListResponse {
    pub feeds: Vec<Feed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    pub feed: Feed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub attempted: u32,
    pub failed: u32,
    pub new_items: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchListResponse {
    pub keywords: Vec<String>,
}
