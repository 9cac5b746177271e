//! IPC module for daemon-client communication
//!
//! Unix socket IPC between the daemon, which owns the store and the event
//! bus, and CLI clients that page items and follow events through it.

mod client;
mod protocol;
mod server;

pub use client::{is_daemon_running, DaemonClient, EventForwarder};
pub use protocol::*;
pub use server::DaemonServer;
