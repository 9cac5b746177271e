pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod ipc;
pub mod scheduler;
pub mod storage;
pub mod sync;

pub use backend::Backend;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use events::EventBus;
pub use ipc::{DaemonClient, DaemonServer};
