mod service;
pub mod tasks;

pub use service::{SchedulerEvent, SchedulerService};
pub use tasks::{refresh_feed, refresh_feeds, RefreshSummary};
