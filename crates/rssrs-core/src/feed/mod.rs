mod cover;
mod fetcher;
mod models;
mod parser;

pub use cover::CoverFilter;
pub use fetcher::{FeedFetcher, ProxyMode};
pub use models::{Feed, Item, NewFeed, NewItem, Page, Scope};
pub use parser::{parse_feed, ParsedFeed};
