mod database;
mod feed_repo;
mod item_repo;
mod settings_repo;

pub use database::Database;
pub use feed_repo::FeedRepository;
pub use item_repo::ItemRepository;
pub use settings_repo::SettingsRepository;
