use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::Database;
use crate::feed::{Feed, NewFeed};
use crate::{Error, Result};

/// Repository for feed CRUD operations
pub struct FeedRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct FeedRow {
    id: i64,
    name: String,
    url: String,
    interval_mins: i64,
    last_fetched_at: Option<DateTime<Utc>>,
    last_fetch_ok: Option<i32>,
    unread_count: i64,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            name: row.name,
            url: row.url,
            interval_mins: row.interval_mins.max(0) as u32,
            last_fetched_at: row.last_fetched_at,
            last_fetch_ok: row.last_fetch_ok.map(|ok| ok != 0),
            unread_count: row.unread_count.max(0) as u32,
        }
    }
}

const SELECT_FEEDS: &str = r#"
    SELECT f.id, f.name, f.url, f.interval_mins, f.last_fetched_at, f.last_fetch_ok,
           COUNT(i.id) AS unread_count
    FROM feeds f
    LEFT JOIN items i ON i.feed_id = f.id AND i.unread = 1
"#;

impl<'a> FeedRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a new feed subscription
    pub async fn create(&self, new_feed: &NewFeed) -> Result<Feed> {
        let result = sqlx::query(
            r#"
            INSERT INTO feeds (name, url, interval_mins)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&new_feed.name)
        .bind(&new_feed.url)
        .bind(i64::from(new_feed.interval_mins))
        .execute(self.db.pool())
        .await?;

        let id = result.last_insert_rowid();
        self.find_by_id(id)
            .await?
            .ok_or_else(|| Error::FeedNotFound(id.to_string()))
    }

    /// Find a feed by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Feed>> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("{} WHERE f.id = ? GROUP BY f.id", SELECT_FEEDS))
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(Feed::from))
    }

    /// Find a feed by its local name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Feed>> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("{} WHERE f.name = ? GROUP BY f.id", SELECT_FEEDS))
                .bind(name)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(Feed::from))
    }

    /// Get all feeds with unread counts
    pub async fn list_all(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> =
            sqlx::query_as(&format!("{} GROUP BY f.id ORDER BY f.name ASC", SELECT_FEEDS))
                .fetch_all(self.db.pool())
                .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Record the outcome of a fetch attempt
    pub async fn record_fetch(&self, id: i64, ok: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?, last_fetch_ok = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(i32::from(ok))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Change a feed's name and URL; `false` when it does not exist
    pub async fn update(&self, id: i64, name: &str, url: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE feeds SET name = ?, url = ? WHERE id = ?")
            .bind(name)
            .bind(url)
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a feed and all its items
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_feed(name: &str) -> NewFeed {
        NewFeed {
            name: name.to_string(),
            url: format!("https://example.com/{}.xml", name),
            interval_mins: 15,
        }
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = FeedRepository::new(&db);

        let b = repo.create(&new_feed("beta")).await.unwrap();
        let a = repo.create(&new_feed("alpha")).await.unwrap();

        assert_eq!(b.interval_mins, 15);
        assert_eq!(b.last_fetched_at, None);
        assert_eq!(b.unread_count, 0);

        let names: Vec<String> = repo.list_all().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        assert_eq!(repo.find_by_name("alpha").await.unwrap().map(|f| f.id), Some(a.id));
    }

    #[tokio::test]
    async fn test_duplicate_url_is_rejected() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = FeedRepository::new(&db);

        repo.create(&new_feed("alpha")).await.unwrap();
        let err = repo.create(&new_feed("alpha")).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[tokio::test]
    async fn test_record_fetch_and_delete() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = FeedRepository::new(&db);
        let feed = repo.create(&new_feed("alpha")).await.unwrap();

        repo.record_fetch(feed.id, false).await.unwrap();
        let feed = repo.find_by_id(feed.id).await.unwrap().unwrap();
        assert!(feed.has_error());
        assert!(feed.last_fetched_at.is_some());

        assert!(repo.delete(feed.id).await.unwrap());
        assert!(!repo.delete(feed.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_renames_and_moves() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = FeedRepository::new(&db);
        let feed = repo.create(&new_feed("alpha")).await.unwrap();
        let other = repo.create(&new_feed("beta")).await.unwrap();

        assert!(repo.update(feed.id, "gamma", "https://example.org/g.xml").await.unwrap());
        let updated = repo.find_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(updated.name, "gamma");
        assert_eq!(updated.url, "https://example.org/g.xml");
        assert_eq!(updated.interval_mins, 15);

        // Names and URLs stay unique
        let err = repo.update(feed.id, "beta", &other.url).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));

        assert!(!repo.update(9999, "x", "https://example.org/x.xml").await.unwrap());
    }
}
