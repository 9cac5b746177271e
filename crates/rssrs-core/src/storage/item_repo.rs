use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sqlx::{FromRow, QueryBuilder, Sqlite};

use super::Database;
use crate::feed::{Item, NewItem, Page, Scope};
use crate::{Error, Result};

/// Repository for item queries and read-state updates
pub struct ItemRepository<'a> {
    db: &'a Database,
}

#[derive(FromRow)]
struct ItemRow {
    id: i64,
    feed_id: i64,
    feed_name: String,
    guid: String,
    title: String,
    author: Option<String>,
    description: Option<String>,
    link: Option<String>,
    publish_time: i64,
    unread: i32,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            feed_id: row.feed_id,
            feed_name: row.feed_name,
            guid: row.guid,
            title: row.title,
            author: row.author,
            description: row.description,
            link: row.link,
            publish_time: row.publish_time,
            unread: row.unread != 0,
        }
    }
}

const SELECT_ITEMS: &str = r#"
    SELECT i.id, i.feed_id, f.name AS feed_name, i.guid, i.title, i.author,
           i.description, i.link, i.publish_time, i.unread
    FROM items i
    JOIN feeds f ON f.id = i.feed_id
"#;

/// Position after which the next page starts: the last `(publish_time, id)` served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Keyset {
    publish_time: i64,
    id: i64,
}

impl Keyset {
    fn after(item: &Item) -> Self {
        Self {
            publish_time: item.publish_time,
            id: item.id,
        }
    }

    pub(crate) fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.publish_time, self.id))
    }

    pub(crate) fn decode(cursor: &str) -> Result<Self> {
        let invalid = || Error::InvalidCursor(cursor.to_string());

        let raw = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
        let raw = String::from_utf8(raw).map_err(|_| invalid())?;
        let (publish_time, id) = raw.split_once(':').ok_or_else(invalid)?;

        Ok(Self {
            publish_time: publish_time.parse().map_err(|_| invalid())?,
            id: id.parse().map_err(|_| invalid())?,
        })
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for ch in search.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

impl<'a> ItemRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert items, ignoring ones already stored for the same feed and guid.
    /// Returns the number of newly stored items.
    pub async fn insert_many(&self, items: &[NewItem]) -> Result<u32> {
        let mut tx = self.db.pool().begin().await?;
        let mut created = 0;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO items
                (feed_id, guid, title, author, description, link, publish_time)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(item.feed_id)
            .bind(&item.guid)
            .bind(&item.title)
            .bind(&item.author)
            .bind(&item.description)
            .bind(&item.link)
            .bind(item.publish_time)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                created += 1;
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Find an item by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Item>> {
        let row: Option<ItemRow> = sqlx::query_as(&format!("{} WHERE i.id = ?", SELECT_ITEMS))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(Item::from))
    }

    /// One page of items in display order, starting after `cursor`
    pub async fn page(&self, scope: &Scope, cursor: Option<&str>, limit: u32) -> Result<Page> {
        let limit = limit.max(1);

        let mut query = QueryBuilder::<Sqlite>::new(SELECT_ITEMS);
        query.push(" WHERE 1 = 1");

        if let Some(feed_id) = scope.feed_id {
            query.push(" AND i.feed_id = ").push_bind(feed_id);
        }

        if scope.unread_only {
            query.push(" AND i.unread = 1");
        }

        if let Some(search) = scope.search.as_deref() {
            let pattern = like_pattern(search);
            query
                .push(" AND (i.title LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR i.description LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }

        if let Some(cursor) = cursor {
            let after = Keyset::decode(cursor)?;
            query
                .push(" AND (i.publish_time < ")
                .push_bind(after.publish_time)
                .push(" OR (i.publish_time = ")
                .push_bind(after.publish_time)
                .push(" AND i.id > ")
                .push_bind(after.id)
                .push("))");
        }

        // One extra row tells whether another page exists
        query
            .push(" ORDER BY i.publish_time DESC, i.id ASC LIMIT ")
            .push_bind(i64::from(limit) + 1);

        let rows: Vec<ItemRow> = query
            .build_query_as()
            .fetch_all(self.db.pool())
            .await?;

        let mut items: Vec<Item> = rows.into_iter().map(Item::from).collect();
        let next_cursor = if items.len() > limit as usize {
            items.truncate(limit as usize);
            items.last().map(|last| Keyset::after(last).encode())
        } else {
            None
        };

        Ok(Page { items, next_cursor })
    }

    /// Count unread items in a feed, or across all feeds
    pub async fn unread_count(&self, feed_id: Option<i64>) -> Result<u32> {
        let count: i64 = match feed_id {
            Some(feed_id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE unread = 1 AND feed_id = ?")
                    .bind(feed_id)
                    .fetch_one(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE unread = 1")
                    .fetch_one(self.db.pool())
                    .await?
            }
        };

        Ok(count.max(0) as u32)
    }

    /// Set the read state of one item, returning its feed when it exists
    pub async fn set_unread(&self, id: i64, unread: bool) -> Result<Option<i64>> {
        let feed_id: Option<i64> =
            sqlx::query_scalar("UPDATE items SET unread = ? WHERE id = ? RETURNING feed_id")
                .bind(i32::from(unread))
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(feed_id)
    }

    /// Mark every item of a feed (or of all feeds) as read
    pub async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<u64> {
        let result = match feed_id {
            Some(feed_id) => {
                sqlx::query("UPDATE items SET unread = 0 WHERE unread = 1 AND feed_id = ?")
                    .bind(feed_id)
                    .execute(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query("UPDATE items SET unread = 0 WHERE unread = 1")
                    .execute(self.db.pool())
                    .await?
            }
        };

        Ok(result.rows_affected())
    }
}
