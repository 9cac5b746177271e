use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Database;
use crate::Result;

const WATCHLIST_KEY: &str = "watchlist";

/// Repository for JSON-valued settings
pub struct SettingsRepository<'a> {
    db: &'a Database,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Read and decode a setting
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;

        match value {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and store a setting, replacing any previous value
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(raw)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Watch-list keywords, empty when never set
    pub async fn watchlist(&self) -> Result<Vec<String>> {
        Ok(self.get(WATCHLIST_KEY).await?.unwrap_or_default())
    }

    /// Replace the watch list; returns the normalized list that was stored
    pub async fn set_watchlist(&self, keywords: &[String]) -> Result<Vec<String>> {
        let keywords = normalize_keywords(keywords);
        self.set(WATCHLIST_KEY, &keywords).await?;
        Ok(keywords)
    }
}

/// Trim, drop blanks and case-insensitive duplicates, keep first-seen order
fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .map(str::to_string)
        .collect()
}
