use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Entry};

/// Maximum number of entries returned by a single query (OOM protection)
const MAX_ENTRIES: i64 = 2000;

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Store sanitized entries for a feed, returning the number of new entries.
    ///
    /// Entries are keyed by `(feed_id, hash)`. Existing entries get their
    /// title, links, content and author refreshed; `created_at` keeps the first
    /// time the entry was seen.
    ///
    /// Two-phase write: INSERT OR IGNORE counted with `changes()`, then an
    /// UPDATE per entry. Batches of 50 stay well under SQLite's 999 parameter
    /// limit (10 columns * 50 = 500).
    pub async fn store_entries(
        &self,
        feed_id: i64,
        user_id: i64,
        entries: &[Entry],
    ) -> Result<usize, DatabaseError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        const BATCH_SIZE: usize = 50;
        let mut total_inserted: usize = 0;

        for chunk in entries.chunks(BATCH_SIZE) {
            let mut insert_builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO entries \
                 (feed_id, user_id, hash, title, url, comments_url, content, author, published_at, created_at) ",
            );

            insert_builder.push_values(chunk, |mut b, entry| {
                b.push_bind(feed_id)
                    .push_bind(user_id)
                    .push_bind(&entry.hash)
                    .push_bind(&entry.title)
                    .push_bind(&entry.url)
                    .push_bind(&entry.comments_url)
                    .push_bind(&entry.content)
                    .push_bind(&entry.author)
                    .push_bind(entry.published_at)
                    .push_bind(now);
            });

            insert_builder.build().execute(&mut *tx).await?;

            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await?;
            total_inserted += changes.0 as usize;

            for entry in chunk {
                sqlx::query(
                    r#"
                    UPDATE entries SET
                        title = ?, url = ?, comments_url = ?, content = ?, author = ?,
                        published_at = COALESCE(?, published_at)
                    WHERE feed_id = ? AND hash = ?
                "#,
                )
                .bind(&entry.title)
                .bind(&entry.url)
                .bind(&entry.comments_url)
                .bind(&entry.content)
                .bind(&entry.author)
                .bind(entry.published_at)
                .bind(feed_id)
                .bind(&entry.hash)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Entries of one feed, newest first.
    pub async fn get_entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>, DatabaseError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT hash, title, url, comments_url, content, author, published_at
            FROM entries
            WHERE feed_id = ?
            ORDER BY published_at DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_ENTRIES)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Entry, NewFeed};

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .insert_feed(&NewFeed {
                user_id: 1,
                title: "Feed".to_string(),
                feed_url: "https://example.com/rss".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        (db, id)
    }

    fn entry(hash: &str, title: &str) -> Entry {
        Entry {
            hash: hash.to_string(),
            title: title.to_string(),
            url: Some(format!("https://example.com/{hash}")),
            comments_url: None,
            content: Some("<p>body</p>".to_string()),
            author: None,
            published_at: Some(1_704_067_200),
        }
    }

    #[tokio::test]
    async fn test_store_entries_counts_only_new() {
        let (db, feed_id) = setup().await;

        let n = db
            .store_entries(feed_id, 1, &[entry("a", "A"), entry("b", "B")])
            .await
            .unwrap();
        assert_eq!(n, 2);

        let n = db
            .store_entries(feed_id, 1, &[entry("a", "A updated"), entry("c", "C")])
            .await
            .unwrap();
        assert_eq!(n, 1);

        let stored = db.get_entries_for_feed(feed_id).await.unwrap();
        assert_eq!(stored.len(), 3);
        let a = stored.iter().find(|e| e.hash == "a").unwrap();
        assert_eq!(a.title, "A updated");
    }

    #[tokio::test]
    async fn test_store_entries_empty() {
        let (db, feed_id) = setup().await;
        assert_eq!(db.store_entries(feed_id, 1, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_entries_large_batch() {
        let (db, feed_id) = setup().await;
        let entries: Vec<Entry> = (0..130)
            .map(|i| entry(&format!("h{i}"), &format!("Entry {i}")))
            .collect();
        assert_eq!(db.store_entries(feed_id, 1, &entries).await.unwrap(), 130);
    }
}
