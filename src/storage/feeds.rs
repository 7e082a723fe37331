use anyhow::Result;

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedDbRow, FetchOutcome, NewFeed};

const FEED_COLUMNS: &str = "id, user_id, title, feed_url, site_url, etag, last_modified, \
     user_agent, username, password, cookie, proxy_url, use_proxy, without_redirects, \
     disable_http2, ignore_tls_errors, disabled, custom_script, checked_at, next_check_at, \
     parsing_error_count, parsing_error_msg, created_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe a user to a feed, returning the feed id.
    ///
    /// Re-subscribing to the same URL updates the title and settings and keeps
    /// the scheduling state. New feeds are due immediately.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<i64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (
                user_id, title, feed_url, site_url, user_agent, username, password, cookie,
                proxy_url, use_proxy, without_redirects, disable_http2, ignore_tls_errors,
                custom_script, next_check_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(user_id, feed_url) DO UPDATE SET
                title = excluded.title,
                site_url = excluded.site_url,
                user_agent = excluded.user_agent,
                username = excluded.username,
                password = excluded.password,
                cookie = excluded.cookie,
                proxy_url = excluded.proxy_url,
                use_proxy = excluded.use_proxy,
                without_redirects = excluded.without_redirects,
                disable_http2 = excluded.disable_http2,
                ignore_tls_errors = excluded.ignore_tls_errors,
                custom_script = excluded.custom_script
            RETURNING id
        "#,
        )
        .bind(feed.user_id)
        .bind(&feed.title)
        .bind(&feed.feed_url)
        .bind(&feed.site_url)
        .bind(&feed.user_agent)
        .bind(&feed.username)
        .bind(&feed.password)
        .bind(&feed.cookie)
        .bind(&feed.proxy_url)
        .bind(feed.use_proxy)
        .bind(feed.without_redirects)
        .bind(feed.disable_http2)
        .bind(feed.ignore_tls_errors)
        .bind(&feed.custom_script)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Load a single feed with all of its fetch settings.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?");
        let row: Option<FeedDbRow> = sqlx::query_as(&query)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// All feeds of one user, ordered by title.
    pub async fn get_feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>, DatabaseError> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE user_id = ? ORDER BY title");
        let rows: Vec<FeedDbRow> = sqlx::query_as(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Disabled feeds are never selected by any batch.
    pub async fn set_feed_disabled(&self, feed_id: i64, disabled: bool) -> Result<()> {
        sqlx::query("UPDATE feeds SET disabled = ? WHERE id = ?")
            .bind(disabled)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Override the next check time, e.g. to force a feed to be due.
    pub async fn set_next_check_at(&self, feed_id: i64, next_check_at: i64) -> Result<()> {
        sqlx::query("UPDATE feeds SET next_check_at = ? WHERE id = ?")
            .bind(next_check_at)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Override the last check time; `None` means never checked.
    pub async fn set_checked_at(&self, feed_id: i64, checked_at: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE feeds SET checked_at = ? WHERE id = ?")
            .bind(checked_at)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Fetch Outcome Operations
    // ========================================================================

    /// Record a successful fetch: reset the error counter, store the cache
    /// validators and schedule the next check.
    ///
    /// Empty validators leave the stored ones untouched, so a 304 response
    /// without headers does not erase them.
    pub async fn record_fetch_success(
        &self,
        feed_id: i64,
        outcome: &FetchOutcome,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE feeds SET
                parsing_error_count = 0,
                parsing_error_msg = NULL,
                etag = COALESCE(NULLIF(?, ''), etag),
                last_modified = COALESCE(NULLIF(?, ''), last_modified),
                checked_at = ?,
                next_check_at = ?
            WHERE id = ?
        "#,
        )
        .bind(outcome.etag.as_deref())
        .bind(outcome.last_modified.as_deref())
        .bind(now)
        .bind(outcome.next_check_at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed fetch and return the new consecutive error count.
    ///
    /// Once the count reaches the configured polling error limit, the feed
    /// drops out of automatic batches but still refreshes on manual request.
    pub async fn record_fetch_error(
        &self,
        feed_id: i64,
        message: &str,
        next_check_at: i64,
    ) -> Result<i64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result: (i64,) = sqlx::query_as(
            r#"
            UPDATE feeds SET
                parsing_error_count = parsing_error_count + 1,
                parsing_error_msg = ?,
                checked_at = ?,
                next_check_at = ?
            WHERE id = ?
            RETURNING parsing_error_count
        "#,
        )
        .bind(message)
        .bind(now)
        .bind(next_check_at)
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(result.0)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, FetchOutcome, NewFeed};
    use secrecy::ExposeSecret;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_feed(user_id: i64, n: i64) -> NewFeed {
        NewFeed {
            user_id,
            title: format!("Test Feed {}", n),
            feed_url: format!("https://feed{}.example.com/rss", n),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_feed_is_due_immediately() {
        let db = test_db().await;
        let id = db.insert_feed(&test_feed(1, 1)).await.unwrap();

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.title, "Test Feed 1");
        assert_eq!(feed.next_check_at, 0);
        assert_eq!(feed.parsing_error_count, 0);
        assert!(feed.checked_at.is_none());
        assert!(!feed.disabled);
    }

    #[tokio::test]
    async fn test_insert_feed_duplicate_url_same_user_updates() {
        let db = test_db().await;
        let id1 = db.insert_feed(&test_feed(1, 1)).await.unwrap();

        let mut renamed = test_feed(1, 1);
        renamed.title = "Renamed".to_string();
        let id2 = db.insert_feed(&renamed).await.unwrap();

        assert_eq!(id1, id2);
        let feed = db.get_feed(id1).await.unwrap().unwrap();
        assert_eq!(feed.title, "Renamed");
    }

    #[tokio::test]
    async fn test_same_url_different_users_are_separate_feeds() {
        let db = test_db().await;
        let id1 = db.insert_feed(&test_feed(1, 1)).await.unwrap();
        let id2 = db.insert_feed(&test_feed(2, 1)).await.unwrap();
        assert_ne!(id1, id2);
        assert_eq!(db.get_feeds_for_user(1).await.unwrap().len(), 1);
        assert_eq!(db.get_feeds_for_user(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_password_round_trips_as_secret() {
        let db = test_db().await;
        let mut feed = test_feed(1, 1);
        feed.username = Some("alice".to_string());
        feed.password = Some("hunter2".to_string());
        let id = db.insert_feed(&feed).await.unwrap();

        let stored = db.get_feed(id).await.unwrap().unwrap();
        let password = stored.password.as_ref().unwrap();
        assert_eq!(password.expose_secret(), "hunter2");
        assert!(!format!("{:?}", stored).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_record_fetch_error_increments() {
        let db = test_db().await;
        let id = db.insert_feed(&test_feed(1, 1)).await.unwrap();

        assert_eq!(db.record_fetch_error(id, "boom", 100).await.unwrap(), 1);
        assert_eq!(db.record_fetch_error(id, "boom again", 200).await.unwrap(), 2);

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.parsing_error_count, 2);
        assert_eq!(feed.parsing_error_msg.as_deref(), Some("boom again"));
        assert_eq!(feed.next_check_at, 200);
        assert!(feed.checked_at.is_some());
    }

    #[tokio::test]
    async fn test_record_fetch_success_resets_errors_and_keeps_validators() {
        let db = test_db().await;
        let id = db.insert_feed(&test_feed(1, 1)).await.unwrap();
        db.record_fetch_error(id, "boom", 0).await.unwrap();

        let outcome = FetchOutcome {
            etag: Some("\"abc\"".to_string()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
            next_check_at: 500,
        };
        db.record_fetch_success(id, &outcome).await.unwrap();

        // A later 304 without validators keeps the stored ones.
        db.record_fetch_success(
            id,
            &FetchOutcome {
                next_check_at: 900,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.parsing_error_count, 0);
        assert!(feed.parsing_error_msg.is_none());
        assert_eq!(feed.etag.as_deref(), Some("\"abc\""));
        assert_eq!(
            feed.last_modified.as_deref(),
            Some("Mon, 01 Jan 2024 00:00:00 GMT")
        );
        assert_eq!(feed.next_check_at, 900);
    }

    #[tokio::test]
    async fn test_get_missing_feed_is_none() {
        let db = test_db().await;
        assert!(db.get_feed(42).await.unwrap().is_none());
    }
}
