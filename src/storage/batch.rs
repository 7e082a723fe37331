use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, RefreshJob};

const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy)]
enum Condition {
    UserId(i64),
    ErrorLimit(i64),
    NextCheckExpired,
    WithoutDisabled,
}

/// Composable filter over the feeds table producing [`RefreshJob`]s.
///
/// ```ignore
/// let jobs = db
///     .batch()
///     .without_disabled_feeds()
///     .with_next_check_expired()
///     .with_error_limit(3)
///     .with_batch_size(100)
///     .fetch_jobs()
///     .await?;
/// ```
pub struct BatchBuilder<'a> {
    db: &'a Database,
    conditions: Vec<Condition>,
    limit: Option<i64>,
    now: i64,
}

impl<'a> BatchBuilder<'a> {
    /// Only feeds owned by `user_id`.
    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.conditions.push(Condition::UserId(user_id));
        self
    }

    /// Only feeds with fewer than `limit` consecutive errors.
    /// A limit of zero or below leaves the error count unfiltered.
    pub fn with_error_limit(mut self, limit: i64) -> Self {
        if limit > 0 {
            self.conditions.push(Condition::ErrorLimit(limit));
        }
        self
    }

    /// Only feeds whose next check time has passed.
    pub fn with_next_check_expired(mut self) -> Self {
        self.conditions.push(Condition::NextCheckExpired);
        self
    }

    pub fn without_disabled_feeds(mut self) -> Self {
        self.conditions.push(Condition::WithoutDisabled);
        self
    }

    /// Cap the batch. Zero means unlimited.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.limit = (batch_size > 0).then(|| batch_size.min(i64::MAX as usize) as i64);
        self
    }

    /// Evaluate "now" at a fixed instant instead of the wall clock.
    pub fn at(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    /// Run the query, ordered by ascending next check time.
    pub async fn fetch_jobs(self) -> Result<Vec<RefreshJob>, DatabaseError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT id, user_id FROM feeds");

        if !self.conditions.is_empty() {
            builder.push(" WHERE ");
            let mut separated = builder.separated(" AND ");
            for condition in &self.conditions {
                match *condition {
                    Condition::UserId(user_id) => {
                        separated.push("user_id = ");
                        separated.push_bind_unseparated(user_id);
                    }
                    Condition::ErrorLimit(limit) => {
                        separated.push("parsing_error_count < ");
                        separated.push_bind_unseparated(limit);
                    }
                    Condition::NextCheckExpired => {
                        separated.push("next_check_at < ");
                        separated.push_bind_unseparated(self.now);
                    }
                    Condition::WithoutDisabled => {
                        separated.push("disabled = 0");
                    }
                }
            }
        }

        builder.push(" ORDER BY next_check_at ASC, id ASC");
        if let Some(limit) = self.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit);
        }

        let rows: Vec<(i64, i64)> = builder
            .build_query_as()
            .fetch_all(&self.db.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(feed_id, user_id)| RefreshJob::new(feed_id, user_id))
            .collect())
    }
}

impl Database {
    // ========================================================================
    // Batch Selection
    // ========================================================================

    /// Start a batch query. Without filters it returns every feed.
    pub fn batch(&self) -> BatchBuilder<'_> {
        BatchBuilder {
            db: self,
            conditions: Vec::new(),
            limit: None,
            now: chrono::Utc::now().timestamp(),
        }
    }

    /// Every enabled feed under the error limit, annotated with the statistics
    /// the probabilistic scheduler weighs, least recently checked first.
    ///
    /// - `weekly_recent_entry_count`: entries published within one hour of the
    ///   current time of day on each of the previous seven days
    /// - `feed_age_days`: age of the oldest entry, `0` when there is none
    /// - `hours_since_last_check`: hours since `checked_at`; a feed that was
    ///   never checked counts from the epoch
    pub async fn fetch_refresh_candidates(
        &self,
        error_limit: i64,
        now: i64,
    ) -> Result<Vec<RefreshJob>, DatabaseError> {
        let rows: Vec<(i64, i64, i64, f64, f64)> = sqlx::query_as(
            r#"
            SELECT
                f.id,
                f.user_id,
                (
                    SELECT COUNT(*)
                    FROM entries e
                    WHERE e.feed_id = f.id
                      AND e.published_at BETWEEN ?1 - ?3 * 7 - ?4 AND ?1 - ?3 + ?4
                      AND ((e.published_at - ?1) % ?3 + ?3 + ?3 / 2) % ?3 - ?3 / 2
                          BETWEEN -?4 AND ?4
                ) AS weekly_recent_entry_count,
                COALESCE(
                    (
                        SELECT (?1 - MIN(e.published_at)) / CAST(?3 AS REAL)
                        FROM entries e
                        WHERE e.feed_id = f.id
                    ),
                    0.0
                ) AS feed_age_days,
                (?1 - COALESCE(f.checked_at, 0)) / CAST(?4 AS REAL) AS hours_since_last_check
            FROM feeds f
            WHERE f.disabled = 0
              AND (?2 <= 0 OR f.parsing_error_count < ?2)
            ORDER BY f.checked_at ASC, f.id ASC
        "#,
        )
        .bind(now)
        .bind(error_limit)
        .bind(SECONDS_PER_DAY)
        .bind(SECONDS_PER_HOUR)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(feed_id, user_id, weekly_recent_entry_count, feed_age_days, hours_since)| {
                    RefreshJob {
                        feed_id,
                        user_id,
                        weekly_recent_entry_count,
                        hours_since_last_check: hours_since,
                        feed_age_days,
                    }
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Entry, NewFeed};

    const NOW: i64 = 1_700_000_000;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn add_feed(db: &Database, user_id: i64, n: i64) -> i64 {
        db.insert_feed(&NewFeed {
            user_id,
            title: format!("Feed {n}"),
            feed_url: format!("https://feed{n}.example.com/rss"),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    fn entry_at(hash: &str, published_at: i64) -> Entry {
        Entry {
            hash: hash.to_string(),
            title: hash.to_string(),
            url: None,
            comments_url: None,
            content: None,
            author: None,
            published_at: Some(published_at),
        }
    }

    #[tokio::test]
    async fn test_batch_orders_by_next_check() {
        let db = test_db().await;
        let a = add_feed(&db, 1, 1).await;
        let b = add_feed(&db, 1, 2).await;
        let c = add_feed(&db, 1, 3).await;
        db.set_next_check_at(a, NOW - 10).await.unwrap();
        db.set_next_check_at(b, NOW - 30).await.unwrap();
        db.set_next_check_at(c, NOW - 20).await.unwrap();

        let jobs = db
            .batch()
            .with_next_check_expired()
            .at(NOW)
            .fetch_jobs()
            .await
            .unwrap();
        let ids: Vec<i64> = jobs.iter().map(|j| j.feed_id).collect();
        assert_eq!(ids, vec![b, c, a]);
    }

    #[tokio::test]
    async fn test_batch_size_caps_results() {
        let db = test_db().await;
        for n in 0..5 {
            add_feed(&db, 1, n).await;
        }
        let jobs = db.batch().with_batch_size(2).fetch_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);

        let all = db.batch().with_batch_size(0).fetch_jobs().await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_batch_filters_user_disabled_and_errors() {
        let db = test_db().await;
        let mine = add_feed(&db, 1, 1).await;
        let disabled = add_feed(&db, 1, 2).await;
        let broken = add_feed(&db, 1, 3).await;
        add_feed(&db, 2, 4).await;

        db.set_feed_disabled(disabled, true).await.unwrap();
        for _ in 0..3 {
            db.record_fetch_error(broken, "boom", 0).await.unwrap();
        }

        let jobs = db
            .batch()
            .with_user_id(1)
            .without_disabled_feeds()
            .with_error_limit(3)
            .fetch_jobs()
            .await
            .unwrap();
        let ids: Vec<i64> = jobs.iter().map(|j| j.feed_id).collect();
        assert_eq!(ids, vec![mine]);
    }

    #[tokio::test]
    async fn test_error_limit_zero_disables_filter() {
        let db = test_db().await;
        let broken = add_feed(&db, 1, 1).await;
        for _ in 0..10 {
            db.record_fetch_error(broken, "boom", 0).await.unwrap();
        }
        let jobs = db.batch().with_error_limit(0).fetch_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_candidates_count_entries_in_hour_window() {
        let db = test_db().await;
        let feed = add_feed(&db, 1, 1).await;
        let day = 86_400;

        let entries = vec![
            // Same time of day, 1..=7 days ago: counted
            entry_at("d1", NOW - day),
            entry_at("d3-early", NOW - 3 * day - 1_800),
            entry_at("d7-late", NOW - 7 * day + 3_000),
            // Today: outside the day window
            entry_at("today", NOW - 600),
            // Eight days ago: outside the day window
            entry_at("d8", NOW - 8 * day - 7_200),
            // Right day, wrong hour
            entry_at("d2-off", NOW - 2 * day + 4 * 3_600),
        ];
        db.store_entries(feed, 1, &entries).await.unwrap();
        db.set_checked_at(feed, Some(NOW - 2 * 3_600)).await.unwrap();

        let candidates = db.fetch_refresh_candidates(0, NOW).await.unwrap();
        assert_eq!(candidates.len(), 1);
        let job = &candidates[0];
        assert_eq!(job.weekly_recent_entry_count, 3);
        assert!((job.hours_since_last_check - 2.0).abs() < 1e-9);
        // Oldest entry is d8
        assert!(job.feed_age_days > 8.0 && job.feed_age_days < 8.1);
    }

    #[tokio::test]
    async fn test_candidates_handle_midnight_wrap() {
        let db = test_db().await;
        let feed = add_feed(&db, 1, 1).await;
        let day = 86_400;
        // 00:20 UTC on some day
        let now = 1_699_920_000 + 20 * 60;
        // 23:50 UTC two days before: 30 minutes apart across midnight
        db.store_entries(feed, 1, &[entry_at("wrap", now - 2 * day - 30 * 60)])
            .await
            .unwrap();

        let candidates = db.fetch_refresh_candidates(0, now).await.unwrap();
        assert_eq!(candidates[0].weekly_recent_entry_count, 1);
    }

    #[tokio::test]
    async fn test_candidates_without_entries_have_zero_age() {
        let db = test_db().await;
        add_feed(&db, 1, 1).await;
        let candidates = db.fetch_refresh_candidates(0, NOW).await.unwrap();
        assert_eq!(candidates[0].weekly_recent_entry_count, 0);
        assert_eq!(candidates[0].feed_age_days, 0.0);
    }

    #[tokio::test]
    async fn test_candidates_respect_error_limit_and_order_by_checked() {
        let db = test_db().await;
        let recent = add_feed(&db, 1, 1).await;
        let stale = add_feed(&db, 1, 2).await;
        let broken = add_feed(&db, 1, 3).await;
        db.set_checked_at(recent, Some(NOW - 60)).await.unwrap();
        db.set_checked_at(stale, Some(NOW - 6_000)).await.unwrap();
        db.record_fetch_error(broken, "boom", 0).await.unwrap();
        db.record_fetch_error(broken, "boom", 0).await.unwrap();

        let candidates = db.fetch_refresh_candidates(2, NOW).await.unwrap();
        let ids: Vec<i64> = candidates.iter().map(|j| j.feed_id).collect();
        assert_eq!(ids, vec![stale, recent]);
    }
}
