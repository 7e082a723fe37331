//! Refresh batch selection.
//!
//! Two policies pick which feeds to check in a cycle: strict due-time order,
//! and a probabilistic model that favours feeds publishing around this hour,
//! stale feeds and young feeds.

mod probability;

pub use probability::{admit, ProbabilityModel, RandomSource, SeededRandom, ThreadRandom};

use serde::Deserialize;

use crate::storage::{Database, DatabaseError, RefreshJob};

/// Which policy the polling loop uses for automatic batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    RoundRobin,
    EntryFrequency,
}

impl std::str::FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "round_robin" => Ok(SchedulerKind::RoundRobin),
            "entry_frequency" => Ok(SchedulerKind::EntryFrequency),
            other => Err(format!("unknown scheduler '{}'", other)),
        }
    }
}

/// Selects refresh batches from storage. Reads only.
#[derive(Debug, Clone)]
pub struct Scheduler {
    db: Database,
    model: ProbabilityModel,
}

impl Scheduler {
    pub fn new(db: Database, model: ProbabilityModel) -> Self {
        Self { db, model }
    }

    pub fn model(&self) -> &ProbabilityModel {
        &self.model
    }

    /// Enabled feeds whose next check time has passed and whose error count
    /// is below `error_count_threshold`, earliest due first.
    ///
    /// A threshold of zero or below disables the error filter.
    pub async fn select_due_batch(
        &self,
        max_batch_size: usize,
        error_count_threshold: i64,
    ) -> Result<Vec<RefreshJob>, DatabaseError> {
        if max_batch_size == 0 {
            return Ok(Vec::new());
        }

        let jobs = self
            .db
            .batch()
            .without_disabled_feeds()
            .with_next_check_expired()
            .with_error_limit(error_count_threshold)
            .with_batch_size(max_batch_size)
            .fetch_jobs()
            .await?;

        tracing::debug!(count = jobs.len(), "Selected due batch");
        Ok(jobs)
    }

    /// Every enabled feed of one user, regardless of error count or due time.
    /// Used for user-initiated refreshes.
    pub async fn select_user_batch(
        &self,
        user_id: i64,
        max_batch_size: usize,
    ) -> Result<Vec<RefreshJob>, DatabaseError> {
        if max_batch_size == 0 {
            return Ok(Vec::new());
        }

        let jobs = self
            .db
            .batch()
            .with_user_id(user_id)
            .without_disabled_feeds()
            .with_batch_size(max_batch_size)
            .fetch_jobs()
            .await?;

        tracing::debug!(user_id, count = jobs.len(), "Selected user batch");
        Ok(jobs)
    }

    /// Admit each candidate with a probability derived from its publishing
    /// cadence, staleness and age. Candidates are considered least recently
    /// checked first.
    pub async fn select_probabilistic_batch<R: RandomSource + ?Sized>(
        &self,
        max_batch_size: usize,
        error_count_threshold: i64,
        rng: &mut R,
    ) -> Result<Vec<RefreshJob>, DatabaseError> {
        self.select_probabilistic_batch_at(
            max_batch_size,
            error_count_threshold,
            chrono::Utc::now().timestamp(),
            rng,
        )
        .await
    }

    /// [`Self::select_probabilistic_batch`] evaluated at a fixed instant.
    pub async fn select_probabilistic_batch_at<R: RandomSource + ?Sized>(
        &self,
        max_batch_size: usize,
        error_count_threshold: i64,
        now: i64,
        rng: &mut R,
    ) -> Result<Vec<RefreshJob>, DatabaseError> {
        if max_batch_size == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .db
            .fetch_refresh_candidates(error_count_threshold, now)
            .await?;
        let considered = candidates.len();
        let jobs = admit(candidates, max_batch_size, &self.model, rng);

        tracing::debug!(
            considered,
            admitted = jobs.len(),
            "Selected probabilistic batch"
        );
        Ok(jobs)
    }

    /// Automatic batch using the configured policy.
    pub async fn select_batch<R: RandomSource + ?Sized>(
        &self,
        kind: SchedulerKind,
        max_batch_size: usize,
        error_count_threshold: i64,
        rng: &mut R,
    ) -> Result<Vec<RefreshJob>, DatabaseError> {
        match kind {
            SchedulerKind::RoundRobin => {
                self.select_due_batch(max_batch_size, error_count_threshold)
                    .await
            }
            SchedulerKind::EntryFrequency => {
                self.select_probabilistic_batch(max_batch_size, error_count_threshold, rng)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Entry, NewFeed};

    async fn setup() -> (Database, Scheduler) {
        let db = Database::open(":memory:").await.unwrap();
        let scheduler = Scheduler::new(db.clone(), ProbabilityModel::default());
        (db, scheduler)
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

    #[test]
    fn test_scheduler_kind_from_str() {
        assert_eq!(
            "round_robin".parse::<SchedulerKind>().unwrap(),
            SchedulerKind::RoundRobin
        );
        assert_eq!(
            " Entry_Frequency ".parse::<SchedulerKind>().unwrap(),
            SchedulerKind::EntryFrequency
        );
        assert!("weekly".parse::<SchedulerKind>().is_err());
    }

    #[tokio::test]
    async fn test_due_batch_respects_threshold_and_order() {
        let (db, scheduler) = setup().await;
        let a = add_feed(&db, 1, 1).await;
        let b = add_feed(&db, 1, 2).await;
        let c = add_feed(&db, 1, 3).await;

        db.set_next_check_at(a, 30).await.unwrap();
        db.set_next_check_at(b, 10).await.unwrap();
        db.set_next_check_at(c, 20).await.unwrap();
        for _ in 0..3 {
            db.record_fetch_error(c, "boom", 20).await.unwrap();
        }

        let jobs = scheduler.select_due_batch(10, 3).await.unwrap();
        let ids: Vec<i64> = jobs.iter().map(|j| j.feed_id).collect();
        assert_eq!(ids, vec![b, a]);

        let jobs = scheduler.select_due_batch(10, 0).await.unwrap();
        assert_eq!(jobs.len(), 3);
    }

    #[tokio::test]
    async fn test_zero_batch_size_selects_nothing() {
        let (db, scheduler) = setup().await;
        add_feed(&db, 1, 1).await;
        assert!(scheduler.select_due_batch(0, 0).await.unwrap().is_empty());
        assert!(scheduler.select_user_batch(1, 0).await.unwrap().is_empty());
        let mut rng = SeededRandom::new(1);
        assert!(scheduler
            .select_probabilistic_batch(0, 0, &mut rng)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_probabilistic_never_checked_feed_is_admitted() {
        let (db, scheduler) = setup().await;
        let id = add_feed(&db, 1, 1).await;

        // Never checked: staleness counts from the epoch.
        let mut rng = SeededRandom::new(42);
        let jobs = scheduler
            .select_probabilistic_batch(10, 0, &mut rng)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].feed_id, id);
        assert_eq!(jobs[0].weekly_recent_entry_count, 0);
    }

    #[tokio::test]
    async fn test_probabilistic_fresh_dormant_feed_uses_draw() {
        let (db, scheduler) = setup().await;
        let now = 1_700_000_000;
        let id = add_feed(&db, 1, 1).await;
        db.set_checked_at(id, Some(now)).await.unwrap();

        // p = 1/3 for a just-checked dormant feed.
        let jobs = scheduler
            .select_probabilistic_batch_at(10, 0, now, &mut || 0.5)
            .await
            .unwrap();
        assert!(jobs.is_empty());

        let jobs = scheduler
            .select_probabilistic_batch_at(10, 0, now, &mut || 0.2)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_probabilistic_counts_cadence() {
        let (db, scheduler) = setup().await;
        let now = 1_700_000_000;
        let id = add_feed(&db, 1, 1).await;
        db.set_checked_at(id, Some(now)).await.unwrap();

        let day = 86_400;
        let entries: Vec<Entry> = (1..=3)
            .map(|d| Entry {
                hash: format!("h{d}"),
                title: format!("Entry {d}"),
                url: None,
                comments_url: None,
                content: None,
                author: None,
                published_at: Some(now - d * day + 600),
            })
            .collect();
        db.store_entries(id, 1, &entries).await.unwrap();

        // cadence 3, age ~3 days: p = 3 * (1 + 1/256) / 3 > 1
        let jobs = scheduler
            .select_probabilistic_batch_at(10, 0, now, &mut || 0.999)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].weekly_recent_entry_count, 3);
        assert!(jobs[0].feed_age_days > 2.9 && jobs[0].feed_age_days < 3.0);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_every_batch() {
        let (db, scheduler) = setup().await;
        add_feed(&db, 1, 1).await;
        db.pool.close().await;

        assert!(matches!(
            scheduler.select_due_batch(10, 0).await,
            Err(DatabaseError::Other(_))
        ));
        assert!(matches!(
            scheduler.select_user_batch(1, 10).await,
            Err(DatabaseError::Other(_))
        ));
        let mut rng = SeededRandom::new(1);
        assert!(matches!(
            scheduler
                .select_probabilistic_batch_at(10, 0, 1_700_000_000, &mut rng)
                .await,
            Err(DatabaseError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_probabilistic_batch_fails_when_entry_statistics_fail() {
        let (db, scheduler) = setup().await;
        add_feed(&db, 1, 1).await;
        sqlx::query("DROP TABLE entries")
            .execute(&db.pool)
            .await
            .unwrap();

        // Due selection only reads feeds.
        assert_eq!(scheduler.select_due_batch(10, 0).await.unwrap().len(), 1);
        let result = scheduler
            .select_probabilistic_batch_at(10, 0, 1_700_000_000, &mut || 0.0)
            .await;
        assert!(result.is_err());
    }
}
