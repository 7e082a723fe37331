use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::storage::RefreshJob;

/// Tunable constants of the refresh probability model.
///
/// For a feed that published around this time of day during the last week
/// (`cadence > 0`):
///
/// ```text
/// weight = cadence * (1 + growth_base ^ hours / growth_divisor)
/// ```
///
/// otherwise, for a dormant feed:
///
/// ```text
/// weight = baseline_weight + staleness_gradient * hours
/// ```
///
/// and in both cases `probability = weight / clamp(age_days, min_age_days, max_age_days)`.
/// The defaults give a dormant feed an expected refresh within about four hours.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProbabilityModel {
    pub baseline_weight: f64,
    pub staleness_gradient: f64,
    pub growth_base: f64,
    pub growth_divisor: f64,
    pub min_age_days: f64,
    pub max_age_days: f64,
}

impl Default for ProbabilityModel {
    fn default() -> Self {
        Self {
            baseline_weight: 1.0 / 3.0,
            staleness_gradient: 5.0 / 102.0,
            growth_base: 8.0,
            growth_divisor: 256.0,
            min_age_days: 1.0,
            max_age_days: 7.0,
        }
    }
}

impl ProbabilityModel {
    /// Age in days, floored at `min_age_days` and capped at `max_age_days`.
    /// Negative, zero and NaN ages all land on the floor.
    pub fn clamped_age(&self, age_days: f64) -> f64 {
        if age_days.is_nan() {
            return self.min_age_days;
        }
        age_days.max(self.min_age_days).min(self.max_age_days)
    }

    /// Admission weight before the age adjustment.
    pub fn weight(&self, recent_cadence: i64, hours_since_last_check: f64) -> f64 {
        // Clock skew can put checked_at in the future.
        let hours = if hours_since_last_check.is_nan() {
            0.0
        } else {
            hours_since_last_check.max(0.0)
        };

        if recent_cadence > 0 {
            recent_cadence as f64 * (1.0 + self.growth_base.powf(hours) / self.growth_divisor)
        } else {
            self.baseline_weight + self.staleness_gradient * hours
        }
    }

    /// Probability that a candidate should be refreshed now. May exceed 1.
    pub fn probability(&self, job: &RefreshJob) -> f64 {
        self.weight(job.weekly_recent_entry_count, job.hours_since_last_check)
            / self.clamped_age(job.feed_age_days)
    }
}

/// Source of uniform draws in `[0, 1)` for admission decisions.
pub trait RandomSource {
    fn next_unit(&mut self) -> f64;
}

/// Draws from the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&mut self) -> f64 {
        rand::random::<f64>()
    }
}

/// Reproducible draws from a fixed seed.
#[derive(Debug, Clone)]
pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&mut self) -> f64 {
        self.0.random::<f64>()
    }
}

impl<F: FnMut() -> f64> RandomSource for F {
    fn next_unit(&mut self) -> f64 {
        self()
    }
}

/// Admit candidates independently with probability `min(p, 1)`, in the order
/// given, until `max_batch_size` jobs are collected.
///
/// A probability of 1 or more always admits without consuming a draw; a
/// probability of 0 or less never admits.
pub fn admit<R: RandomSource + ?Sized>(
    candidates: Vec<RefreshJob>,
    max_batch_size: usize,
    model: &ProbabilityModel,
    rng: &mut R,
) -> Vec<RefreshJob> {
    let mut admitted = Vec::with_capacity(max_batch_size.min(candidates.len()));
    if max_batch_size == 0 {
        return admitted;
    }

    for job in candidates {
        let probability = model.probability(&job);
        let hit = if probability >= 1.0 {
            true
        } else if probability > 0.0 {
            rng.next_unit() < probability
        } else {
            false
        };

        if hit {
            admitted.push(job);
            if admitted.len() >= max_batch_size {
                break;
            }
        }
    }

    admitted
}
