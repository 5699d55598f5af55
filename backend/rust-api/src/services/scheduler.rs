//! Spaced repetition policy.
//!
//! Deterministic and side-effect free: the same progress, outcome and `now`
//! always produce the same memory update and the same next question.
//!
//! - first exposure starts at the baseline interval with the default ease
//! - correct: interval × ease (capped), then ease += increment (capped at max)
//! - incorrect: interval back to baseline, streak reset, ease -= decrement
//!   (floored at min)
//! - skipped: back into the pool at baseline, ease and streak untouched

use chrono::{DateTime, Duration, Utc};

use crate::config::SchedulerConfig;
use crate::models::{QuestionMemory, UserProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    Correct,
    Incorrect,
    Skipped,
}

impl ReviewOutcome {
    pub fn from_correct(correct: bool) -> Self {
        if correct {
            ReviewOutcome::Correct
        } else {
            ReviewOutcome::Incorrect
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub memory: QuestionMemory,
    pub next_question: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn baseline(&self) -> Duration {
        Duration::seconds(self.config.baseline_interval_secs)
    }

    /// Updated memory for one review of a question.
    pub fn review(
        &self,
        memory: Option<&QuestionMemory>,
        outcome: ReviewOutcome,
        now: DateTime<Utc>,
    ) -> QuestionMemory {
        let cfg = &self.config;
        let (interval, ease, streak, attempts) = match memory {
            Some(m) => (
                m.interval().max(self.baseline()),
                m.ease_factor,
                m.consecutive_correct,
                m.total_attempts,
            ),
            None => (self.baseline(), cfg.default_ease, 0, 0),
        };

        let (next_interval, next_ease, next_streak, next_attempts) = match outcome {
            ReviewOutcome::Correct => {
                let secs = (interval.num_seconds() as f64 * ease).round() as i64;
                let secs = secs.clamp(cfg.baseline_interval_secs, cfg.max_interval_secs);
                (
                    Duration::seconds(secs),
                    (ease + cfg.ease_increment).min(cfg.max_ease),
                    streak + 1,
                    attempts + 1,
                )
            }
            ReviewOutcome::Incorrect => (
                self.baseline(),
                (ease - cfg.ease_decrement).max(cfg.min_ease),
                0,
                attempts + 1,
            ),
            ReviewOutcome::Skipped => (self.baseline(), ease, streak, attempts),
        };

        QuestionMemory {
            last_seen: now,
            next_due: now + next_interval,
            consecutive_correct: next_streak,
            total_attempts: next_attempts,
            ease_factor: next_ease,
        }
    }

    /// Picks the next question from `pool` (catalog order).
    ///
    /// Due questions first (earliest due, ties by identifier), then the first
    /// unattempted question, then the question due soonest.
    pub fn select_next<'a>(
        &self,
        progress: &UserProgress,
        pool: &[&'a str],
        now: DateTime<Utc>,
    ) -> Option<&'a str> {
        let mut due: Option<(DateTime<Utc>, &'a str)> = None;
        let mut unattempted: Option<&'a str> = None;
        let mut soonest: Option<(DateTime<Utc>, &'a str)> = None;

        for &id in pool {
            match progress.memory.get(id) {
                Some(memory) => {
                    let key = (memory.next_due, id);
                    if memory.is_due(now) && due.map_or(true, |best| key < best) {
                        due = Some(key);
                    }
                    if soonest.map_or(true, |best| key < best) {
                        soonest = Some(key);
                    }
                }
                None => {
                    if unattempted.is_none() {
                        unattempted = Some(id);
                    }
                }
            }
        }

        due.map(|(_, id)| id)
            .or(unattempted)
            .or(soonest.map(|(_, id)| id))
    }

    /// Applies `outcome` for `question_id` and selects what to show next.
    pub fn decide(
        &self,
        progress: &UserProgress,
        question_id: &str,
        outcome: ReviewOutcome,
        pool: &[&str],
        now: DateTime<Utc>,
    ) -> Decision {
        let memory = self.review(progress.memory.get(question_id), outcome, now);

        let mut projected = progress.clone();
        projected.memory.insert(question_id.to_string(), memory.clone());
        let next_question = self
            .select_next(&projected, pool, now)
            .map(str::to_string);

        Decision {
            memory,
            next_question,
        }
    }
}
