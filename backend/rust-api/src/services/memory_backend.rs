use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::durable_store::{ProgressBackend, WriteBatch};
use crate::error::{QuizError, QuizResult};
use crate::models::{AttemptRecord, AttemptStats, UserProgress};

#[derive(Default)]
struct Tables {
    progress: HashMap<String, UserProgress>,
    attempts: Vec<AttemptRecord>,
    attempt_ids: HashSet<String>,
}

/// Process-local backend for development runs and tests.
///
/// A batch is applied under a single write lock, so readers observe either
/// all of it or none of it. Attempts are keyed by id like the MongoDB
/// collection: replaying a committed batch stores nothing twice.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    commits: AtomicUsize,
    failing: AtomicBool,
    lose_next_ack: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches committed so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Committed attempts of one user, in commit order.
    pub fn attempts_for(&self, user_id: &str) -> Vec<AttemptRecord> {
        self.tables
            .read()
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }

    /// While set, every call fails as if the database were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The next commit is applied but reported as failed, like a driver
    /// that loses the reply to a commit the server accepted.
    pub fn lose_next_ack(&self) {
        self.lose_next_ack.store(true, Ordering::SeqCst);
    }

    fn check_available(&self) -> QuizResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QuizError::Backend("memory backend offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressBackend for MemoryBackend {
    async fn load_progress(&self, user_id: &str) -> QuizResult<Option<UserProgress>> {
        self.check_available()?;
        Ok(self.tables.read().progress.get(user_id).cloned())
    }

    async fn commit_batch(&self, batch: &WriteBatch) -> QuizResult<()> {
        self.check_available()?;

        let mut tables = self.tables.write();
        for progress in &batch.progress {
            let stale = tables
                .progress
                .get(&progress.user_id)
                .is_some_and(|stored| stored.revision > progress.revision);
            if !stale {
                tables
                    .progress
                    .insert(progress.user_id.clone(), progress.clone());
            }
        }
        for attempt in &batch.attempts {
            if tables.attempt_ids.insert(attempt.id.clone()) {
                tables.attempts.push(attempt.clone());
            }
        }
        drop(tables);

        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.lose_next_ack.swap(false, Ordering::SeqCst) {
            return Err(QuizError::Backend("unknown transaction commit result".into()));
        }
        Ok(())
    }

    async fn attempt_stats(&self, user_id: &str) -> QuizResult<AttemptStats> {
        self.check_available()?;
        let tables = self.tables.read();
        let mut stats = AttemptStats::default();
        for attempt in tables.attempts.iter().filter(|a| a.user_id == user_id) {
            stats.record(attempt.correct);
        }
        Ok(stats)
    }

    async fn ping(&self) -> QuizResult<()> {
        self.check_available()
    }
}
