use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore, SemaphorePermit};
use tokio::time::MissedTickBehavior;

use crate::config::StoreConfig;
use crate::error::{QuizError, QuizResult};
use crate::metrics::{STORE_BATCHES_TOTAL, STORE_BATCH_SIZE, STORE_PENDING_WRITES};
use crate::models::{AttemptRecord, AttemptStats, UserProgress};

/// Writes committed together, all or nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Latest snapshot per user.
    pub progress: Vec<UserProgress>,
    /// In enqueue order, so per-user timestamps stay monotonic.
    pub attempts: Vec<AttemptRecord>,
}

impl WriteBatch {
    pub fn len(&self) -> usize {
        self.progress.len() + self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_empty() && self.attempts.is_empty()
    }
}

#[async_trait]
pub trait ProgressBackend: Send + Sync {
    async fn load_progress(&self, user_id: &str) -> QuizResult<Option<UserProgress>>;

    /// Must apply the whole batch atomically: readers see all of it or none.
    async fn commit_batch(&self, batch: &WriteBatch) -> QuizResult<()>;

    async fn attempt_stats(&self, user_id: &str) -> QuizResult<AttemptStats>;

    async fn ping(&self) -> QuizResult<()>;
}

#[derive(Default)]
struct WriteQueue {
    progress: HashMap<String, UserProgress>,
    attempts: Vec<AttemptRecord>,
}

impl WriteQueue {
    fn len(&self) -> usize {
        self.progress.len() + self.attempts.len()
    }
}

/// Write-batching front of a [`ProgressBackend`].
///
/// Enqueued writes stay in the queue until their batch commits, so readers
/// always find the newest snapshot either here or in the backend. Progress
/// snapshots for the same user coalesce; attempts are appended in order.
pub struct DurableStore {
    backend: Arc<dyn ProgressBackend>,
    handles: Semaphore,
    acquire_timeout: Duration,
    batch_size: usize,
    max_pending: usize,
    flush_interval: Duration,
    queue: Mutex<WriteQueue>,
    flush_lock: tokio::sync::Mutex<()>,
    flushed: DashMap<String, u64>,
    wake: Notify,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn ProgressBackend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            handles: Semaphore::new(config.pool_size),
            acquire_timeout: config.acquire_timeout(),
            batch_size: config.batch_size,
            max_pending: config.max_pending,
            flush_interval: config.flush_interval(),
            queue: Mutex::new(WriteQueue::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            flushed: DashMap::new(),
            wake: Notify::new(),
        }
    }

    async fn acquire_handle(&self) -> QuizResult<SemaphorePermit<'_>> {
        match tokio::time::timeout(self.acquire_timeout, self.handles.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(QuizError::StoreUnavailable("handle pool closed".into())),
            Err(_) => Err(QuizError::StoreUnavailable(format!(
                "no store handle within {:?}",
                self.acquire_timeout
            ))),
        }
    }

    pub async fn read_progress(&self, user_id: &str) -> QuizResult<UserProgress> {
        let queued = self.queue.lock().progress.get(user_id).cloned();
        if let Some(pending) = queued {
            return Ok(pending);
        }

        let _handle = self.acquire_handle().await?;
        self.backend
            .load_progress(user_id)
            .await?
            .ok_or_else(|| QuizError::not_found("user", user_id))
    }

    /// Admits a write to the queue without waiting for the backend.
    pub fn enqueue_write(
        &self,
        progress: UserProgress,
        attempt: Option<AttemptRecord>,
    ) -> QuizResult<()> {
        let pending = {
            let mut queue = self.queue.lock();
            if queue.len() >= self.max_pending {
                drop(queue);
                self.wake.notify_one();
                return Err(QuizError::StoreUnavailable(format!(
                    "write queue full ({} pending)",
                    self.max_pending
                )));
            }

            let newer = queue
                .progress
                .get(&progress.user_id)
                .map_or(true, |queued| queued.revision < progress.revision);
            if newer {
                queue.progress.insert(progress.user_id.clone(), progress);
            }
            if let Some(attempt) = attempt {
                queue.attempts.push(attempt);
            }
            queue.len()
        };

        STORE_PENDING_WRITES.set(pending as i64);
        if pending >= self.batch_size {
            self.wake.notify_one();
        }
        Ok(())
    }

    /// True while a write for this user is queued or in flight.
    pub fn has_pending(&self, user_id: &str) -> bool {
        self.queue.lock().progress.contains_key(user_id)
    }

    pub fn pending_writes(&self) -> usize {
        self.queue.lock().len()
    }

    /// Highest revision known to be durable for this user.
    pub fn flushed_revision(&self, user_id: &str) -> Option<u64> {
        self.flushed.get(user_id).map(|r| *r)
    }

    /// Commits everything queued so far; returns the number of writes.
    pub async fn flush_now(&self) -> QuizResult<usize> {
        let _guard = self.flush_lock.lock().await;

        let batch = {
            let queue = self.queue.lock();
            WriteBatch {
                progress: queue.progress.values().cloned().collect(),
                attempts: queue.attempts.clone(),
            }
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let handle = self.acquire_handle().await;
        let result = match handle {
            Ok(_handle) => self.backend.commit_batch(&batch).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            STORE_BATCHES_TOTAL.with_label_values(&["error"]).inc();
            tracing::error!(
                "Batch commit failed, {} writes stay queued: {}",
                batch.len(),
                e
            );
            return Err(e);
        }

        let remaining = {
            let mut queue = self.queue.lock();
            queue.attempts.drain(..batch.attempts.len());
            for committed in &batch.progress {
                let superseded = queue
                    .progress
                    .get(&committed.user_id)
                    .is_some_and(|queued| queued.revision > committed.revision);
                if !superseded {
                    queue.progress.remove(&committed.user_id);
                }
            }
            queue.len()
        };
        for committed in &batch.progress {
            let mut entry = self.flushed.entry(committed.user_id.clone()).or_insert(0);
            *entry = (*entry).max(committed.revision);
        }

        STORE_BATCHES_TOTAL.with_label_values(&["success"]).inc();
        STORE_BATCH_SIZE.observe(batch.len() as f64);
        STORE_PENDING_WRITES.set(remaining as i64);
        tracing::debug!(
            "Committed batch: {} progress snapshots, {} attempts",
            batch.progress.len(),
            batch.attempts.len()
        );
        Ok(batch.len())
    }

    /// Durable attempt counts plus attempts still waiting in the queue.
    pub async fn attempt_stats(&self, user_id: &str) -> QuizResult<AttemptStats> {
        // no commit may land between the two reads
        let _guard = self.flush_lock.lock().await;
        let durable = {
            let _handle = self.acquire_handle().await?;
            self.backend.attempt_stats(user_id).await?
        };

        let pending = {
            let queue = self.queue.lock();
            let mut stats = AttemptStats::default();
            for attempt in queue.attempts.iter().filter(|a| a.user_id == user_id) {
                stats.record(attempt.correct);
            }
            stats
        };
        Ok(durable.merge(pending))
    }

    pub async fn ping(&self) -> QuizResult<()> {
        let _handle = self.acquire_handle().await?;
        self.backend.ping().await
    }

    /// Background flush loop: every `flush_interval`, or earlier once
    /// `batch_size` writes are pending. Drains the queue on shutdown.
    pub async fn run_flusher(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Starting store flusher (interval {:?}, batch size {})",
            self.flush_interval,
            self.batch_size
        );
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            if let Err(e) = self.flush_now().await {
                tracing::warn!(error = %e, "Scheduled flush failed");
            }
        }

        match self.flush_now().await {
            Ok(n) => tracing::info!("Store flusher stopped, final flush wrote {} writes", n),
            Err(e) => tracing::error!(error = %e, "Final flush failed"),
        }
    }
}
