use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::catalog::Catalog;
use super::durable_store::DurableStore;
use crate::config::CacheConfig;
use crate::error::{QuizError, QuizResult};
use crate::metrics::{record_cache_hit, record_cache_miss, CACHED_USERS};
use crate::models::question::normalize_id;
use crate::models::{QuestionRecord, UserProgress};

/// LRU front of the [`Catalog`]. Evicting an entry has no side effects.
pub struct QuestionCache {
    catalog: Arc<Catalog>,
    entries: Mutex<LruCache<String, Arc<QuestionRecord>>>,
}

impl QuestionCache {
    pub fn new(catalog: Arc<Catalog>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            catalog,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, id: &str) -> QuizResult<Arc<QuestionRecord>> {
        let key = normalize_id(id);
        if let Some(record) = self.entries.lock().get(&key) {
            record_cache_hit("question");
            return Ok(record.clone());
        }

        record_cache_miss("question");
        let record = self.catalog.lookup(&key)?;
        self.entries.lock().put(key, record.clone());
        Ok(record)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

struct CachedUser {
    progress: UserProgress,
    last_touched: DateTime<Utc>,
}

/// Bounded, sharded map of active user state.
///
/// Each shard is an LRU guarded by its own lock. An entry is only evicted
/// once the store has no queued write for that user, so a shard may run
/// over its share of the capacity while writes are waiting to flush.
pub struct UserStateCache {
    shards: Vec<Mutex<LruCache<String, CachedUser>>>,
    shard_capacity: usize,
}

impl UserStateCache {
    pub fn new(config: &CacheConfig) -> Self {
        let shard_count = config.user_shards.max(1);
        let shard_capacity = config.user_capacity.div_ceil(shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::unbounded()))
            .collect();
        Self {
            shards,
            shard_capacity,
        }
    }

    fn shard(&self, user_id: &str) -> &Mutex<LruCache<String, CachedUser>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    pub fn get(&self, user_id: &str, now: DateTime<Utc>) -> Option<UserProgress> {
        let mut shard = self.shard(user_id).lock();
        match shard.get_mut(user_id) {
            Some(entry) => {
                entry.last_touched = now;
                record_cache_hit("user");
                Some(entry.progress.clone())
            }
            None => {
                record_cache_miss("user");
                None
            }
        }
    }

    /// Cache-through read: on a miss the user is loaded from the store.
    /// `NotFound` means the user has never interacted.
    pub async fn get_or_load(
        &self,
        user_id: &str,
        store: &DurableStore,
        now: DateTime<Utc>,
    ) -> QuizResult<UserProgress> {
        if let Some(progress) = self.get(user_id, now) {
            return Ok(progress);
        }

        let progress = store.read_progress(user_id).await?;
        self.put(progress.clone(), store, now);
        Ok(progress)
    }

    /// Inserts or replaces a user's state, then evicts least recently used
    /// entries of the same shard whose writes have all been flushed.
    pub fn put(&self, progress: UserProgress, store: &DurableStore, now: DateTime<Utc>) {
        let user_id = progress.user_id.clone();
        let mut shard = self.shard(&user_id).lock();

        let stale = shard
            .peek(&user_id)
            .is_some_and(|cached| cached.progress.revision > progress.revision);
        if stale {
            return;
        }

        let entry = CachedUser {
            progress,
            last_touched: now,
        };
        if shard.put(user_id.clone(), entry).is_none() {
            CACHED_USERS.inc();
        }

        let excess = shard.len().saturating_sub(self.shard_capacity);
        if excess == 0 {
            return;
        }

        // iter() runs most to least recent
        let victims: Vec<String> = shard
            .iter()
            .rev()
            .map(|(id, _)| id)
            .filter(|id| **id != user_id && !store.has_pending(id))
            .take(excess)
            .cloned()
            .collect();
        for id in &victims {
            shard.pop(id);
        }
        CACHED_USERS.sub(victims.len() as i64);

        if victims.len() < excess {
            tracing::debug!(
                "User cache shard over capacity by {} while writes are pending",
                excess - victims.len()
            );
        }
    }

    /// Drops a user only if nothing is waiting to be flushed for them.
    pub fn evict(&self, user_id: &str, store: &DurableStore) -> QuizResult<bool> {
        if store.has_pending(user_id) {
            return Err(QuizError::StateInvariantViolation(format!(
                "user {} has unflushed writes",
                user_id
            )));
        }
        let removed = self.shard(user_id).lock().pop(user_id).is_some();
        if removed {
            CACHED_USERS.dec();
        }
        Ok(removed)
    }

    /// Evicts users idle for longer than `timeout` whose writes are flushed.
    pub fn sweep_idle(
        &self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
        store: &DurableStore,
    ) -> usize {
        let cutoff = now - timeout;
        let mut removed = 0;

        for shard in &self.shards {
            let mut shard = shard.lock();
            let idle: Vec<String> = shard
                .iter()
                .filter(|(id, entry)| entry.last_touched < cutoff && !store.has_pending(id))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &idle {
                shard.pop(id);
            }
            removed += idle.len();
        }

        CACHED_USERS.sub(removed as i64);
        if removed > 0 {
            tracing::info!("Evicted {} idle user sessions", removed);
        }
        removed
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.shard(user_id).lock().contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
