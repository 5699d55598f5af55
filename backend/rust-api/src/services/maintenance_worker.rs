use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use super::session_orchestrator::SessionOrchestrator;
use crate::config::Config;
use crate::metrics::MAINTENANCE_WORKER_TICKS_TOTAL;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub buckets: usize,
    pub users: usize,
    pub locks: usize,
}

/// Periodically releases memory held for idle users: rate-limit buckets,
/// flushed user-state cache entries and unused per-user locks.
pub struct MaintenanceWorker {
    orchestrator: Arc<SessionOrchestrator>,
    interval: Duration,
    session_timeout: chrono::Duration,
}

impl MaintenanceWorker {
    pub fn new(orchestrator: Arc<SessionOrchestrator>, config: &Config) -> Self {
        Self {
            orchestrator,
            interval: Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)),
            session_timeout: chrono::Duration::seconds(config.cache.session_timeout_secs as i64),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting maintenance worker loop (interval {}s)",
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        // the first tick fires immediately; nothing is idle yet
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            let report = self.run_once();
            MAINTENANCE_WORKER_TICKS_TOTAL
                .with_label_values(&["success"])
                .inc();
            info!(
                buckets = report.buckets,
                users = report.users,
                locks = report.locks,
                pending_writes = self.orchestrator.store().pending_writes(),
                "Maintenance worker tick completed"
            );
        }
        info!("Maintenance worker stopped");
    }

    pub fn run_once(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let orchestrator = &self.orchestrator;
        SweepReport {
            buckets: orchestrator.limiter().sweep(now),
            users: orchestrator
                .users()
                .sweep_idle(now, self.session_timeout, orchestrator.store()),
            locks: orchestrator.locks().sweep(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::models::QuestionDraft;
    use crate::services::catalog::Catalog;
    use crate::services::durable_store::DurableStore;
    use crate::services::memory_backend::MemoryBackend;

    fn worker() -> MaintenanceWorker {
        let mut config = Config::default();
        config.database.backend = BackendKind::Memory;
        let catalog = Catalog::load(vec![QuestionDraft {
            id: "q1".into(),
            prompt: "Which way?".into(),
            options: vec!["Left".into(), "Right".into()],
            correct_answers: vec!["Left".into()],
            ..Default::default()
        }])
        .unwrap();
        let store = Arc::new(DurableStore::new(
            Arc::new(MemoryBackend::new()),
            &config.store,
        ));
        let orchestrator = Arc::new(SessionOrchestrator::new(Arc::new(catalog), store, &config));
        MaintenanceWorker::new(orchestrator, &config)
    }

    #[tokio::test]
    async fn test_sweep_releases_idle_user_state() {
        let worker = worker();
        let orch = worker.orchestrator.clone();
        let then = Utc::now() - chrono::Duration::days(2);
        orch.handle_start("idle", None, then).await.unwrap();

        // queued writes pin the cached user
        let pinned = worker.sweep_at(Utc::now());
        assert_eq!(pinned.users, 0);
        assert_eq!(pinned.buckets, 1);
        assert_eq!(pinned.locks, 1);
        assert!(orch.users().contains("idle"));

        orch.store().flush_now().await.unwrap();
        let report = worker.sweep_at(Utc::now());
        assert_eq!(report.users, 1);
        assert!(!orch.users().contains("idle"));
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_users() {
        let worker = worker();
        let now = Utc::now();
        worker
            .orchestrator
            .handle_start("active", None, now)
            .await
            .unwrap();
        worker.orchestrator.store().flush_now().await.unwrap();

        let report = worker.sweep_at(now + chrono::Duration::seconds(5));
        assert_eq!(report, SweepReport { buckets: 0, users: 0, locks: 1 });
        assert!(worker.orchestrator.users().contains("active"));
    }
}
