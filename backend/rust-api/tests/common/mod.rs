#![allow(dead_code)]

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use quizbot_api::{
    config::{BackendKind, Config},
    create_router,
    models::interaction::{Presentation, Reply},
    models::{QuestionDraft, UserProgress},
    services::{
        catalog::Catalog, durable_store::ProgressBackend, memory_backend::MemoryBackend, AppState,
    },
};

pub struct TestApp {
    pub state: Arc<AppState>,
    pub backend: Arc<MemoryBackend>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// In-memory configuration with a rate limit generous enough that only
/// tests about rate limiting ever hit it.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database.backend = BackendKind::Memory;
    config.rate_limit.requests_per_minute = 10_000;
    config.rate_limit.burst_capacity = 10_000;
    config.quiz.metrics_auth = "metrics:secret".to_string();
    config
}

/// `count` single-answer questions; option A is always correct.
pub fn sample_drafts(count: usize) -> Vec<QuestionDraft> {
    (1..=count)
        .map(|i| QuestionDraft {
            id: format!("Q{}", i),
            prompt: format!("Sample question number {}?", i),
            options: vec!["Right".into(), "Wrong".into(), "Also wrong".into()],
            correct_answers: vec!["Right".into()],
            explanation: format!("Explanation {}", i),
            ..Default::default()
        })
        .collect()
}

pub fn create_test_app_with(config: Config, drafts: Vec<QuestionDraft>) -> TestApp {
    init_tracing();
    let catalog = Catalog::load(drafts).expect("sample catalog must be valid");
    let backend = Arc::new(MemoryBackend::new());
    let state = Arc::new(AppState::new(config, catalog, backend.clone()));
    TestApp { state, backend }
}

pub fn create_test_app(question_count: usize) -> TestApp {
    create_test_app_with(test_config(), sample_drafts(question_count))
}

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn presentation(reply: Reply) -> Presentation {
    match reply {
        Reply::Question(p) => p,
        other => panic!("expected a question, got {:?}", other),
    }
}

/// Progress as committed to the backend, bypassing the write queue.
pub async fn backend_progress(app: &TestApp, user_id: &str) -> UserProgress {
    app.backend
        .load_progress(user_id)
        .await
        .unwrap()
        .expect("user must be durable")
}
