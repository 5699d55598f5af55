use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::cache::{QuestionCache, UserStateCache};
use super::catalog::Catalog;
use super::durable_store::DurableStore;
use super::rate_limiter::RateLimiter;
use super::scheduler::{ReviewOutcome, Scheduler};
use crate::config::Config;
use crate::error::{QuizError, QuizResult};
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, INTERACTIONS_TOTAL};
use crate::models::interaction::{
    AnswerFeedback, InteractionKind, InteractionRequest, InteractionResponse, Notice, Outcome,
    Presentation, Reply, StatsSummary,
};
use crate::models::{AttemptRecord, Language, QuestionRecord, UserProgress};
use crate::utils::retry::{retry_async_when, RetryConfig};

lazy_static! {
    static ref ANSWER_LETTER: Regex = Regex::new(r"[A-Z]").unwrap();
}

const INVALID_ANSWER_HINT: &str = "Please reply with letter(s) like A, BC, or A,B,C";

/// Maps letters in `text` onto 0-based option indices.
///
/// Letters beyond the option count are ignored; the result is sorted and
/// free of duplicates. No usable letter is an `InvalidAnswer`.
pub fn parse_answer(text: &str, option_count: usize) -> QuizResult<Vec<usize>> {
    let upper = text.trim().to_uppercase();
    let mut selected: Vec<usize> = ANSWER_LETTER
        .find_iter(&upper)
        .filter_map(|m| m.as_str().bytes().next())
        .map(|b| (b - b'A') as usize)
        .filter(|&index| index < option_count)
        .collect();
    selected.sort_unstable();
    selected.dedup();

    if selected.is_empty() {
        return Err(QuizError::InvalidAnswer(INVALID_ANSWER_HINT.to_string()));
    }
    Ok(selected)
}

fn is_skip(text: &str) -> bool {
    text.trim().trim_start_matches('/').eq_ignore_ascii_case("skip")
}

/// One async mutex per active user: all work for a user runs one at a time.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drops locks nobody holds or waits on.
    pub fn sweep(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Single entry point for chat interactions.
///
/// Every operation passes the rate limiter first, then runs under the
/// user's lock. Durable and cached state are only written once every
/// fallible step has succeeded, so a failed call leaves no trace.
pub struct SessionOrchestrator {
    limiter: RateLimiter,
    questions: QuestionCache,
    users: UserStateCache,
    store: Arc<DurableStore>,
    scheduler: Scheduler,
    locks: UserLocks,
    reminder_every: u64,
    retry: RetryConfig,
}

impl SessionOrchestrator {
    pub fn new(catalog: Arc<Catalog>, store: Arc<DurableStore>, config: &Config) -> Self {
        Self {
            limiter: RateLimiter::new(&config.rate_limit),
            questions: QuestionCache::new(catalog, config.cache.question_capacity),
            users: UserStateCache::new(&config.cache),
            store,
            scheduler: Scheduler::new(config.scheduler.clone()),
            locks: UserLocks::default(),
            reminder_every: config.quiz.reminder_every,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn users(&self) -> &UserStateCache {
        &self.users
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.questions.catalog()
    }

    fn admit(&self, user_id: &str, now: DateTime<Utc>) -> QuizResult<()> {
        if self.limiter.try_acquire(user_id, now) {
            Ok(())
        } else {
            Err(QuizError::RateLimited {
                retry_after_secs: self.limiter.retry_after_secs(user_id, now).max(1),
            })
        }
    }

    /// Cached or stored progress; a user never seen before starts fresh.
    async fn load_user(&self, user_id: &str, now: DateTime<Utc>) -> QuizResult<UserProgress> {
        let loaded = retry_async_when(self.retry.clone(), QuizError::is_transient, || {
            self.users.get_or_load(user_id, &self.store, now)
        })
        .await;

        match loaded {
            Ok(progress) => Ok(progress),
            Err(QuizError::NotFound { .. }) => {
                tracing::info!("Creating progress for new user {}", user_id);
                Ok(UserProgress::new(user_id, now))
            }
            Err(e) => Err(e),
        }
    }

    /// The question currently presented, if it still exists. A dangling
    /// identifier is cleared instead of failing the request.
    fn resolve_current(
        &self,
        progress: &mut UserProgress,
        now: DateTime<Utc>,
    ) -> QuizResult<Option<Arc<QuestionRecord>>> {
        let Some(id) = progress.current_question.clone() else {
            return Ok(None);
        };

        match self.questions.get(&id) {
            Ok(question) => Ok(Some(question)),
            Err(QuizError::NotFound { .. }) => {
                let violation = QuizError::StateInvariantViolation(format!(
                    "current question {} of user {} is not in the catalog",
                    id, progress.user_id
                ));
                tracing::error!("{}", violation);
                progress.present(None, now);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn is_review(progress: &UserProgress, question_id: &str) -> bool {
        progress
            .memory
            .get(question_id)
            .is_some_and(|m| m.total_attempts > 0)
    }

    /// Queues the write (retrying while the store is saturated), then
    /// refreshes the cache.
    async fn commit(
        &self,
        progress: UserProgress,
        attempt: Option<AttemptRecord>,
        now: DateTime<Utc>,
    ) -> QuizResult<()> {
        retry_async_when(self.retry.clone(), QuizError::is_transient, || {
            let progress = progress.clone();
            let attempt = attempt.clone();
            async move { self.store.enqueue_write(progress, attempt) }
        })
        .await?;

        self.users.put(progress, &self.store, now);
        Ok(())
    }

    /// Presents `next`, persisting the updated progress and attempt.
    async fn advance(
        &self,
        mut progress: UserProgress,
        next: Option<String>,
        attempt: Option<AttemptRecord>,
        feedback: Option<AnswerFeedback>,
        donation_reminder: bool,
        now: DateTime<Utc>,
    ) -> QuizResult<Reply> {
        let question = next.as_deref().map(|id| self.questions.get(id)).transpose()?;
        let is_review = next
            .as_deref()
            .is_some_and(|id| Self::is_review(&progress, id));

        progress.present(next, now);
        progress.touch(now);
        self.commit(progress, attempt, now).await?;

        Ok(match question {
            Some(question) => Reply::Question(Presentation {
                question,
                is_review,
                donation_reminder,
                feedback,
            }),
            None => Reply::Notice(Notice::NoQuestionsAvailable),
        })
    }

    fn select_next(&self, progress: &UserProgress, now: DateTime<Utc>) -> Option<String> {
        let pool = self.catalog().pool(progress.language);
        self.scheduler
            .select_next(progress, &pool, now)
            .map(str::to_string)
    }

    /// Re-presents the current question, or selects one if there is none.
    async fn start_locked(
        &self,
        mut progress: UserProgress,
        now: DateTime<Utc>,
    ) -> QuizResult<Reply> {
        if let Some(question) = self.resolve_current(&mut progress, now)? {
            let is_review = Self::is_review(&progress, &question.id);
            return Ok(Reply::Question(Presentation {
                question,
                is_review,
                donation_reminder: false,
                feedback: None,
            }));
        }

        let next = self.select_next(&progress, now);
        self.advance(progress, next, None, None, false, now).await
    }

    pub async fn handle_start(
        &self,
        user_id: &str,
        language: Option<Language>,
        now: DateTime<Utc>,
    ) -> QuizResult<Reply> {
        self.admit(user_id, now)?;
        let _guard = self.locks.lock(user_id).await;

        let mut progress = self.load_user(user_id, now).await?;
        if let Some(language) = language.filter(|l| *l != progress.language) {
            progress.language = language;
            progress.present(None, now);
        }
        self.start_locked(progress, now).await
    }

    /// Switches the question pool and presents a question from it.
    pub async fn handle_language(
        &self,
        user_id: &str,
        language: Language,
        now: DateTime<Utc>,
    ) -> QuizResult<Reply> {
        self.admit(user_id, now)?;
        let _guard = self.locks.lock(user_id).await;

        let mut progress = self.load_user(user_id, now).await?;
        tracing::info!("User {} switched language to {}", user_id, language);
        progress.language = language;
        progress.present(None, now);
        self.start_locked(progress, now).await
    }

    pub async fn handle_answer(
        &self,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> QuizResult<Reply> {
        if is_skip(text) {
            return self.handle_skip(user_id, now).await;
        }

        self.admit(user_id, now)?;
        let _guard = self.locks.lock(user_id).await;

        let mut progress = self.load_user(user_id, now).await?;
        let Some(question) = self.resolve_current(&mut progress, now)? else {
            return self.start_locked(progress, now).await;
        };

        let selection = parse_answer(text, question.options.len())?;
        let correct = question.is_correct_selection(&selection);
        tracing::info!(
            "Processing answer: user={}, question={}, answer={:?}, correct={}",
            user_id,
            question.id,
            selection,
            correct
        );

        // memory and attempt share the clamped instant
        let timestamp = progress.next_attempt_timestamp(now);
        let pool = self.catalog().pool(progress.language);
        let decision = self.scheduler.decide(
            &progress,
            &question.id,
            ReviewOutcome::from_correct(correct),
            &pool,
            timestamp,
        );

        let attempt = AttemptRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            question_id: question.id.clone(),
            language: question.language,
            timestamp,
            answer: selection,
            correct,
            time_taken_secs: progress
                .presented_at
                .map(|at| (timestamp - at).num_seconds().max(0)),
        };

        progress.memory.insert(question.id.clone(), decision.memory);
        progress.total_answered += 1;
        progress.last_attempt_at = Some(timestamp);
        let donation_reminder =
            self.reminder_every > 0 && progress.total_answered % self.reminder_every == 0;

        let feedback = AnswerFeedback {
            correct,
            correct_answers: question
                .correct_answers()
                .into_iter()
                .map(str::to_string)
                .collect(),
            explanation: question.explanation.clone(),
        };

        let reply = self
            .advance(
                progress,
                decision.next_question,
                Some(attempt),
                Some(feedback),
                donation_reminder,
                now,
            )
            .await?;

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if correct { "true" } else { "false" }])
            .inc();
        Ok(reply)
    }

    /// Neutral skip: the question goes back into the pool at the baseline
    /// interval, with no attempt recorded and no counter change.
    pub async fn handle_skip(&self, user_id: &str, now: DateTime<Utc>) -> QuizResult<Reply> {
        self.admit(user_id, now)?;
        let _guard = self.locks.lock(user_id).await;

        let mut progress = self.load_user(user_id, now).await?;
        let Some(question) = self.resolve_current(&mut progress, now)? else {
            return Ok(Reply::Notice(Notice::NoActiveQuestion));
        };

        let pool = self.catalog().pool(progress.language);
        let decision =
            self.scheduler
                .decide(&progress, &question.id, ReviewOutcome::Skipped, &pool, now);
        tracing::debug!("User {} skipped question {}", user_id, question.id);

        progress.memory.insert(question.id.clone(), decision.memory);
        self.advance(progress, decision.next_question, None, None, false, now)
            .await
    }

    /// Returns the current question again without touching any state.
    pub async fn handle_resend(&self, user_id: &str, now: DateTime<Utc>) -> QuizResult<Reply> {
        self.admit(user_id, now)?;
        let _guard = self.locks.lock(user_id).await;

        let mut progress = self.load_user(user_id, now).await?;
        Ok(match self.resolve_current(&mut progress, now)? {
            Some(question) => {
                let is_review = Self::is_review(&progress, &question.id);
                Reply::Question(Presentation {
                    question,
                    is_review,
                    donation_reminder: false,
                    feedback: None,
                })
            }
            None => Reply::Notice(Notice::NoActiveQuestion),
        })
    }

    pub async fn handle_stats(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> QuizResult<StatsSummary> {
        self.admit(user_id, now)?;
        let _guard = self.locks.lock(user_id).await;

        let progress = self.load_user(user_id, now).await?;
        let stats = retry_async_when(self.retry.clone(), QuizError::is_transient, || {
            self.store.attempt_stats(user_id)
        })
        .await?;

        Ok(StatsSummary {
            total_attempts: stats.total_attempts,
            correct_answers: stats.correct_answers,
            accuracy_percentage: stats.accuracy_percentage(),
            current_question: progress.current_question,
            language: progress.language,
        })
    }

    async fn route(&self, request: &InteractionRequest, now: DateTime<Utc>) -> QuizResult<Reply> {
        let user_id = request.user_id.as_str();
        let text = request.text.as_deref().unwrap_or("");
        match request.kind {
            InteractionKind::Start => self.handle_start(user_id, request.language, now).await,
            InteractionKind::Answer => self.handle_answer(user_id, text, now).await,
            InteractionKind::Stats => self.handle_stats(user_id, now).await.map(Reply::Stats),
            InteractionKind::Resend => self.handle_resend(user_id, now).await,
            InteractionKind::Skip => self.handle_skip(user_id, now).await,
            InteractionKind::Language => {
                let language = match request.language {
                    Some(language) => language,
                    None => text.parse::<Language>().map_err(QuizError::InvalidAnswer)?,
                };
                self.handle_language(user_id, language, now).await
            }
        }
    }

    /// Runs one interaction and folds every error into the external
    /// outcome vocabulary.
    pub async fn dispatch(&self, request: InteractionRequest) -> InteractionResponse {
        let now = request.timestamp.unwrap_or_else(Utc::now);
        let response = match self.route(&request, now).await {
            Ok(reply) => InteractionResponse {
                outcome: Outcome::Success,
                reply,
            },
            Err(err) => {
                let notice = match &err {
                    QuizError::RateLimited { retry_after_secs } => Notice::SlowDown {
                        retry_after_secs: *retry_after_secs,
                    },
                    QuizError::InvalidAnswer(message) => Notice::InvalidAnswer {
                        message: message.clone(),
                    },
                    other => {
                        tracing::error!(
                            "Interaction {} for user {} failed: {}",
                            request.kind.as_str(),
                            request.user_id,
                            other
                        );
                        Notice::TryAgainLater
                    }
                };
                InteractionResponse {
                    outcome: err.outcome(),
                    reply: Reply::Notice(notice),
                }
            }
        };

        INTERACTIONS_TOTAL
            .with_label_values(&[request.kind.as_str(), response.outcome.as_str()])
            .inc();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer_letters() {
        assert_eq!(parse_answer("A", 3).unwrap(), vec![0]);
        assert_eq!(parse_answer("cb", 3).unwrap(), vec![1, 2]);
        assert_eq!(parse_answer("A, C, a", 3).unwrap(), vec![0, 2]);
        // out of range letters are dropped
        assert_eq!(parse_answer("AZ", 2).unwrap(), vec![0]);
    }

    #[test]
    fn test_parse_answer_without_letters_is_invalid() {
        assert!(matches!(
            parse_answer("42", 3),
            Err(QuizError::InvalidAnswer(_))
        ));
        assert!(matches!(parse_answer("D", 3), Err(QuizError::InvalidAnswer(_))));
    }

    #[test]
    fn test_skip_detection() {
        assert!(is_skip("skip"));
        assert!(is_skip(" SKIP "));
        assert!(is_skip("/skip"));
        assert!(!is_skip("skipped"));
    }

    #[tokio::test]
    async fn test_user_locks_serialize_and_sweep() {
        let locks = UserLocks::default();
        let guard = locks.lock("u1").await;
        assert_eq!(locks.sweep(), 0);
        drop(guard);
        assert_eq!(locks.sweep(), 1);
        assert!(locks.is_empty());
    }
}
