// Session orchestration scenarios over the in-memory backend
use chrono::Duration;
use quizbot_api::{
    models::interaction::{InteractionKind, InteractionRequest, Notice, Outcome, Reply},
    models::UserProgress,
    QuizError,
};
use tokio_test::assert_ok;

mod common;
use common::{create_test_app, create_test_app_with, presentation, sample_drafts, t0, test_config};

const DAY: i64 = 86_400;

#[tokio::test]
async fn test_interval_grows_then_resets() {
    let app = create_test_app(1);
    let orch = &app.state.orchestrator;

    let first = presentation(orch.handle_start("alice", None, t0()).await.unwrap());
    assert_eq!(first.question.id, "q1");
    assert!(!first.is_review);

    // correct at t0: baseline x default ease
    let reply = presentation(orch.handle_answer("alice", "A", t0()).await.unwrap());
    assert!(reply.feedback.as_ref().unwrap().correct);
    let progress = app.state.store.read_progress("alice").await.unwrap();
    let m1 = progress.memory["q1"].clone();
    assert_eq!(m1.next_due, t0() + Duration::seconds((DAY as f64 * 2.5) as i64));
    assert_eq!(m1.consecutive_correct, 1);

    // the only question comes back as a review
    assert_eq!(reply.question.id, "q1");
    assert!(reply.is_review);

    // correct again one baseline later: interval grows
    let t1 = t0() + Duration::seconds(DAY);
    orch.handle_answer("alice", "a", t1).await.unwrap();
    let m2 = app.state.store.read_progress("alice").await.unwrap().memory["q1"].clone();
    assert!(m2.interval() > m1.interval());
    assert_eq!(m2.consecutive_correct, 2);

    // incorrect later: back to baseline, ease drops by the decrement
    let t2 = t1 + Duration::days(30);
    let reply = presentation(orch.handle_answer("alice", "B", t2).await.unwrap());
    let feedback = reply.feedback.unwrap();
    assert!(!feedback.correct);
    assert_eq!(feedback.correct_answers, vec!["Right".to_string()]);
    assert_eq!(feedback.explanation, "Explanation 1");

    let m3 = app.state.store.read_progress("alice").await.unwrap().memory["q1"].clone();
    assert_eq!(m3.interval().num_seconds(), DAY);
    assert_eq!(m3.consecutive_correct, 0);
    assert!((m3.ease_factor - (m2.ease_factor - 0.2)).abs() < 1e-9);
}

#[tokio::test]
async fn test_donation_reminder_every_hundred_answers() {
    let app = create_test_app(5);
    let orch = &app.state.orchestrator;
    orch.handle_start("bob", None, t0()).await.unwrap();

    for n in 1..=101u64 {
        let now = t0() + Duration::seconds(n as i64);
        let reply = presentation(orch.handle_answer("bob", "A", now).await.unwrap());
        assert_eq!(
            reply.donation_reminder,
            n == 100,
            "answer {} reminder flag",
            n
        );
    }

    app.state.store.flush_now().await.unwrap();
    let progress = app.state.store.read_progress("bob").await.unwrap();
    assert_eq!(progress.total_answered, 101);
    assert_eq!(app.backend.attempts_for("bob").len(), 101);
}

#[tokio::test]
async fn test_resend_returns_same_question_without_state_change() {
    let app = create_test_app(3);
    let orch = &app.state.orchestrator;

    let shown = presentation(orch.handle_start("carol", None, t0()).await.unwrap());
    let before = app.state.store.read_progress("carol").await.unwrap();

    for i in 1..=2 {
        let again = presentation(
            orch.handle_resend("carol", t0() + Duration::seconds(i))
                .await
                .unwrap(),
        );
        assert_eq!(again.question.id, shown.question.id);
        assert!(again.feedback.is_none());
    }

    let after = app.state.store.read_progress("carol").await.unwrap();
    assert_eq!(after, before);
    app.state.store.flush_now().await.unwrap();
    assert!(app.backend.attempts_for("carol").is_empty());
}

#[tokio::test]
async fn test_resend_without_question_is_notice() {
    let app = create_test_app(1);
    let reply = app
        .state
        .orchestrator
        .handle_resend("nobody", t0())
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Notice(Notice::NoActiveQuestion)));
}

#[tokio::test]
async fn test_skip_is_neutral() {
    let app = create_test_app(2);
    let orch = &app.state.orchestrator;
    orch.handle_start("dave", None, t0()).await.unwrap();

    let next = presentation(orch.handle_answer("dave", "skip", t0()).await.unwrap());
    assert_eq!(next.question.id, "q2");
    assert!(next.feedback.is_none());

    let progress = app.state.store.read_progress("dave").await.unwrap();
    assert_eq!(progress.total_answered, 0);
    let skipped = &progress.memory["q1"];
    assert_eq!(skipped.total_attempts, 0);
    assert_eq!(skipped.consecutive_correct, 0);
    assert_eq!(skipped.ease_factor, 2.5);
    assert_eq!(skipped.interval().num_seconds(), DAY);

    app.state.store.flush_now().await.unwrap();
    assert!(app.backend.attempts_for("dave").is_empty());
}

#[tokio::test]
async fn test_rate_limited_request_mutates_nothing() {
    let mut config = test_config();
    config.rate_limit.requests_per_minute = 1;
    config.rate_limit.burst_capacity = 1;
    let app = create_test_app_with(config, sample_drafts(2));
    let orch = &app.state.orchestrator;

    orch.handle_start("erin", None, t0()).await.unwrap();
    let before = app.state.store.read_progress("erin").await.unwrap();

    let denied = orch.handle_answer("erin", "A", t0()).await;
    match denied {
        Err(QuizError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 60),
        other => panic!("expected rate limit, got {:?}", other.map(|_| ())),
    }
    assert_eq!(app.state.store.read_progress("erin").await.unwrap(), before);

    let response = orch
        .dispatch(InteractionRequest {
            user_id: "erin".into(),
            kind: InteractionKind::Answer,
            text: Some("A".into()),
            language: None,
            timestamp: Some(t0()),
        })
        .await;
    assert_eq!(response.outcome, Outcome::RateLimited);
    assert!(matches!(
        response.reply,
        Reply::Notice(Notice::SlowDown { .. })
    ));

    // a minute later the bucket has a token again
    assert_ok!(
        orch.handle_answer("erin", "A", t0() + Duration::seconds(60))
            .await
    );
}

#[tokio::test]
async fn test_invalid_answer_keeps_question_current() {
    let app = create_test_app(2);
    let orch = &app.state.orchestrator;
    let shown = presentation(orch.handle_start("fay", None, t0()).await.unwrap());

    let response = orch
        .dispatch(InteractionRequest {
            user_id: "fay".into(),
            kind: InteractionKind::Answer,
            text: Some("123".into()),
            language: None,
            timestamp: Some(t0()),
        })
        .await;
    assert_eq!(response.outcome, Outcome::Success);
    assert!(matches!(
        response.reply,
        Reply::Notice(Notice::InvalidAnswer { .. })
    ));

    let progress = app.state.store.read_progress("fay").await.unwrap();
    assert_eq!(progress.current_question.as_deref(), Some(shown.question.id.as_str()));
    assert_eq!(progress.total_answered, 0);
}

#[tokio::test]
async fn test_answer_without_question_starts_session() {
    let app = create_test_app(2);
    let reply = presentation(
        app.state
            .orchestrator
            .handle_answer("gus", "A", t0())
            .await
            .unwrap(),
    );
    assert_eq!(reply.question.id, "q1");
    assert!(reply.feedback.is_none());
    app.state.store.flush_now().await.unwrap();
    assert!(app.backend.attempts_for("gus").is_empty());
}

#[tokio::test]
async fn test_stats_count_pending_and_flushed_attempts() {
    let app = create_test_app(3);
    let orch = &app.state.orchestrator;
    orch.handle_start("hal", None, t0()).await.unwrap();
    orch.handle_answer("hal", "A", t0()).await.unwrap();
    orch.handle_answer("hal", "A", t0()).await.unwrap();

    let pending = orch.handle_stats("hal", t0()).await.unwrap();
    assert_eq!(pending.total_attempts, 2);

    app.state.store.flush_now().await.unwrap();
    orch.handle_answer("hal", "C", t0()).await.unwrap();

    let stats = orch.handle_stats("hal", t0()).await.unwrap();
    assert_eq!(stats.total_attempts, 3);
    assert_eq!(stats.correct_answers, 2);
    assert!((stats.accuracy_percentage - 200.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_language_switch_uses_new_pool() {
    let mut drafts = sample_drafts(2);
    drafts.push(quizbot_api::models::QuestionDraft {
        id: "D1".into(),
        language: quizbot_api::models::Language::Deutsch,
        prompt: "Was bedeutet ein rotes Licht?".into(),
        options: vec!["Halten".into(), "Fahren".into()],
        correct_answers: vec!["Halten".into()],
        ..Default::default()
    });
    let app = create_test_app_with(test_config(), drafts);
    let orch = &app.state.orchestrator;

    let english = presentation(orch.handle_start("ida", None, t0()).await.unwrap());
    assert_eq!(english.question.id, "q1");

    let response = orch
        .dispatch(InteractionRequest {
            user_id: "ida".into(),
            kind: InteractionKind::Language,
            text: Some("2".into()),
            language: None,
            timestamp: Some(t0()),
        })
        .await;
    let german = presentation(response.reply);
    assert_eq!(german.question.id, "d1");

    let stats = orch.handle_stats("ida", t0()).await.unwrap();
    assert_eq!(stats.language, quizbot_api::models::Language::Deutsch);
}

#[tokio::test]
async fn test_start_twice_represents_current_question() {
    let app = create_test_app(3);
    let orch = &app.state.orchestrator;
    let first = presentation(orch.handle_start("jon", None, t0()).await.unwrap());
    let revision = app.state.store.read_progress("jon").await.unwrap().revision;

    let again = presentation(
        orch.handle_start("jon", None, t0() + Duration::seconds(5))
            .await
            .unwrap(),
    );
    assert_eq!(again.question.id, first.question.id);
    assert_eq!(
        app.state.store.read_progress("jon").await.unwrap().revision,
        revision
    );
}

#[tokio::test]
async fn test_retired_current_question_is_cleared() {
    let app = create_test_app(2);
    let orch = &app.state.orchestrator;

    // progress points at a question the catalog no longer has
    let mut stale = UserProgress::new("kim", t0());
    stale.present(Some("retired-7".to_string()), t0());
    stale.touch(t0());
    app.state.store.enqueue_write(stale, None).unwrap();

    let resend = orch
        .dispatch(InteractionRequest {
            user_id: "kim".into(),
            kind: InteractionKind::Resend,
            text: None,
            language: None,
            timestamp: Some(t0()),
        })
        .await;
    assert_eq!(resend.outcome, Outcome::Success);
    assert!(matches!(
        resend.reply,
        Reply::Notice(Notice::NoActiveQuestion)
    ));

    let answer = orch
        .dispatch(InteractionRequest {
            user_id: "kim".into(),
            kind: InteractionKind::Answer,
            text: Some("A".into()),
            language: None,
            timestamp: Some(t0() + Duration::seconds(1)),
        })
        .await;
    assert_eq!(answer.outcome, Outcome::Success);
    let fresh = presentation(answer.reply);
    assert_eq!(fresh.question.id, "q1");
    assert!(fresh.feedback.is_none());

    app.state.store.flush_now().await.unwrap();
    let persisted = common::backend_progress(&app, "kim").await;
    assert_eq!(persisted.current_question.as_deref(), Some("q1"));
    assert_eq!(persisted.total_answered, 0);
    assert!(app.backend.attempts_for("kim").is_empty());
}
