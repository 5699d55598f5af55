use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::progress::Language;
use super::question::QuestionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Start,
    Answer,
    Stats,
    Resend,
    Skip,
    Language,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Start => "start",
            InteractionKind::Answer => "answer",
            InteractionKind::Stats => "stats",
            InteractionKind::Resend => "resend",
            InteractionKind::Skip => "skip",
            InteractionKind::Language => "language",
        }
    }
}

/// One inbound chat interaction, as delivered by the transport.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InteractionRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    pub kind: InteractionKind,
    #[validate(length(max = 256))]
    pub text: Option<String>,
    pub language: Option<Language>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Bounded vocabulary returned to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    RateLimited,
    TransientFailure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::RateLimited => "rate_limited",
            Outcome::TransientFailure => "transient_failure",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerFeedback {
    pub correct: bool,
    pub correct_answers: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Presentation {
    pub question: Arc<QuestionRecord>,
    pub is_review: bool,
    pub donation_reminder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AnswerFeedback>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total_attempts: u64,
    pub correct_answers: u64,
    pub accuracy_percentage: f64,
    pub current_question: Option<String>,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    SlowDown { retry_after_secs: u64 },
    TryAgainLater,
    InvalidAnswer { message: String },
    NoActiveQuestion,
    NoQuestionsAvailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Question(Presentation),
    Stats(StatsSummary),
    Notice(Notice),
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionResponse {
    pub outcome: Outcome,
    pub reply: Reply,
}
