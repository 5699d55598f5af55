use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::Language;

/// Append-only record of one answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: String,
    pub user_id: String,
    pub question_id: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    /// Selected option indices, 0-based.
    pub answer: Vec<usize>,
    pub correct: bool,
    pub time_taken_secs: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptStats {
    pub total_attempts: u64,
    pub correct_answers: u64,
}

impl AttemptStats {
    pub fn accuracy_percentage(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.correct_answers as f64 / self.total_attempts as f64 * 100.0
        }
    }

    pub fn record(&mut self, correct: bool) {
        self.total_attempts += 1;
        if correct {
            self.correct_answers += 1;
        }
    }

    pub fn merge(self, other: AttemptStats) -> AttemptStats {
        AttemptStats {
            total_attempts: self.total_attempts + other.total_attempts,
            correct_answers: self.correct_answers + other.correct_answers,
        }
    }
}
