use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    English,
    Deutsch,
    Mixed,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Deutsch => "deutsch",
            Language::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "english" | "e" | "en" => Ok(Language::English),
            "2" | "deutsch" | "german" | "d" | "de" => Ok(Language::Deutsch),
            "3" | "mixed" | "m" => Ok(Language::Mixed),
            other => Err(format!("Unknown language: {}", other)),
        }
    }
}

/// Per-question review state of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMemory {
    pub last_seen: DateTime<Utc>,
    pub next_due: DateTime<Utc>,
    pub consecutive_correct: u32,
    pub total_attempts: u32,
    pub ease_factor: f64,
}

impl QuestionMemory {
    /// Current review interval. Never negative: `next_due >= last_seen`.
    pub fn interval(&self) -> Duration {
        self.next_due - self.last_seen
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due <= now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: String,
    pub memory: HashMap<String, QuestionMemory>,
    pub current_question: Option<String>,
    pub presented_at: Option<DateTime<Utc>>,
    pub total_answered: u64,
    pub language: Language,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Bumped on every mutation; the store tracks the highest flushed value.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            memory: HashMap::new(),
            current_question: None,
            presented_at: None,
            total_answered: 0,
            language: Language::default(),
            last_attempt_at: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.revision += 1;
        self.updated_at = now;
    }

    /// Timestamp for the next attempt, strictly after the previous one.
    pub fn next_attempt_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_attempt_at {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        }
    }

    pub fn present(&mut self, question_id: Option<String>, now: DateTime<Utc>) {
        self.presented_at = question_id.as_ref().map(|_| now);
        self.current_question = question_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!("1".parse::<Language>().unwrap(), Language::English);
        assert_eq!("German".parse::<Language>().unwrap(), Language::Deutsch);
        assert_eq!(" m ".parse::<Language>().unwrap(), Language::Mixed);
        assert!("klingon".parse::<Language>().is_err());
    }

    #[test]
    fn test_attempt_timestamps_strictly_increase() {
        let now = Utc::now();
        let mut progress = UserProgress::new("u1", now);
        assert_eq!(progress.next_attempt_timestamp(now), now);

        progress.last_attempt_at = Some(now);
        let next = progress.next_attempt_timestamp(now);
        assert!(next > now);

        let earlier = now - Duration::seconds(5);
        assert!(progress.next_attempt_timestamp(earlier) > now);
    }
}
