use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::progress::Language;

/// Question as supplied by the question source, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub id: String,
    pub language: Language,
    pub prompt: String,
    pub options: Vec<String>,
    /// Option texts that make up the correct answer.
    pub correct_answers: Vec<String>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<String>,
}

/// Validated, immutable question owned by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionRecord {
    pub id: String,
    pub language: Language,
    pub prompt: String,
    pub options: Vec<String>,
    /// Indices into `options`, sorted ascending.
    pub correct_indices: Vec<usize>,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<String>,
    pub content_hash: String,
}

impl QuestionRecord {
    pub fn is_multi_answer(&self) -> bool {
        self.correct_indices.len() > 1
    }

    pub fn correct_answers(&self) -> Vec<&str> {
        self.correct_indices
            .iter()
            .filter_map(|&i| self.options.get(i).map(String::as_str))
            .collect()
    }

    /// Exact set equality between the selection and the correct options.
    pub fn is_correct_selection(&self, selected: &[usize]) -> bool {
        let mut selected = selected.to_vec();
        selected.sort_unstable();
        selected.dedup();
        selected == self.correct_indices
    }
}

/// Hash over the normalized prompt, options and correct answers.
///
/// Whitespace runs collapse and case folds, so re-exported files with cosmetic
/// differences still collide.
pub fn content_hash(prompt: &str, options: &[String], correct: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(prompt).as_bytes());
    for option in options {
        hasher.update([0x1f]);
        hasher.update(normalize_text(option).as_bytes());
    }
    hasher.update([0x1e]);
    let mut correct: Vec<String> = correct.iter().map(|c| normalize_text(c)).collect();
    correct.sort();
    for answer in correct {
        hasher.update([0x1f]);
        hasher.update(answer.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Identifier normalization used for uniqueness and lookups.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}
