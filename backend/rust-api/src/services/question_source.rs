use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use super::catalog::{Catalog, RejectedRecord};
use crate::models::{Language, QuestionDraft};

pub const ENGLISH_FILE: &str = "driving_theory_questions.json";
pub const DEUTSCH_FILE: &str = "driving_theory_questions_de.json";

#[derive(Debug, Default, Deserialize)]
struct RawOption {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCorrectAnswer {
    Text(String),
    Option(RawOption),
}

/// One question as written by the scraper.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default)]
    question_id: Option<String>,
    #[serde(default)]
    question_number: Option<String>,
    #[serde(default)]
    question_text: String,
    #[serde(default)]
    options: Vec<RawOption>,
    #[serde(default)]
    correct_answers: Vec<RawOption>,
    #[serde(default)]
    correct_answer: Option<RawCorrectAnswer>,
    #[serde(default)]
    local_image_paths: Vec<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    theme_name: Option<String>,
    #[serde(default)]
    chapter_name: Option<String>,
    #[serde(default)]
    points: Option<Value>,
}

impl RawQuestion {
    fn into_draft(self, language: Language) -> QuestionDraft {
        let options = self
            .options
            .into_iter()
            .filter_map(|o| o.text)
            .filter(|t| !t.trim().is_empty())
            .collect();

        let mut correct_answers: Vec<String> = self
            .correct_answers
            .into_iter()
            .filter_map(|o| o.text)
            .collect();
        if correct_answers.is_empty() {
            match self.correct_answer {
                Some(RawCorrectAnswer::Text(text)) => correct_answers.push(text),
                Some(RawCorrectAnswer::Option(RawOption { text: Some(text) })) => {
                    correct_answers.push(text)
                }
                _ => {}
            }
        }

        let points = self.points.and_then(|p| match p {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        QuestionDraft {
            id: self
                .question_id
                .or(self.question_number)
                .unwrap_or_default(),
            language,
            prompt: self.question_text,
            options,
            correct_answers,
            explanation: self.comment.or(self.explanation).unwrap_or_default(),
            image: self.local_image_paths.into_iter().next(),
            theme: self.theme_name.filter(|s| !s.is_empty()),
            chapter: self.chapter_name.filter(|s| !s.is_empty()),
            points,
        }
    }
}

fn record_label(value: &Value, index: usize) -> String {
    value
        .get("question_id")
        .or_else(|| value.get("question_number"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", index))
}

/// Parses one question file. A record that does not match the expected
/// shape is rejected on its own; the rest of the file still loads.
pub fn parse_questions(
    json: &str,
    language: Language,
) -> Result<(Vec<QuestionDraft>, Vec<RejectedRecord>)> {
    let root: Value = serde_json::from_str(json).context("Question file is not valid JSON")?;
    let items = match root {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("questions") {
            Some(Value::Array(items)) => items,
            _ => anyhow::bail!("Expected an array of questions or a \"questions\" array"),
        },
        _ => anyhow::bail!("Expected an array of questions or a \"questions\" array"),
    };

    let mut drafts = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let label = record_label(&item, index);
        match serde_json::from_value::<RawQuestion>(item) {
            Ok(raw) => drafts.push(raw.into_draft(language)),
            Err(e) => {
                tracing::warn!("Skipping malformed question {}: {}", label, e);
                rejected.push(RejectedRecord {
                    record_id: label,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok((drafts, rejected))
}

/// Reads both language files from `dir` and builds the catalog.
/// A missing file contributes no questions.
pub fn load_catalog(dir: &Path) -> Result<(Catalog, Vec<RejectedRecord>)> {
    let mut drafts = Vec::new();
    let mut rejected = Vec::new();

    for (file, language) in [
        (ENGLISH_FILE, Language::English),
        (DEUTSCH_FILE, Language::Deutsch),
    ] {
        let path = dir.join(file);
        if !path.exists() {
            tracing::warn!("Question file {} not found, skipping", path.display());
            continue;
        }
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let (mut file_drafts, mut file_rejected) = parse_questions(&json, language)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::info!(
            "Read {} {} questions from {}",
            file_drafts.len(),
            language,
            path.display()
        );
        drafts.append(&mut file_drafts);
        rejected.append(&mut file_rejected);
    }

    let (catalog, mut invalid) = Catalog::load_partial(drafts);
    rejected.append(&mut invalid);
    if !rejected.is_empty() {
        tracing::warn!("{} question records rejected", rejected.len());
    }
    Ok((catalog, rejected))
}
