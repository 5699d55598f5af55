use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{QuizError, QuizResult};
use crate::models::question::{content_hash, normalize_id, normalize_text};
use crate::models::{Language, QuestionDraft, QuestionRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub record_id: String,
    pub reason: String,
}

/// Immutable, process-wide question index.
///
/// Read-only after construction, so shared as `Arc<Catalog>` without locking.
#[derive(Debug, Default)]
pub struct Catalog {
    by_id: HashMap<String, Arc<QuestionRecord>>,
    by_hash: HashMap<String, String>,
    english: Vec<String>,
    deutsch: Vec<String>,
}

impl Catalog {
    /// Strict load: the first invalid record or duplicate identifier fails
    /// the whole catalog.
    pub fn load(drafts: Vec<QuestionDraft>) -> QuizResult<Self> {
        let mut catalog = Catalog::default();
        for draft in drafts {
            catalog.insert(draft)?;
        }
        catalog.log_summary();
        Ok(catalog)
    }

    /// Lenient load: malformed records are rejected one by one and reported.
    pub fn load_partial(drafts: Vec<QuestionDraft>) -> (Self, Vec<RejectedRecord>) {
        let mut catalog = Catalog::default();
        let mut rejected = Vec::new();

        for draft in drafts {
            if let Err(QuizError::Validation { record_id, reason }) = catalog.insert(draft) {
                tracing::warn!("Rejected question {}: {}", record_id, reason);
                rejected.push(RejectedRecord { record_id, reason });
            }
        }

        catalog.log_summary();
        (catalog, rejected)
    }

    pub fn lookup(&self, id: &str) -> QuizResult<Arc<QuestionRecord>> {
        self.by_id
            .get(&normalize_id(id))
            .cloned()
            .ok_or_else(|| QuizError::not_found("question", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(&normalize_id(id))
    }

    /// Identifier of the record already holding this content hash.
    pub fn by_content_hash(&self, hash: &str) -> Option<&str> {
        self.by_hash.get(hash).map(String::as_str)
    }

    /// Question identifiers available for `language`, in load order.
    pub fn pool(&self, language: Language) -> Vec<&str> {
        let ids: Box<dyn Iterator<Item = &String>> = match language {
            Language::English => Box::new(self.english.iter()),
            Language::Deutsch => Box::new(self.deutsch.iter()),
            Language::Mixed => Box::new(self.english.iter().chain(self.deutsch.iter())),
        };
        ids.map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn insert(&mut self, draft: QuestionDraft) -> QuizResult<()> {
        let record = validate(draft)?;

        if self.by_id.contains_key(&record.id) {
            return Err(QuizError::validation(
                record.id,
                "duplicate identifier after normalization",
            ));
        }

        if let Some(existing) = self.by_hash.get(&record.content_hash) {
            tracing::warn!(
                "Dropping question {}: same content as {}",
                record.id,
                existing
            );
            return Ok(());
        }

        self.by_hash
            .insert(record.content_hash.clone(), record.id.clone());
        match record.language {
            Language::Deutsch => self.deutsch.push(record.id.clone()),
            _ => self.english.push(record.id.clone()),
        }
        self.by_id.insert(record.id.clone(), Arc::new(record));
        Ok(())
    }

    fn log_summary(&self) {
        tracing::info!(
            "Catalog loaded: {} questions ({} english, {} deutsch)",
            self.by_id.len(),
            self.english.len(),
            self.deutsch.len()
        );
    }
}

fn validate(draft: QuestionDraft) -> QuizResult<QuestionRecord> {
    let id = normalize_id(&draft.id);
    if id.is_empty() {
        return Err(QuizError::validation(&draft.id, "empty identifier"));
    }
    if draft.prompt.trim().is_empty() {
        return Err(QuizError::validation(id, "empty prompt"));
    }
    if draft.options.is_empty() {
        return Err(QuizError::validation(id, "empty option list"));
    }
    if draft.correct_answers.is_empty() {
        return Err(QuizError::validation(id, "no correct answer"));
    }
    if draft.language == Language::Mixed {
        return Err(QuizError::validation(id, "record language must be concrete"));
    }

    let options: Vec<String> = draft.options.iter().map(|o| normalize_text(o)).collect();
    let mut correct_indices = Vec::with_capacity(draft.correct_answers.len());
    let mut seen = HashSet::new();
    for answer in &draft.correct_answers {
        let wanted = normalize_text(answer);
        match options.iter().position(|o| *o == wanted) {
            Some(index) if seen.insert(index) => correct_indices.push(index),
            Some(_) => {}
            None => {
                return Err(QuizError::validation(
                    id,
                    format!("correct answer {:?} is not one of the options", answer),
                ));
            }
        }
    }
    correct_indices.sort_unstable();

    let content_hash = content_hash(&draft.prompt, &draft.options, &draft.correct_answers);

    Ok(QuestionRecord {
        id,
        language: draft.language,
        prompt: draft.prompt,
        options: draft.options,
        correct_indices,
        explanation: draft.explanation,
        image: draft.image,
        theme: draft.theme,
        chapter: draft.chapter,
        points: draft.points,
        content_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(id: &str, prompt: &str, options: &[&str], correct: &[&str]) -> QuestionDraft {
        QuestionDraft {
            id: id.to_string(),
            prompt: prompt.to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
            correct_answers: correct.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_and_lookup() {
        let catalog = Catalog::load(vec![
            draft("Q1", "Red light?", &["Stop", "Go"], &["Stop"]),
            draft("Q2", "Pick two", &["A", "B", "C"], &["A", "C"]),
        ])
        .unwrap();

        assert_eq!(catalog.len(), 2);
        let q2 = catalog.lookup("q2").unwrap();
        assert_eq!(q2.correct_indices, vec![0, 2]);
        assert!(q2.is_multi_answer());
        assert!(matches!(
            catalog.lookup("missing"),
            Err(QuizError::NotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_identifier_after_normalization_fails() {
        let result = Catalog::load(vec![
            draft("Q1", "First", &["A"], &["A"]),
            draft(" q1 ", "Second", &["B"], &["B"]),
        ]);
        assert!(matches!(result, Err(QuizError::Validation { .. })));
    }

    #[test]
    fn test_empty_options_fails() {
        let result = Catalog::load(vec![draft("Q1", "Blank?", &[], &["x"])]);
        match result {
            Err(QuizError::Validation { record_id, reason }) => {
                assert_eq!(record_id, "q1");
                assert!(reason.contains("option"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_correct_answers_must_be_subset_of_options() {
        let result = Catalog::load(vec![draft("Q1", "Pick", &["A", "B"], &["A", "Z"])]);
        assert!(matches!(result, Err(QuizError::Validation { .. })));
    }

    #[test]
    fn test_content_duplicates_keep_first_seen() {
        let catalog = Catalog::load(vec![
            draft("Q1", "Same question", &["A", "B"], &["A"]),
            draft("Q9", "same  question", &["a", "b"], &["a"]),
        ])
        .unwrap();

        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains("Q1"));
        assert!(!catalog.contains("Q9"));
        let hash = catalog.lookup("Q1").unwrap().content_hash.clone();
        assert_eq!(catalog.by_content_hash(&hash), Some("q1"));
    }

    #[test]
    fn test_partial_load_rejects_individually() {
        let (catalog, rejected) = Catalog::load_partial(vec![
            draft("Q1", "Good", &["A"], &["A"]),
            draft("Q2", "No options", &[], &["A"]),
            draft("Q3", "Also good", &["B", "C"], &["C"]),
            draft("Q1", "Dup id", &["D"], &["D"]),
        ]);

        assert_eq!(catalog.len(), 2);
        let ids: Vec<_> = rejected.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["q2", "q1"]);
    }

    #[test]
    fn test_pools_follow_load_order() {
        let mut de = draft("D1", "Rotes Licht?", &["Halt"], &["Halt"]);
        de.language = Language::Deutsch;
        let catalog = Catalog::load(vec![
            draft("E2", "Second", &["A"], &["A"]),
            de,
            draft("E1", "First", &["B"], &["B"]),
        ])
        .unwrap();

        assert_eq!(catalog.pool(Language::English), vec!["e2", "e1"]);
        assert_eq!(catalog.pool(Language::Deutsch), vec!["d1"]);
        assert_eq!(catalog.pool(Language::Mixed), vec!["e2", "e1", "d1"]);
    }
}
