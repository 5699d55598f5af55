use thiserror::Error;

use crate::models::interaction::Outcome;

#[derive(Debug, Clone, Error)]
pub enum QuizError {
    #[error("Invalid question record {record_id}: {reason}")]
    Validation { record_id: String, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("State invariant violated: {0}")]
    StateInvariantViolation(String),

    #[error("Invalid answer: {0}")]
    InvalidAnswer(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type QuizResult<T> = Result<T, QuizError>;

impl QuizError {
    pub fn validation(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        QuizError::Validation {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        QuizError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuizError::StoreUnavailable(_) | QuizError::Backend(_))
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            QuizError::RateLimited { .. } => Outcome::RateLimited,
            QuizError::InvalidAnswer(_) => Outcome::Success,
            _ => Outcome::TransientFailure,
        }
    }
}

impl From<mongodb::error::Error> for QuizError {
    fn from(err: mongodb::error::Error) -> Self {
        QuizError::Backend(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for QuizError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        QuizError::Backend(format!("BSON serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(QuizError::StoreUnavailable("pool exhausted".into()).is_transient());
        assert!(QuizError::Backend("socket closed".into()).is_transient());
        assert!(!QuizError::RateLimited {
            retry_after_secs: 3
        }
        .is_transient());
        assert!(!QuizError::not_found("question", "q1").is_transient());
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(
            QuizError::RateLimited {
                retry_after_secs: 1
            }
            .outcome(),
            Outcome::RateLimited
        );
        assert_eq!(
            QuizError::StoreUnavailable("x".into()).outcome(),
            Outcome::TransientFailure
        );
        assert_eq!(
            QuizError::StateInvariantViolation("x".into()).outcome(),
            Outcome::TransientFailure
        );
    }
}
