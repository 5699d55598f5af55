use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::durable_store::{ProgressBackend, WriteBatch};
use crate::config::DatabaseConfig;
use crate::error::QuizResult;
use crate::models::{AttemptRecord, AttemptStats, Language, QuestionMemory, UserProgress};

const PROGRESS_COLLECTION: &str = "user_progress";
const ATTEMPTS_COLLECTION: &str = "attempt_records";

/// MongoDB document for "user_progress". Question identifiers may contain
/// dots, so memory is stored as an array rather than a keyed sub-document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressDocument {
    #[serde(rename = "_id")]
    user_id: String,
    #[serde(default)]
    memory: Vec<MemoryEntry>,
    #[serde(rename = "currentQuestion", default)]
    current_question: Option<String>,
    #[serde(rename = "presentedAt", default, with = "bson_datetime_as_chrono_option")]
    presented_at: Option<DateTime<Utc>>,
    #[serde(rename = "totalAnswered")]
    total_answered: i64,
    language: Language,
    #[serde(rename = "lastAttemptAt", default, with = "bson_datetime_as_chrono_option")]
    last_attempt_at: Option<DateTime<Utc>>,
    revision: i64,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoryEntry {
    #[serde(rename = "questionId")]
    question_id: String,
    #[serde(rename = "lastSeen", with = "bson_datetime_as_chrono")]
    last_seen: DateTime<Utc>,
    #[serde(rename = "nextDue", with = "bson_datetime_as_chrono")]
    next_due: DateTime<Utc>,
    #[serde(rename = "consecutiveCorrect")]
    consecutive_correct: i64,
    #[serde(rename = "totalAttempts")]
    total_attempts: i64,
    #[serde(rename = "easeFactor")]
    ease_factor: f64,
}

/// MongoDB document for "attempt_records".
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttemptDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "questionId")]
    question_id: String,
    language: Language,
    #[serde(with = "bson_datetime_as_chrono")]
    timestamp: DateTime<Utc>,
    answer: Vec<i64>,
    correct: bool,
    #[serde(rename = "timeTakenSecs", default)]
    time_taken_secs: Option<i64>,
}

impl From<&UserProgress> for ProgressDocument {
    fn from(p: &UserProgress) -> Self {
        let mut memory: Vec<MemoryEntry> = p
            .memory
            .iter()
            .map(|(id, m)| MemoryEntry {
                question_id: id.clone(),
                last_seen: m.last_seen,
                next_due: m.next_due,
                consecutive_correct: m.consecutive_correct as i64,
                total_attempts: m.total_attempts as i64,
                ease_factor: m.ease_factor,
            })
            .collect();
        memory.sort_by(|a, b| a.question_id.cmp(&b.question_id));

        Self {
            user_id: p.user_id.clone(),
            memory,
            current_question: p.current_question.clone(),
            presented_at: p.presented_at,
            total_answered: p.total_answered as i64,
            language: p.language,
            last_attempt_at: p.last_attempt_at,
            revision: p.revision as i64,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

impl From<ProgressDocument> for UserProgress {
    fn from(d: ProgressDocument) -> Self {
        let memory: HashMap<String, QuestionMemory> = d
            .memory
            .into_iter()
            .map(|e| {
                (
                    e.question_id,
                    QuestionMemory {
                        last_seen: e.last_seen,
                        next_due: e.next_due,
                        consecutive_correct: e.consecutive_correct.max(0) as u32,
                        total_attempts: e.total_attempts.max(0) as u32,
                        ease_factor: e.ease_factor,
                    },
                )
            })
            .collect();

        Self {
            user_id: d.user_id,
            memory,
            current_question: d.current_question,
            presented_at: d.presented_at,
            total_answered: d.total_answered.max(0) as u64,
            language: d.language,
            last_attempt_at: d.last_attempt_at,
            revision: d.revision.max(0) as u64,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

impl From<&AttemptRecord> for AttemptDocument {
    fn from(a: &AttemptRecord) -> Self {
        Self {
            id: a.id.clone(),
            user_id: a.user_id.clone(),
            question_id: a.question_id.clone(),
            language: a.language,
            timestamp: a.timestamp,
            answer: a.answer.iter().map(|&i| i as i64).collect(),
            correct: a.correct,
            time_taken_secs: a.time_taken_secs,
        }
    }
}

/// Production backend. Each batch commits inside one multi-document
/// transaction, which requires the server to run as a replica set.
pub struct MongoBackend {
    client: Client,
    db: Database,
    progress: Collection<ProgressDocument>,
    attempts: Collection<AttemptDocument>,
}

impl MongoBackend {
    pub async fn connect(config: &DatabaseConfig, pool_size: usize) -> QuizResult<Self> {
        let mut options = ClientOptions::parse(&config.mongo_uri).await?;
        options.max_pool_size = Some(pool_size as u32);
        options.app_name = Some("quizbot-api".to_string());

        let client = Client::with_options(options)?;
        let db = client.database(&config.mongo_database);
        let backend = Self {
            progress: db.collection(PROGRESS_COLLECTION),
            attempts: db.collection(ATTEMPTS_COLLECTION),
            client,
            db,
        };

        backend.ping().await?;
        backend.ensure_indexes().await?;
        tracing::info!(
            "MongoDB connected: database={}, pool size={}",
            config.mongo_database,
            pool_size
        );
        Ok(backend)
    }

    async fn ensure_indexes(&self) -> QuizResult<()> {
        self.attempts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "userId": 1, "timestamp": 1 })
                    .build(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressBackend for MongoBackend {
    async fn load_progress(&self, user_id: &str) -> QuizResult<Option<UserProgress>> {
        let document = self.progress.find_one(doc! { "_id": user_id }).await?;
        Ok(document.map(UserProgress::from))
    }

    async fn commit_batch(&self, batch: &WriteBatch) -> QuizResult<()> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        let result: QuizResult<()> = async {
            for progress in &batch.progress {
                let document = ProgressDocument::from(progress);
                self.progress
                    .replace_one(doc! { "_id": &document.user_id }, &document)
                    .upsert(true)
                    .session(&mut session)
                    .await?;
            }

            // upsert by id: replaying a batch must not duplicate attempts
            for attempt in &batch.attempts {
                let document = AttemptDocument::from(attempt);
                self.attempts
                    .replace_one(doc! { "_id": &document.id }, &document)
                    .upsert(true)
                    .session(&mut session)
                    .await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                session.commit_transaction().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::warn!("Failed to abort transaction: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    async fn attempt_stats(&self, user_id: &str) -> QuizResult<AttemptStats> {
        let pipeline = vec![
            doc! { "$match": { "userId": user_id } },
            doc! { "$group": {
                "_id": mongodb::bson::Bson::Null,
                "total": { "$sum": 1 },
                "correct": { "$sum": { "$cond": ["$correct", 1, 0] } },
            } },
        ];

        let mut cursor = self.attempts.aggregate(pipeline).await?;
        let mut stats = AttemptStats::default();
        if let Some(doc) = cursor.try_next().await? {
            stats.total_attempts = count_field(&doc, "total");
            stats.correct_answers = count_field(&doc, "correct");
        }
        Ok(stats)
    }

    async fn ping(&self) -> QuizResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}

/// `$sum` yields an int32 or int64 depending on magnitude.
fn count_field(doc: &Document, key: &str) -> u64 {
    doc.get_i64(key)
        .or_else(|_| doc.get_i32(key).map(i64::from))
        .map_or(0, |v| v.max(0) as u64)
}

// Serde converters for chrono::DateTime <-> mongodb::bson::DateTime
mod bson_datetime_as_chrono {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        bson::DateTime::from_millis(date.timestamp_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bson_dt = bson::DateTime::deserialize(deserializer)?;
        DateTime::from_timestamp_millis(bson_dt.timestamp_millis())
            .ok_or_else(|| D::Error::custom("timestamp out of range"))
    }
}

mod bson_datetime_as_chrono_option {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => serializer.serialize_some(&bson::DateTime::from_millis(d.timestamp_millis())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        opt.map(|dt| {
            DateTime::from_timestamp_millis(dt.timestamp_millis())
                .ok_or_else(|| D::Error::custom("timestamp out of range"))
        })
        .transpose()
    }
}
