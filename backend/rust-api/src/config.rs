use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::QuizError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Mongo,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Mongo => "mongo",
            BackendKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: BackendKind,
    pub mongo_uri: String,
    pub mongo_database: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mongo,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "quizbot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Concurrent backend handles.
    pub pool_size: usize,
    pub acquire_timeout_ms: u64,
    /// Pending writes that trigger an early flush.
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// Hard cap on queued writes; beyond it enqueue fails as unavailable.
    pub max_pending: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            acquire_timeout_ms: 2000,
            batch_size: 100,
            flush_interval_ms: 2000,
            max_pending: 10_000,
        }
    }
}

impl StoreConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
    /// Buckets idle for longer than this are swept.
    pub bucket_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            burst_capacity: 15,
            bucket_ttl_secs: 120,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub question_capacity: usize,
    pub user_capacity: usize,
    pub user_shards: usize,
    pub session_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            question_capacity: 128,
            user_capacity: 10_000,
            user_shards: 16,
            session_timeout_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub baseline_interval_secs: i64,
    pub max_interval_secs: i64,
    pub default_ease: f64,
    pub min_ease: f64,
    pub max_ease: f64,
    pub ease_increment: f64,
    pub ease_decrement: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            baseline_interval_secs: 86_400,
            max_interval_secs: 365 * 86_400,
            default_ease: 2.5,
            min_ease: 1.3,
            max_ease: 3.0,
            ease_increment: 0.1,
            ease_decrement: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuizConfig {
    pub questions_dir: PathBuf,
    pub reminder_every: u64,
    pub metrics_auth: String,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            questions_dir: PathBuf::from("questions"),
            reminder_every: 100,
            metrics_auth: "admin:changeme".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub quiz: QuizConfig,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml first, APP__SECTION__KEY overrides on top
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mut database = settings
            .get::<DatabaseConfig>("database")
            .unwrap_or_default();
        if settings.get_string("database.mongo_uri").is_err() {
            if let Ok(uri) = env::var("MONGO_URI") {
                database.mongo_uri = uri;
            }
        }
        if settings.get_string("database.mongo_database").is_err() {
            if let Ok(name) = env::var("MONGO_DATABASE") {
                database.mongo_database = name;
            }
        }

        let mut quiz = settings.get::<QuizConfig>("quiz").unwrap_or_default();
        if settings.get_string("quiz.metrics_auth").is_err() {
            match env::var("METRICS_AUTH") {
                Ok(auth) => quiz.metrics_auth = auth,
                Err(_) if env == "prod" => {
                    return Err(config::ConfigError::Message(
                        "METRICS_AUTH must be set in production".to_string(),
                    ));
                }
                Err(_) => {
                    eprintln!("WARNING: Using default METRICS_AUTH (dev mode only!)");
                }
            }
        }

        let config = Config {
            server: settings.get("server").unwrap_or_default(),
            database,
            store: settings.get("store").unwrap_or_default(),
            rate_limit: settings.get("rate_limit").unwrap_or_default(),
            cache: settings.get("cache").unwrap_or_default(),
            scheduler: settings.get("scheduler").unwrap_or_default(),
            quiz,
        };

        config
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        Ok(config)
    }

    /// Structural checks the components rely on.
    pub fn validate(&self) -> Result<(), QuizError> {
        let rl = &self.rate_limit;
        if rl.requests_per_minute == 0 {
            return Err(QuizError::Config(
                "rate_limit.requests_per_minute must be positive".into(),
            ));
        }
        if rl.burst_capacity < rl.requests_per_minute {
            return Err(QuizError::Config(
                "rate_limit.burst_capacity must be >= requests_per_minute".into(),
            ));
        }

        let refill_secs = (rl.burst_capacity as u64 * 60).div_ceil(rl.requests_per_minute as u64);
        if rl.bucket_ttl_secs < refill_secs {
            return Err(QuizError::Config(format!(
                "rate_limit.bucket_ttl_secs must cover a full refill ({}s)",
                refill_secs
            )));
        }

        let s = &self.scheduler;
        if !(1.0 <= s.min_ease && s.min_ease <= s.default_ease && s.default_ease <= s.max_ease) {
            return Err(QuizError::Config(
                "scheduler ease factors must satisfy 1.0 <= min <= default <= max".into(),
            ));
        }
        if s.ease_increment <= 0.0 || s.ease_decrement <= 0.0 {
            return Err(QuizError::Config(
                "scheduler ease increment and decrement must be positive".into(),
            ));
        }
        if s.baseline_interval_secs <= 0 || s.max_interval_secs < s.baseline_interval_secs {
            return Err(QuizError::Config(
                "scheduler intervals must satisfy 0 < baseline <= max".into(),
            ));
        }

        if self.store.pool_size == 0 || self.store.batch_size == 0 {
            return Err(QuizError::Config(
                "store.pool_size and store.batch_size must be positive".into(),
            ));
        }
        if self.store.max_pending < self.store.batch_size {
            return Err(QuizError::Config(
                "store.max_pending must be >= store.batch_size".into(),
            ));
        }
        if self.cache.question_capacity == 0
            || self.cache.user_capacity == 0
            || self.cache.user_shards == 0
        {
            return Err(QuizError::Config("cache capacities must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_burst_below_rate_rejected() {
        let mut config = Config::default();
        config.rate_limit.burst_capacity = 5;
        config.rate_limit.requests_per_minute = 10;
        assert!(matches!(config.validate(), Err(QuizError::Config(_))));
    }

    #[test]
    fn test_bucket_ttl_shorter_than_refill_rejected() {
        let mut config = Config::default();
        config.rate_limit.requests_per_minute = 10;
        config.rate_limit.burst_capacity = 15;
        config.rate_limit.bucket_ttl_secs = 10;
        assert!(matches!(config.validate(), Err(QuizError::Config(_))));

        config.rate_limit.bucket_ttl_secs = 90;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ease_floor_below_one_rejected() {
        let mut config = Config::default();
        config.scheduler.min_ease = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_env_overrides_nested_values() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("APP__RATE_LIMIT__BURST_CAPACITY", "20");
        std::env::set_var("APP__STORE__POOL_SIZE", "4");
        std::env::set_var("APP__DATABASE__BACKEND", "memory");

        let config = Config::load().expect("config should load");
        assert_eq!(config.rate_limit.burst_capacity, 20);
        assert_eq!(config.rate_limit.requests_per_minute, 10);
        assert_eq!(config.store.pool_size, 4);
        assert_eq!(config.database.backend, BackendKind::Memory);

        std::env::remove_var("APP__RATE_LIMIT__BURST_CAPACITY");
        std::env::remove_var("APP__STORE__POOL_SIZE");
        std::env::remove_var("APP__DATABASE__BACKEND");
        std::env::remove_var("SKIP_ROOT_ENV");
    }
}
