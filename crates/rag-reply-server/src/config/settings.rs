use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub rag: RagConfig,
    pub conversation: ConversationConfig,
    pub i18n: I18nConfig,
    pub logging: LoggingConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_max_size: 10,
            pool_timeout_seconds: 5,
            run_migrations: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    Memory,
    Disabled,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Empty url disables the redis backend even when selected.
    pub redis_url: String,
    pub key_prefix: String,
    pub ttl_config_secs: u64,
    pub ttl_knowledge_secs: u64,
    pub op_timeout_ms: u64,
    pub scan_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            redis_url: String::new(),
            key_prefix: "lumi".to_string(),
            ttl_config_secs: 300,
            ttl_knowledge_secs: 120,
            op_timeout_ms: 500,
            scan_count: 100,
        }
    }
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub dimension: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-ada-002".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            dimension: 1536,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4.1-nano".to_string(),
            timeout_seconds: 30,
            max_tokens: 400,
            temperature: 0.2,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 3_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub context_token_budget: usize,
    pub max_chunk_tokens: usize,
    pub prompt_token_ceiling: usize,
    pub history_window: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_threshold: 0.0,
            context_token_budget: 1_200,
            max_chunk_tokens: 400,
            prompt_token_ceiling: 3_000,
            history_window: 6,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    pub session_timeout_secs: i64,
    /// Trigger word -> language code of the reply it starts.
    pub trigger_words: BTreeMap<String, String>,
    pub lock_prune_interval_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        let trigger_words = [
            ("vacation", "en"),
            ("vacances", "fr"),
            ("vacaciones", "es"),
            ("vacanza", "it"),
            ("urlaub", "de"),
            ("каникулы", "ru"),
            ("отпуск", "ru"),
            ("ferias", "pt"),
            ("férias", "pt"),
        ]
        .into_iter()
        .map(|(word, lang)| (word.to_string(), lang.to_string()))
        .collect();

        Self {
            session_timeout_secs: 300,
            trigger_words,
            lock_prune_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct I18nConfig {
    pub default_language: String,
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,rag_reply_server=debug".to_string(),
            format: "json".to_string(),
            directory: "logs".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct JobsConfig {
    /// Zero disables the periodic embedding backfill.
    pub backfill_interval_secs: u64,
    /// Entries embedded per run.
    pub backfill_batch_size: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            backfill_interval_secs: 600,
            backfill_batch_size: 200,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        if settings.database.url.is_empty() {
            anyhow::bail!("database.url is required (APP__DATABASE__URL)");
        }
        Ok(settings)
    }
}
