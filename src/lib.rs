//! Salubot - response-resolution engine for a bilingual health assistant
//!
//! Turns one inbound message into one outbound answer through a strict,
//! auditable tier order (emergency check, static knowledge, learned cache,
//! learned patterns, external model, deterministic fallback), while
//! maintaining per-user sessions with idle timeouts and continuously
//! promoting successful answers into a fuzzily-matched learned cache.

pub mod knowledge;
pub mod memory;
pub mod phrases;
pub mod pipeline;
pub mod session;
pub mod text;

pub use knowledge::KnowledgeSource;
pub use memory::{
    AnswerSource, InteractionRecord, InteractionSummary, KnowledgeMemory, Language, LearnedEntry,
    LearnedPattern, MemoryStats, UserProfile,
};
pub use pipeline::{ModelClient, ModelConfig, Orchestrator};
pub use session::{Session, SessionManager};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default session idle timeout in minutes.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u64 = 30;

/// Default bound on the local resolution tiers per message.
pub const DEFAULT_MESSAGE_DEADLINE: Duration = Duration::from_secs(5);

/// Configuration for the Salubot engine
#[derive(Debug, Clone)]
pub struct SalubotConfig {
    /// Directory holding the persisted memory files
    pub data_dir: PathBuf,

    /// Session idle timeout `T`; sessions idle beyond `2T` are evicted
    pub session_timeout: Duration,

    /// Deadline for one message through the local resolution tiers
    pub message_deadline: Duration,

    /// External model configuration; `None` disables tier 6 permanently
    pub model: Option<ModelConfig>,
}

impl SalubotConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_MINUTES * 60),
            message_deadline: DEFAULT_MESSAGE_DEADLINE,
            model: None,
        }
    }

    /// Default data dir: `~/.salubot`, or `SALUBOT_HOME` if set.
    pub fn default_data_dir() -> PathBuf {
        if let Ok(home) = std::env::var("SALUBOT_HOME") {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".salubot")
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_message_deadline(mut self, deadline: Duration) -> Self {
        self.message_deadline = deadline;
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = Some(model);
        self
    }

    /// Load overrides from a `config.toml` in the data dir, if present.
    ///
    /// Model access is enabled when an API key is available, either from
    /// the file or from `OPENAI_API_KEY`. A missing or unparsable file
    /// leaves the defaults untouched.
    pub async fn load(data_dir: &Path) -> Self {
        let mut config = Self::new(data_dir.to_path_buf());
        let config_file = data_dir.join("config.toml");

        let file: ConfigToml = match tokio::fs::read_to_string(&config_file).await {
            Ok(content) => match toml::from_str(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!("Ignoring unparsable {}: {}", config_file.display(), e);
                    ConfigToml::default()
                }
            },
            Err(_) => ConfigToml::default(),
        };

        if let Some(minutes) = file.session_timeout_minutes {
            config.session_timeout = Duration::from_secs(minutes * 60);
        }
        if let Some(secs) = file.message_deadline_secs {
            config.message_deadline = Duration::from_secs(secs);
        }

        let api_key = file
            .api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty());
        if let Some(api_key) = api_key {
            let mut model = ModelConfig::new(api_key);
            if let Some(name) = file.model {
                model.model = name;
            }
            if let Some(base_url) = file.model_base_url {
                model.base_url = base_url;
            }
            config.model = Some(model);
        }

        config
    }
}

/// On-disk `config.toml` shape. All fields optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    session_timeout_minutes: Option<u64>,
    message_deadline_secs: Option<u64>,
    model: Option<String>,
    model_base_url: Option<String>,
    api_key: Option<String>,
}

/// Result type for Salubot operations
pub type Result<T> = std::result::Result<T, SalubotError>;

/// Errors that can occur in Salubot
#[derive(Debug, thiserror::Error)]
pub enum SalubotError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Model call error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
