//! Persisted record types for the knowledge memory
//!
//! Every entity is an explicit typed struct; merge/dedup invariants are
//! enforced at the write boundary in the store, not by convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported answer languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Es,
    Fang,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Es => "es",
            Language::Fang => "fang",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Es
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resolution tier produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Emergency,
    LocalKb,
    Memory,
    Pattern,
    Llm,
    Fallback,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerSource::Emergency => "emergency",
            AnswerSource::LocalKb => "local_kb",
            AnswerSource::Memory => "memory",
            AnswerSource::Pattern => "pattern",
            AnswerSource::Llm => "llm",
            AnswerSource::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for AnswerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deduplicated learned Q&A pair.
///
/// At most one entry represents a given meaning per language, enforced by
/// similarity-based merge at save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedEntry {
    pub id: u64,
    /// Representative question text
    pub question: String,
    pub answer: String,
    pub language: Language,
    pub category: String,
    /// Incremented only on successful retrieval, never on write
    pub consult_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// A statistically reinforced question shape.
///
/// Inert until `frequency` reaches the confirmation threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: u64,
    /// Normalized keyword set, serialized as sorted space-joined tokens
    pub token_set: String,
    pub category: String,
    pub suggested_answer: String,
    pub frequency: u64,
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable per-user aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub preferred_language: Language,
    pub total_messages: u64,
    /// category -> count
    pub topic_frequency: HashMap<String, u64>,
    pub first_interaction_at: DateTime<Utc>,
    pub last_interaction_at: DateTime<Utc>,
}

impl UserProfile {
    /// Top categories by count, most frequent first.
    pub fn top_topics(&self, limit: usize) -> Vec<(String, u64)> {
        let mut topics: Vec<(String, u64)> = self
            .topic_frequency
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        topics.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        topics.truncate(limit);
        topics
    }
}

/// One resolved message, appended to the audit log. Never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: u64,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub source: AnswerSource,
    pub language: Language,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Trimmed view of an interaction for prompt building.
#[derive(Debug, Clone)]
pub struct InteractionSummary {
    pub question: String,
    /// Truncated for prompt economy
    pub answer: String,
    pub source: AnswerSource,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate statistics snapshot for operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub learned_entries: u64,
    pub total_interactions: u64,
    pub interactions_by_source: HashMap<String, u64>,
    pub interactions_by_category: HashMap<String, u64>,
    pub registered_users: u64,
    pub patterns_total: u64,
    pub patterns_confirmed: u64,
    pub top_patterns: Vec<PatternSummary>,
    pub interactions_24h: u64,
    pub popular_categories_7d: Vec<(String, u64)>,
}

/// Pattern line item inside [`MemoryStats`].
#[derive(Debug, Clone, Serialize)]
pub struct PatternSummary {
    pub token_set: String,
    pub category: String,
    pub frequency: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_serializes_snake_case() {
        let json = serde_json::to_string(&AnswerSource::LocalKb).unwrap();
        assert_eq!(json, "\"local_kb\"");
        assert_eq!(AnswerSource::LocalKb.to_string(), "local_kb");
    }

    #[test]
    fn test_top_topics_ordering() {
        let mut profile = UserProfile {
            user_id: "u1".to_string(),
            preferred_language: Language::Es,
            total_messages: 0,
            topic_frequency: HashMap::new(),
            first_interaction_at: Utc::now(),
            last_interaction_at: Utc::now(),
        };
        profile.topic_frequency.insert("malaria".to_string(), 5);
        profile.topic_frequency.insert("general".to_string(), 2);
        profile.topic_frequency.insert("legal".to_string(), 9);

        let top = profile.top_topics(2);
        assert_eq!(top[0].0, "legal");
        assert_eq!(top[1].0, "malaria");
    }
}
