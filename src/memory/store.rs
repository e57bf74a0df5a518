//! Durable learned-knowledge store
//!
//! Four collections back the learning loop: learned Q&A entries, reinforced
//! patterns, user profiles and the append-only interaction log. Entries,
//! patterns and profiles are held in memory and snapshot to JSON files
//! (written via temp file + rename); interactions append to a JSONL file
//! and are line-scanned for history and trend queries.
//!
//! Every public operation is best-effort from the caller's perspective:
//! a storage failure is logged and surfaces as "not found"/empty so the
//! resolution pipeline can always fall through to its next tier.

use crate::text::{similarity, tokenize};
use crate::Result;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::records::{
    AnswerSource, InteractionRecord, InteractionSummary, Language, LearnedEntry, LearnedPattern,
    MemoryStats, PatternSummary, UserProfile,
};

/// Similarity at or above which a new question merges into an existing entry.
pub const MERGE_THRESHOLD: f64 = 0.7;
/// Similarity at or above which a lookup accepts its best match.
pub const ACCEPT_THRESHOLD: f64 = 0.6;
/// Looser recall threshold for model-prompt context blocks.
pub const CONTEXT_THRESHOLD: f64 = 0.4;
/// Reinforcement count at which a pattern becomes retrievable.
pub const PATTERN_CONFIRM_THRESHOLD: u64 = 3;
/// Max learned-context blocks injected into a model prompt.
const MAX_CONTEXT_BLOCKS: usize = 3;
/// Answer truncation for context blocks.
const CONTEXT_ANSWER_CHARS: usize = 300;
/// Answer truncation for history summaries.
const HISTORY_ANSWER_CHARS: usize = 200;

#[derive(Debug, Default)]
struct MemoryState {
    learned: Vec<LearnedEntry>,
    patterns: Vec<LearnedPattern>,
    profiles: HashMap<String, UserProfile>,
    next_learned_id: u64,
    next_pattern_id: u64,
    next_interaction_id: u64,
}

/// Persistent learned-answer cache, interaction log, profiles and patterns.
pub struct KnowledgeMemory {
    learned_path: PathBuf,
    patterns_path: PathBuf,
    profiles_path: PathBuf,
    interactions_path: PathBuf,
    state: Mutex<MemoryState>,
}

impl KnowledgeMemory {
    /// Open (or initialize) the store under `data_dir`.
    ///
    /// Unparsable snapshot files are logged and treated as empty rather
    /// than refusing to start.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).await?;

        let learned_path = data_dir.join("learned.json");
        let patterns_path = data_dir.join("patterns.json");
        let profiles_path = data_dir.join("profiles.json");
        let interactions_path = data_dir.join("interactions.jsonl");

        let learned: Vec<LearnedEntry> = Self::load_snapshot(&learned_path).await;
        let patterns: Vec<LearnedPattern> = Self::load_snapshot(&patterns_path).await;
        let profiles_vec: Vec<UserProfile> = Self::load_snapshot(&profiles_path).await;

        let next_learned_id = learned.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let next_pattern_id = patterns.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let next_interaction_id = Self::count_log_lines(&interactions_path).await + 1;

        let profiles = profiles_vec
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();

        info!(
            "Knowledge memory opened: {} learned, {} patterns",
            learned.len(),
            patterns.len()
        );

        Ok(Self {
            learned_path,
            patterns_path,
            profiles_path,
            interactions_path,
            state: Mutex::new(MemoryState {
                learned,
                patterns,
                profiles,
                next_learned_id,
                next_pattern_id,
                next_interaction_id,
            }),
        })
    }

    async fn load_snapshot<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
        if !path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(items) => items,
                Err(e) => {
                    warn!("Failed to parse {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    async fn count_log_lines(path: &Path) -> u64 {
        if !path.exists() {
            return 0;
        }
        match fs::read_to_string(path).await {
            Ok(content) => content.lines().filter(|l| !l.trim().is_empty()).count() as u64,
            Err(_) => 0,
        }
    }

    /// Write a JSON snapshot atomically (temp file + rename).
    async fn write_snapshot<T: serde::Serialize>(path: &Path, items: &[T]) -> Result<()> {
        let content = serde_json::to_string_pretty(items)?;
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn persist_learned(&self, state: &MemoryState) -> Result<()> {
        Self::write_snapshot(&self.learned_path, &state.learned).await
    }

    async fn persist_patterns(&self, state: &MemoryState) -> Result<()> {
        Self::write_snapshot(&self.patterns_path, &state.patterns).await
    }

    async fn persist_profiles(&self, state: &MemoryState) -> Result<()> {
        let profiles: Vec<&UserProfile> = state.profiles.values().collect();
        Self::write_snapshot(&self.profiles_path, &profiles).await
    }

    // ==================== Learned knowledge ====================

    /// Save a successful Q&A pair, merging into the most similar existing
    /// entry of the same language when similarity reaches the merge
    /// threshold. Never duplicates semantic content.
    pub async fn save_learned(
        &self,
        question: &str,
        answer: &str,
        language: Language,
        category: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let new_tokens = tokenize(question);

        let mut best: Option<(usize, f64)> = None;
        for (idx, entry) in state.learned.iter().enumerate() {
            if entry.language != language {
                continue;
            }
            let score = similarity(&new_tokens, &tokenize(&entry.question));
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((idx, score));
            }
        }

        if let Some((idx, score)) = best {
            if score >= MERGE_THRESHOLD {
                let entry = &mut state.learned[idx];
                entry.answer = answer.to_string();
                entry.category = category.to_string();
                entry.last_used_at = now;
                debug!(
                    "Learned entry merged (similarity {:.2}): {}",
                    score,
                    truncate_chars(question, 50)
                );
                return self.persist_learned(&state).await;
            }
        }

        let id = state.next_learned_id;
        state.next_learned_id += 1;
        state.learned.push(LearnedEntry {
            id,
            question: question.to_string(),
            answer: answer.to_string(),
            language,
            category: category.to_string(),
            consult_count: 0,
            created_at: now,
            last_used_at: now,
        });
        debug!("New learned entry: {}", truncate_chars(question, 50));
        self.persist_learned(&state).await
    }

    /// Best-match lookup in the learned cache.
    ///
    /// Returns `(answer, confidence)` when the best match of the language
    /// reaches the acceptance threshold; the hit's consult count and
    /// last-used timestamp are refreshed. Tie-break is first-encountered-
    /// highest-score over stable insertion order.
    pub async fn lookup_learned(&self, question: &str, language: Language) -> Option<(String, f64)> {
        let mut state = self.state.lock().await;
        let new_tokens = tokenize(question);

        let mut best: Option<(usize, f64)> = None;
        for (idx, entry) in state.learned.iter().enumerate() {
            if entry.language != language {
                continue;
            }
            let score = similarity(&new_tokens, &tokenize(&entry.question));
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((idx, score));
            }
        }

        let (idx, score) = best?;
        if score < ACCEPT_THRESHOLD {
            return None;
        }

        let entry = &mut state.learned[idx];
        entry.consult_count += 1;
        entry.last_used_at = Utc::now();
        let answer = entry.answer.clone();
        info!(
            "Learned cache hit (similarity {:.2}): {}",
            score,
            truncate_chars(question, 50)
        );

        // Count refresh is best-effort; the answer stands regardless.
        if let Err(e) = self.persist_learned(&state).await {
            warn!("Failed to persist consult count: {}", e);
        }
        Some((answer, score))
    }

    /// Broader recall for model prompts: up to 3 best matches at the looser
    /// context threshold, formatted as question + truncated answer blocks.
    /// Informs the model, never answers directly.
    pub async fn context_for_model(&self, question: &str) -> String {
        let state = self.state.lock().await;
        let new_tokens = tokenize(question);

        let mut scored: Vec<(f64, &LearnedEntry)> = state
            .learned
            .iter()
            .filter_map(|entry| {
                let score = similarity(&new_tokens, &tokenize(&entry.question));
                (score >= CONTEXT_THRESHOLD).then_some((score, entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let blocks: Vec<String> = scored
            .iter()
            .take(MAX_CONTEXT_BLOCKS)
            .map(|(_, entry)| {
                format!(
                    "Pregunta anterior: {}\nRespuesta: {}",
                    entry.question,
                    truncate_chars(&entry.answer, CONTEXT_ANSWER_CHARS)
                )
            })
            .collect();

        blocks.join("\n\n")
    }

    // ==================== Interaction log ====================

    /// Append one resolved interaction to the audit log.
    pub async fn log_interaction(
        &self,
        user_id: &str,
        question: &str,
        answer: &str,
        source: AnswerSource,
        language: Language,
        category: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = InteractionRecord {
            id: state.next_interaction_id,
            user_id: user_id.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            source,
            language,
            category: category.to_string(),
            created_at: Utc::now(),
        };
        state.next_interaction_id += 1;

        let line = serde_json::to_string(&record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.interactions_path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        debug!(
            "Interaction logged [{}]: {}",
            source,
            truncate_chars(question, 50)
        );
        Ok(())
    }

    async fn read_interactions(&self) -> Vec<InteractionRecord> {
        if !self.interactions_path.exists() {
            return Vec::new();
        }
        let content = match fs::read_to_string(&self.interactions_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read interaction log: {}", e);
                return Vec::new();
            }
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Most recent interactions for a user, newest first, answers truncated.
    pub async fn recent_history(&self, user_id: &str, limit: usize) -> Vec<InteractionSummary> {
        let mut records: Vec<InteractionRecord> = self
            .read_interactions()
            .await
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
            .into_iter()
            .map(|r| InteractionSummary {
                question: r.question,
                answer: truncate_chars(&r.answer, HISTORY_ANSWER_CHARS),
                source: r.source,
                category: r.category,
                created_at: r.created_at,
            })
            .collect()
    }

    /// Most consulted categories within the trailing window, descending.
    pub async fn popular_categories(&self, limit: usize, window_days: i64) -> Vec<(String, u64)> {
        let cutoff = Utc::now() - Duration::days(window_days);
        let mut counts: HashMap<String, u64> = HashMap::new();
        for record in self.read_interactions().await {
            if record.created_at >= cutoff {
                *counts.entry(record.category).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    // ==================== User profiles ====================

    /// Read-or-create a user profile. A fresh profile has zero counters
    /// and both timestamps set to now.
    pub async fn get_profile(&self, user_id: &str) -> Result<UserProfile> {
        let mut state = self.state.lock().await;
        if let Some(profile) = state.profiles.get(user_id) {
            return Ok(profile.clone());
        }

        let now = Utc::now();
        let profile = UserProfile {
            user_id: user_id.to_string(),
            preferred_language: Language::Es,
            total_messages: 0,
            topic_frequency: HashMap::new(),
            first_interaction_at: now,
            last_interaction_at: now,
        };
        state.profiles.insert(user_id.to_string(), profile.clone());
        self.persist_profiles(&state).await?;
        Ok(profile)
    }

    /// Record one interaction against the profile: bump the message total,
    /// merge the category into topic frequencies, optionally set the
    /// preferred language, refresh the last-interaction timestamp.
    pub async fn update_profile(
        &self,
        user_id: &str,
        language: Option<Language>,
        category: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let profile = state
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile {
                user_id: user_id.to_string(),
                preferred_language: Language::Es,
                total_messages: 0,
                topic_frequency: HashMap::new(),
                first_interaction_at: now,
                last_interaction_at: now,
            });

        profile.total_messages += 1;
        if let Some(language) = language {
            profile.preferred_language = language;
        }
        if let Some(category) = category {
            *profile
                .topic_frequency
                .entry(category.to_string())
                .or_insert(0) += 1;
        }
        profile.last_interaction_at = now;
        debug!("Profile updated for {}", user_id);
        self.persist_profiles(&state).await
    }

    // ==================== Learned patterns ====================

    /// Create or reinforce a pattern keyed on the question's sorted token
    /// set. A merge bumps the frequency and adopts the newest answer; a
    /// miss inserts at frequency 1 (inert until confirmed).
    pub async fn reinforce_pattern(
        &self,
        question: &str,
        answer: &str,
        language: Language,
        category: &str,
    ) -> Result<()> {
        let tokens = tokenize(question);
        if tokens.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut best: Option<(usize, f64)> = None;
        for (idx, pattern) in state.patterns.iter().enumerate() {
            if pattern.language != language {
                continue;
            }
            let stored: HashSet<String> =
                pattern.token_set.split_whitespace().map(String::from).collect();
            let score = similarity(&tokens, &stored);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((idx, score));
            }
        }

        if let Some((idx, score)) = best {
            if score >= MERGE_THRESHOLD {
                let pattern = &mut state.patterns[idx];
                pattern.frequency += 1;
                pattern.suggested_answer = answer.to_string();
                pattern.updated_at = now;
                debug!(
                    "Pattern reinforced (freq={}): {}",
                    pattern.frequency,
                    truncate_chars(&pattern.token_set, 50)
                );
                return self.persist_patterns(&state).await;
            }
        }

        let mut sorted: Vec<String> = tokens.into_iter().collect();
        sorted.sort();
        let token_set = sorted.join(" ");

        let id = state.next_pattern_id;
        state.next_pattern_id += 1;
        state.patterns.push(LearnedPattern {
            id,
            token_set: token_set.clone(),
            category: category.to_string(),
            suggested_answer: answer.to_string(),
            frequency: 1,
            language,
            created_at: now,
            updated_at: now,
        });
        debug!("New pattern: {}", truncate_chars(&token_set, 50));
        self.persist_patterns(&state).await
    }

    /// Best-match lookup over confirmed patterns only (frequency at or
    /// above the confirmation threshold). Acceptance reinforces further.
    /// Returns `(answer, frequency, confidence)`.
    pub async fn lookup_pattern(
        &self,
        question: &str,
        language: Language,
    ) -> Option<(String, u64, f64)> {
        let mut state = self.state.lock().await;
        let tokens = tokenize(question);

        let mut best: Option<(usize, f64)> = None;
        for (idx, pattern) in state.patterns.iter().enumerate() {
            if pattern.language != language || pattern.frequency < PATTERN_CONFIRM_THRESHOLD {
                continue;
            }
            let stored: HashSet<String> =
                pattern.token_set.split_whitespace().map(String::from).collect();
            let score = similarity(&tokens, &stored);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((idx, score));
            }
        }

        let (idx, score) = best?;
        if score < ACCEPT_THRESHOLD {
            return None;
        }

        let pattern = &mut state.patterns[idx];
        let frequency = pattern.frequency;
        pattern.frequency += 1;
        pattern.updated_at = Utc::now();
        let answer = pattern.suggested_answer.clone();
        info!(
            "Pattern hit (freq={}, similarity {:.2}): {}",
            frequency,
            score,
            truncate_chars(question, 50)
        );

        if let Err(e) = self.persist_patterns(&state).await {
            warn!("Failed to persist pattern reinforcement: {}", e);
        }
        Some((answer, frequency, score))
    }

    // ==================== Enriched context ====================

    /// Combine learned context, the user's recent history, weekly trends
    /// and the user's top interests into one prompt-ready context string.
    pub async fn enriched_context(&self, question: &str, user_id: &str) -> String {
        let mut parts = Vec::new();

        let learned = self.context_for_model(question).await;
        if !learned.is_empty() {
            parts.push(format!("[Conocimiento aprendido]\n{}", learned));
        }

        let history = self.recent_history(user_id, 5).await;
        if !history.is_empty() {
            let lines: Vec<String> = history
                .iter()
                .map(|h| {
                    format!(
                        "- Preguntó: {} → Tema: {}",
                        truncate_chars(&h.question, 80),
                        h.category
                    )
                })
                .collect();
            parts.push(format!(
                "[Historial reciente del usuario]\n{}",
                lines.join("\n")
            ));
        }

        let trends = self.popular_categories(5, 7).await;
        if !trends.is_empty() {
            let line: Vec<String> = trends
                .iter()
                .map(|(category, total)| format!("{}({})", category, total))
                .collect();
            parts.push(format!("[Temas populares esta semana]\n{}", line.join(", ")));
        }

        if let Ok(profile) = self.get_profile(user_id).await {
            if profile.total_messages > 0 {
                let top: Vec<String> = profile
                    .top_topics(3)
                    .into_iter()
                    .map(|(topic, _)| topic)
                    .collect();
                if !top.is_empty() {
                    parts.push(format!(
                        "[Intereses del usuario]\nTemas frecuentes: {}",
                        top.join(", ")
                    ));
                }
            }
        }

        parts.join("\n\n")
    }

    // ==================== Statistics ====================

    /// Full statistics snapshot for the monitoring surface.
    pub async fn stats(&self) -> MemoryStats {
        let interactions = self.read_interactions().await;
        let state = self.state.lock().await;

        let mut by_source: HashMap<String, u64> = HashMap::new();
        let mut by_category: HashMap<String, u64> = HashMap::new();
        let cutoff_24h = Utc::now() - Duration::hours(24);
        let mut interactions_24h = 0u64;
        for record in &interactions {
            *by_source.entry(record.source.to_string()).or_insert(0) += 1;
            *by_category.entry(record.category.clone()).or_insert(0) += 1;
            if record.created_at >= cutoff_24h {
                interactions_24h += 1;
            }
        }

        let mut top_patterns: Vec<&LearnedPattern> = state.patterns.iter().collect();
        top_patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        let top_patterns: Vec<PatternSummary> = top_patterns
            .into_iter()
            .take(5)
            .map(|p| PatternSummary {
                token_set: p.token_set.clone(),
                category: p.category.clone(),
                frequency: p.frequency,
            })
            .collect();

        let cutoff_7d = Utc::now() - Duration::days(7);
        let mut weekly: HashMap<String, u64> = HashMap::new();
        for record in &interactions {
            if record.created_at >= cutoff_7d {
                *weekly.entry(record.category.clone()).or_insert(0) += 1;
            }
        }
        let mut popular_categories_7d: Vec<(String, u64)> = weekly.into_iter().collect();
        popular_categories_7d.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        popular_categories_7d.truncate(10);

        MemoryStats {
            learned_entries: state.learned.len() as u64,
            total_interactions: interactions.len() as u64,
            interactions_by_source: by_source,
            interactions_by_category: by_category,
            registered_users: state.profiles.len() as u64,
            patterns_total: state.patterns.len() as u64,
            patterns_confirmed: state
                .patterns
                .iter()
                .filter(|p| p.frequency >= PATTERN_CONFIRM_THRESHOLD)
                .count() as u64,
            top_patterns,
            interactions_24h,
            popular_categories_7d,
        }
    }

    /// All learned entries of a language (test/diagnostic aid).
    pub async fn learned_entries(&self, language: Language) -> Vec<LearnedEntry> {
        let state = self.state.lock().await;
        state
            .learned
            .iter()
            .filter(|e| e.language == language)
            .cloned()
            .collect()
    }
}

/// Char-safe prefix truncation.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

impl std::fmt::Debug for KnowledgeMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeMemory")
            .field("learned_path", &self.learned_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, KnowledgeMemory) {
        let dir = TempDir::new().unwrap();
        let store = KnowledgeMemory::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_and_lookup_learned() {
        let (_dir, store) = open_store().await;
        store
            .save_learned("síntomas de malaria", "Fiebre y escalofríos.", Language::Es, "enfermedad")
            .await
            .unwrap();

        let (answer, confidence) = store
            .lookup_learned("síntomas malaria", Language::Es)
            .await
            .unwrap();
        assert_eq!(answer, "Fiebre y escalofríos.");
        assert!(confidence >= ACCEPT_THRESHOLD);
    }

    #[tokio::test]
    async fn test_lookup_respects_language() {
        let (_dir, store) = open_store().await;
        store
            .save_learned("síntomas de malaria", "Fiebre.", Language::Es, "enfermedad")
            .await
            .unwrap();
        assert!(store
            .lookup_learned("síntomas malaria", Language::Fang)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_save_learned_is_idempotent() {
        let (_dir, store) = open_store().await;
        for _ in 0..2 {
            store
                .save_learned("qué es la malaria", "Una enfermedad.", Language::Es, "enfermedad")
                .await
                .unwrap();
        }
        assert_eq!(store.learned_entries(Language::Es).await.len(), 1);
        let entry = &store.learned_entries(Language::Es).await[0];
        assert_eq!(entry.answer, "Una enfermedad.");
        assert_eq!(entry.consult_count, 0);
    }

    #[tokio::test]
    async fn test_merge_invariant_holds() {
        let (_dir, store) = open_store().await;
        let questions = [
            "síntomas de la malaria",
            "malaria síntomas",
            "qué es el dengue",
            "prevención del cólera en casa",
        ];
        for q in questions {
            store
                .save_learned(q, "respuesta", Language::Es, "enfermedad")
                .await
                .unwrap();
        }

        let entries = store.learned_entries(Language::Es).await;
        for (i, a) in entries.iter().enumerate() {
            for b in entries.iter().skip(i + 1) {
                let score = crate::text::text_similarity(&a.question, &b.question);
                assert!(
                    score < MERGE_THRESHOLD,
                    "entries '{}' and '{}' too similar ({:.2})",
                    a.question,
                    b.question,
                    score
                );
            }
        }
    }

    #[tokio::test]
    async fn test_pattern_confirmation_threshold() {
        let (_dir, store) = open_store().await;
        // Lexically different phrasings sharing the {fiebre, alta} token set
        // ("tengo", "hay", "mi" are stopwords).
        let phrases = ["tengo fiebre alta", "hay fiebre alta"];
        for q in phrases {
            store
                .reinforce_pattern(q, "Tome paracetamol y acuda al centro.", Language::Es, "sintomas")
                .await
                .unwrap();
        }
        // Two reinforcements: still inert.
        assert!(store
            .lookup_pattern("fiebre alta", Language::Es)
            .await
            .is_none());

        store
            .reinforce_pattern(
                "mi fiebre alta",
                "Tome paracetamol y acuda al centro.",
                Language::Es,
                "sintomas",
            )
            .await
            .unwrap();

        let (answer, frequency, confidence) = store
            .lookup_pattern("fiebre alta", Language::Es)
            .await
            .unwrap();
        assert_eq!(answer, "Tome paracetamol y acuda al centro.");
        assert!(frequency >= PATTERN_CONFIRM_THRESHOLD);
        assert!(confidence >= ACCEPT_THRESHOLD);
    }

    #[tokio::test]
    async fn test_context_for_model_caps_blocks() {
        let (_dir, store) = open_store().await;
        // Distinct two-token questions: pairwise similarity 0.5, below the
        // merge threshold, but all at 0.5 for the single-token query.
        for topic in ["prevención", "tratamiento", "causas", "contagio", "vacuna"] {
            store
                .save_learned(
                    &format!("malaria {}", topic),
                    "respuesta larga",
                    Language::Es,
                    "enfermedad",
                )
                .await
                .unwrap();
        }
        assert_eq!(store.learned_entries(Language::Es).await.len(), 5);

        let context = store.context_for_model("malaria").await;
        assert!(!context.is_empty());
        assert_eq!(context.matches("Pregunta anterior:").count(), 3);
    }

    #[tokio::test]
    async fn test_profile_read_or_create_and_update() {
        let (_dir, store) = open_store().await;
        let profile = store.get_profile("240555000001").await.unwrap();
        assert_eq!(profile.total_messages, 0);

        store
            .update_profile("240555000001", Some(Language::Fang), Some("enfermedad"))
            .await
            .unwrap();
        let profile = store.get_profile("240555000001").await.unwrap();
        assert_eq!(profile.total_messages, 1);
        assert_eq!(profile.preferred_language, Language::Fang);
        assert_eq!(profile.topic_frequency.get("enfermedad"), Some(&1));
    }

    #[tokio::test]
    async fn test_interaction_log_and_history() {
        let (_dir, store) = open_store().await;
        for i in 0..3 {
            store
                .log_interaction(
                    "u1",
                    &format!("pregunta {}", i),
                    "respuesta",
                    AnswerSource::LocalKb,
                    Language::Es,
                    "general",
                )
                .await
                .unwrap();
        }
        store
            .log_interaction("u2", "otra", "respuesta", AnswerSource::Fallback, Language::Es, "general")
            .await
            .unwrap();

        let history = store.recent_history("u1", 2).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].question, "pregunta 2");
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let (_dir, store) = open_store().await;
        store
            .log_interaction("u1", "q", "a", AnswerSource::LocalKb, Language::Es, "enfermedad")
            .await
            .unwrap();
        store
            .save_learned("qué es la malaria", "a", Language::Es, "enfermedad")
            .await
            .unwrap();
        store.get_profile("u1").await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.total_interactions, 1);
        assert_eq!(stats.learned_entries, 1);
        assert_eq!(stats.registered_users, 1);
        assert_eq!(stats.interactions_24h, 1);
        assert_eq!(stats.interactions_by_source.get("local_kb"), Some(&1));
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = KnowledgeMemory::open(dir.path()).await.unwrap();
            store
                .save_learned("qué es la malaria", "Una enfermedad.", Language::Es, "enfermedad")
                .await
                .unwrap();
            store
                .update_profile("u1", Some(Language::Es), Some("enfermedad"))
                .await
                .unwrap();
        }
        let store = KnowledgeMemory::open(dir.path()).await.unwrap();
        assert_eq!(store.learned_entries(Language::Es).await.len(), 1);
        assert_eq!(store.get_profile("u1").await.unwrap().total_messages, 1);
    }
}
