//! Tiered response resolution
//!
//! The orchestrator turns one inbound `(user_id, text)` into one outbound
//! answer through a strict tier order: first-contact greeting, emergency
//! interception, static knowledge, learned cache, confirmed patterns,
//! external model, deterministic fallback. Every tier's failure degrades to
//! the next tier and the fallback tier cannot fail, so the pipeline always
//! produces one of the designed responses, never a system error.
//!
//! Resolution is serialized per user (keyed locks) so double-delivered
//! messages cannot race the session and profile counters; different users
//! resolve fully in parallel.

mod model;

pub use model::{ChatMessage, ModelClient, ModelConfig};

use crate::knowledge::KnowledgeSource;
use crate::memory::{AnswerSource, KnowledgeMemory, Language, MemoryStats};
use crate::phrases;
use crate::session::SessionManager;
use crate::SalubotConfig;
use chrono::Timelike;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Max buffered turns per user before trimming.
const HISTORY_CAP: usize = 20;
/// Turns kept after a trim.
const HISTORY_KEEP: usize = 12;
/// Trailing turns included in the model prompt.
const HISTORY_PROMPT_TURNS: usize = 6;

/// Emergency trigger phrases, matched as substrings of the lowercased
/// message. Spanish first, then Fang.
const EMERGENCY_KEYWORDS: &[&str] = &[
    "emergencia",
    "urgente",
    "urgencia",
    "me muero",
    "no respira",
    "no puede respirar",
    "sangre mucha",
    "convulsiones",
    "desmayo",
    "inconsciente",
    "se cayó",
    "accidente",
    "envenenamiento",
    "veneno",
    "parto",
    "trabajo de parto",
    "va a nacer",
    "mordedura de serpiente",
    "serpiente",
    "quemadura grave",
    "quemadura",
    "ahogando",
    "se ahoga",
    "a wu",
    "a si fufú",
    "meyon ose",
    "a biki nnam",
];

/// Keyword table for topic categorization, checked in declaration order.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "centros_salud",
        &[
            "centro", "hospital", "clínica", "clinica", "doctor", "médico", "medico", "malabo",
            "bata", "ebebiyin", "mongomo", "evinayong", "luba", "aconibe", "annobon", "annobón",
            "farmacia",
        ],
    ),
    (
        "sintomas",
        &[
            "fiebre", "dolor", "tos", "diarrea", "vomito", "vómito", "sangre", "mareo", "picazón",
            "hinchado", "herida", "nausea", "náusea", "cansancio", "debilidad", "efie", "a yem",
            "ekos", "nsus", "meyon", "evu",
        ],
    ),
    (
        "enfermedad",
        &[
            "malaria",
            "paludismo",
            "tifoidea",
            "dengue",
            "vih",
            "sida",
            "tuberculosis",
            "colera",
            "cólera",
            "hepatitis",
            "parasit",
            "anemia",
            "diabetes",
            "hipertension",
            "hipertensión",
            "asma",
            "neumonia",
            "neumonía",
        ],
    ),
    (
        "emergencia",
        &[
            "emergencia",
            "urgente",
            "urgencia",
            "me muero",
            "no respira",
            "convulsiones",
            "desmayo",
            "inconsciente",
            "accidente",
            "envenenamiento",
            "veneno",
            "mordedura",
            "serpiente",
            "quemadura",
            "ahogando",
            "parto",
        ],
    ),
    (
        "prevencion",
        &[
            "prevenir",
            "prevencion",
            "prevención",
            "vacuna",
            "proteger",
            "mosquitero",
            "repelente",
            "higiene",
            "agua potable",
            "lavarse",
        ],
    ),
    (
        "constitucion",
        &[
            "constitución",
            "constitucion",
            "ley fundamental",
            "derechos",
            "deberes",
            "poder ejecutivo",
            "poder legislativo",
            "poder judicial",
            "presidente",
            "parlamento",
            "senado",
            "diputado",
            "tribunal",
            "bandera",
            "himno",
            "escudo",
            "símbolo",
            "simbolo",
        ],
    ),
    (
        "ohada",
        &[
            "ohada",
            "derecho mercantil",
            "acta uniforme",
            "empresa",
            "sociedad",
            "sarl",
            "comercial",
            "arbitraje",
            "ccja",
            "crear empresa",
            "negocio",
            "emprender",
        ],
    ),
    (
        "historia",
        &[
            "historia",
            "independencia",
            "colonial",
            "colonia",
            "precolonial",
            "macías",
            "macias",
            "1968",
            "etnia",
            "bubi",
            "ndowé",
            "ndowe",
            "fernandino",
        ],
    ),
];

/// One resolved answer: text, audited source, detected category and whether
/// the outcome feeds the learning loop.
struct Resolved {
    answer: String,
    source: AnswerSource,
    category: String,
    promote: bool,
    /// Language the answer was produced in, recorded on the log and profile.
    language: Language,
    /// Set when the resolving step already persisted the profile change, so
    /// one message never updates the profile twice.
    profile_updated: bool,
}

impl Resolved {
    fn canned(
        answer: impl Into<String>,
        source: AnswerSource,
        category: &str,
        language: Language,
    ) -> Self {
        Self {
            answer: answer.into(),
            source,
            category: category.to_string(),
            promote: false,
            language,
            profile_updated: false,
        }
    }
}

/// The resolution pipeline. One per process; cheap handles are not needed
/// because all entry points take `&self`.
pub struct Orchestrator {
    memory: Arc<KnowledgeMemory>,
    sessions: SessionManager,
    sources: Vec<Box<dyn KnowledgeSource>>,
    model: Option<ModelClient>,
    message_deadline: Duration,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    histories: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl Orchestrator {
    pub fn new(config: &SalubotConfig, memory: Arc<KnowledgeMemory>) -> Self {
        let sessions = SessionManager::new(memory.clone(), config.session_timeout);
        let model = config.model.clone().map(ModelClient::new);
        if model.is_none() {
            info!("No model configured; tier 6 disabled");
        }
        Self {
            memory,
            sessions,
            sources: Vec::new(),
            model,
            message_deadline: config.message_deadline,
            user_locks: Mutex::new(HashMap::new()),
            histories: Mutex::new(HashMap::new()),
        }
    }

    /// Register a static knowledge base. Sources are queried in
    /// registration order; the first non-empty hit wins.
    pub fn register_source(&mut self, source: Box<dyn KnowledgeSource>) {
        debug!("Registered knowledge source: {}", source.name());
        self.sources.push(source);
    }

    /// Resolve one inbound message. Never fails: the worst outcome is the
    /// deterministic fallback response.
    pub async fn handle_message(&self, user_id: &str, raw_text: &str) -> String {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let session = self.sessions.get_or_create(user_id).await;
        let language = session.language;
        let text = raw_text.trim();

        // Unreadable input short-circuits without touching the tiers or
        // the interaction log.
        if text.is_empty() {
            return phrases::not_understood(language).to_string();
        }
        let lower = text.to_lowercase();

        // Tier 1: greeting for brand-new users, this message only.
        if session.is_first_contact {
            self.sessions.mark_welcomed(user_id).await;
            let hour = chrono::Local::now().hour();
            let answer = format!(
                "{}\n\n{}\n\n{}",
                phrases::greeting(hour, language),
                phrases::welcome(language),
                phrases::main_menu(language)
            );
            let resolved = Resolved::canned(answer, AnswerSource::LocalKb, "welcome", language);
            return self.finalize(user_id, text, resolved).await;
        }

        // Navigation commands resolve before the knowledge tiers.
        if let Some(resolved) = self.handle_command(user_id, &lower, language).await {
            return self.finalize(user_id, text, resolved).await;
        }

        // Tiers 2-5 under the local deadline; a deadline elapse degrades
        // straight to the fallback tier.
        let local = tokio::time::timeout(
            self.message_deadline,
            self.resolve_local(&lower, language),
        )
        .await;

        let resolved = match local {
            Ok(Some(resolved)) => resolved,
            Ok(None) => match self.resolve_model(user_id, text, language).await {
                Some(resolved) => resolved,
                None => self.fallback(&lower, language),
            },
            Err(_) => {
                warn!("Local tiers exceeded {:?} for {}", self.message_deadline, user_id);
                self.fallback(&lower, language)
            }
        };

        self.finalize(user_id, text, resolved).await
    }

    /// Evict sessions idle beyond twice the timeout, dropping the evicted
    /// users' serialization locks and conversation buffers with them.
    pub async fn sweep_sessions(&self) {
        let evicted = self.sessions.sweep_expired().await;
        if evicted.is_empty() {
            return;
        }
        let mut locks = self.user_locks.lock().await;
        let mut histories = self.histories.lock().await;
        for user_id in &evicted {
            locks.remove(user_id);
            histories.remove(user_id);
        }
    }

    /// Read-only statistics snapshot for the monitoring surface.
    pub async fn stats(&self) -> MemoryStats {
        self.memory.stats().await
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Exact-match navigation commands: menu, language switch, the numbered
    /// options and farewells. All resolve as canned local responses.
    async fn handle_command(
        &self,
        user_id: &str,
        lower: &str,
        language: Language,
    ) -> Option<Resolved> {
        match lower {
            "menu" | "menú" | "inicio" | "ayuda" | "help" | "hola" | "hi" => Some(Resolved::canned(
                phrases::main_menu(language),
                AnswerSource::LocalKb,
                "menu",
                language,
            )),
            "fang" | "lengua fang" | "en fang" | "habla fang" => {
                Some(self.switch_language(user_id, Language::Fang).await)
            }
            "español" | "espanol" | "castellano" | "en español" | "habla español" | "spanish" => {
                Some(self.switch_language(user_id, Language::Es).await)
            }
            "1" | "sintomas" | "síntomas" => {
                self.sessions
                    .set_state(user_id, "awaiting_symptoms", None)
                    .await;
                Some(Resolved::canned(
                    phrases::ask_symptoms(language),
                    AnswerSource::LocalKb,
                    "sintomas",
                    language,
                ))
            }
            "2" | "centros" | "centro de salud" => {
                self.sessions
                    .set_state(user_id, "awaiting_location", None)
                    .await;
                Some(Resolved::canned(
                    phrases::ask_location(language),
                    AnswerSource::LocalKb,
                    "centros_salud",
                    language,
                ))
            }
            "3" | "enfermedades" => Some(Resolved::canned(
                phrases::ask_disease(language),
                AnswerSource::LocalKb,
                "enfermedad",
                language,
            )),
            "4" | "emergencias" => Some(Resolved::canned(
                phrases::emergency_numbers(language),
                AnswerSource::LocalKb,
                "emergencia",
                language,
            )),
            "5" | "idioma" => Some(Resolved::canned(
                phrases::language_menu(language),
                AnswerSource::LocalKb,
                "idioma",
                language,
            )),
            "6" | "primeros auxilios" => Some(Resolved::canned(
                phrases::first_aid(language),
                AnswerSource::LocalKb,
                "primeros_auxilios",
                language,
            )),
            "gracias" | "adios" | "adiós" | "chao" | "bye" | "akiba" => Some(Resolved::canned(
                phrases::farewell(language),
                AnswerSource::LocalKb,
                "despedida",
                language,
            )),
            _ => None,
        }
    }

    /// Switch the session language. `set_language` persists the preference
    /// through the profile, so the resolved outcome carries the new language
    /// and skips the post-resolution profile update.
    async fn switch_language(&self, user_id: &str, language: Language) -> Resolved {
        self.sessions.set_language(user_id, language).await;
        let answer = format!(
            "{}\n\n{}",
            phrases::language_changed(language),
            phrases::main_menu(language)
        );
        Resolved {
            answer,
            source: AnswerSource::LocalKb,
            category: "idioma".to_string(),
            promote: false,
            language,
            profile_updated: true,
        }
    }

    /// Tiers 2-5: emergency interception, static knowledge, learned cache,
    /// confirmed patterns. `None` means fall through to the model tier.
    async fn resolve_local(&self, lower: &str, language: Language) -> Option<Resolved> {
        // Tier 2: unconditional, always before any knowledge lookup.
        if is_emergency(lower) {
            info!("Emergency keywords detected");
            return Some(Resolved::canned(
                phrases::emergency_numbers(language),
                AnswerSource::Emergency,
                "emergencia",
                language,
            ));
        }

        let category = detect_category(lower);

        // Tier 3: static knowledge bases in registration order.
        for source in &self.sources {
            if let Some(answer) = source.lookup(lower, language) {
                debug!("Static hit from source '{}'", source.name());
                return Some(Resolved {
                    answer,
                    source: AnswerSource::LocalKb,
                    category: category.to_string(),
                    promote: true,
                    language,
                    profile_updated: false,
                });
            }
        }

        // Tier 4: learned cache.
        if let Some((answer, confidence)) = self.memory.lookup_learned(lower, language).await {
            debug!("Learned cache hit (confidence {:.2})", confidence);
            return Some(Resolved {
                answer,
                source: AnswerSource::Memory,
                category: category.to_string(),
                promote: false,
                language,
                profile_updated: false,
            });
        }

        // Tier 5: confirmed patterns.
        if let Some((answer, frequency, confidence)) =
            self.memory.lookup_pattern(lower, language).await
        {
            debug!(
                "Pattern hit (frequency {}, confidence {:.2})",
                frequency, confidence
            );
            return Some(Resolved {
                answer,
                source: AnswerSource::Pattern,
                category: category.to_string(),
                promote: false,
                language,
                profile_updated: false,
            });
        }

        None
    }

    /// Tier 6: external model, when configured. Any failure returns `None`
    /// and the caller degrades to the fallback tier.
    async fn resolve_model(&self, user_id: &str, text: &str, language: Language) -> Option<Resolved> {
        let client = self.model.as_ref()?;

        let instruction = match language {
            Language::Es => "Responde en español sencillo.",
            Language::Fang => {
                "Responde en fang (lengua de Guinea Ecuatorial) con explicaciones en \
                 español si es necesario."
            }
        };
        let mut messages = vec![ChatMessage::system(format!(
            "{}\n\n{}",
            phrases::SYSTEM_PROMPT,
            instruction
        ))];

        let enriched = self.memory.enriched_context(text, user_id).await;
        if !enriched.is_empty() {
            messages.push(ChatMessage::system(format!(
                "Conocimiento aprendido y contexto del usuario:\n{}",
                enriched
            )));
        }

        {
            let histories = self.histories.lock().await;
            if let Some(history) = histories.get(user_id) {
                let tail = history.len().saturating_sub(HISTORY_PROMPT_TURNS);
                messages.extend(history[tail..].iter().cloned());
            }
        }
        messages.push(ChatMessage::user(text));

        match client.complete(&messages).await {
            Ok(answer) => {
                let mut histories = self.histories.lock().await;
                let history = histories.entry(user_id.to_string()).or_default();
                history.push(ChatMessage::user(text));
                history.push(ChatMessage::assistant(answer.clone()));
                if history.len() > HISTORY_CAP {
                    let tail = history.len() - HISTORY_KEEP;
                    history.drain(..tail);
                }
                Some(Resolved {
                    answer,
                    source: AnswerSource::Llm,
                    category: detect_category(&text.to_lowercase()).to_string(),
                    promote: true,
                    language,
                    profile_updated: false,
                })
            }
            Err(e) => {
                warn!("Model call failed, degrading to fallback: {}", e);
                None
            }
        }
    }

    /// Tier 7: deterministic canned answer by detected category, or the
    /// didn't-understand response with the menu. No external dependency,
    /// cannot fail.
    fn fallback(&self, lower: &str, language: Language) -> Resolved {
        let category = detect_category(lower);
        let answer = match category {
            "sintomas" => phrases::ask_symptoms(language).to_string(),
            "centros_salud" => phrases::ask_location(language).to_string(),
            "prevencion" => phrases::first_aid(language).to_string(),
            _ => format!(
                "{}\n\n{}",
                phrases::not_understood(language),
                phrases::main_menu(language)
            ),
        };
        Resolved {
            answer,
            source: AnswerSource::Fallback,
            category: category.to_string(),
            promote: false,
            language,
            profile_updated: false,
        }
    }

    /// Record the outcome: always log; update the profile unless the
    /// resolving step already did; promote into the learned cache and
    /// patterns only for static-knowledge and model answers. Each write is
    /// independently best-effort.
    async fn finalize(&self, user_id: &str, question: &str, resolved: Resolved) -> String {
        let language = resolved.language;
        if let Err(e) = self
            .memory
            .log_interaction(
                user_id,
                question,
                &resolved.answer,
                resolved.source,
                language,
                &resolved.category,
            )
            .await
        {
            warn!("Failed to log interaction: {}", e);
        }

        if resolved.promote {
            let lower = question.to_lowercase();
            if let Err(e) = self
                .memory
                .save_learned(&lower, &resolved.answer, language, &resolved.category)
                .await
            {
                warn!("Failed to save learned entry: {}", e);
            }
            if let Err(e) = self
                .memory
                .reinforce_pattern(&lower, &resolved.answer, language, &resolved.category)
                .await
            {
                warn!("Failed to reinforce pattern: {}", e);
            }
        }

        if !resolved.profile_updated {
            if let Err(e) = self
                .memory
                .update_profile(user_id, Some(language), Some(&resolved.category))
                .await
            {
                warn!("Failed to update profile: {}", e);
            }
        }

        self.sessions.increment_message_count(user_id).await;
        resolved.answer
    }
}

fn is_emergency(lower: &str) -> bool {
    EMERGENCY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// First matching category wins; unmatched text is "general".
fn detect_category(lower: &str) -> &'static str {
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return category;
        }
    }
    "general"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::StaticSource;
    use crate::memory::InteractionRecord;
    use tempfile::TempDir;

    async fn orchestrator() -> (TempDir, Orchestrator) {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(KnowledgeMemory::open(dir.path()).await.unwrap());
        let config = SalubotConfig::new(dir.path().to_path_buf());
        let mut orch = Orchestrator::new(&config, memory);
        orch.register_source(Box::new(StaticSource::new("diseases").with_entry(
            &["malaria", "paludismo"],
            "La malaria es transmitida por mosquitos.",
        )));
        (dir, orch)
    }

    #[test]
    fn test_emergency_detection() {
        assert!(is_emergency("mi hijo no respira"));
        assert!(is_emergency("mordedura de serpiente en el campo"));
        assert!(!is_emergency("qué es la malaria"));
    }

    #[test]
    fn test_category_detection() {
        assert_eq!(detect_category("tengo fiebre y tos"), "sintomas");
        assert_eq!(detect_category("qué es la malaria"), "enfermedad");
        assert_eq!(detect_category("hospital en malabo"), "centros_salud");
        assert_eq!(detect_category("buenas"), "general");
    }

    #[tokio::test]
    async fn test_first_contact_gets_welcome_and_menu() {
        let (_dir, orch) = orchestrator().await;
        let answer = orch.handle_message("240555000001", "hola doctor").await;
        assert!(answer.contains("1. Consultar síntomas"));

        let history = orch.memory.recent_history("240555000001", 1).await;
        assert_eq!(history[0].category, "welcome");
        assert_eq!(history[0].source, AnswerSource::LocalKb);

        let profile = orch.memory.get_profile("240555000001").await.unwrap();
        assert_eq!(profile.total_messages, 1);
    }

    #[tokio::test]
    async fn test_emergency_beats_static_knowledge() {
        let (_dir, orch) = orchestrator().await;
        orch.handle_message("u1", "hola").await; // consume the welcome

        let answer = orch
            .handle_message("u1", "tengo malaria y no respira, emergencia")
            .await;
        assert!(answer.contains("112"));
        let history = orch.memory.recent_history("u1", 1).await;
        assert_eq!(history[0].source, AnswerSource::Emergency);
        // Emergencies never feed the learned cache.
        assert!(orch.memory.learned_entries(Language::Es).await.is_empty());
    }

    #[tokio::test]
    async fn test_static_hit_is_promoted() {
        let (_dir, orch) = orchestrator().await;
        orch.handle_message("u1", "hola").await;

        let answer = orch.handle_message("u1", "malaria").await;
        assert_eq!(answer, "La malaria es transmitida por mosquitos.");
        let history = orch.memory.recent_history("u1", 1).await;
        assert_eq!(history[0].source, AnswerSource::LocalKb);
        assert_eq!(orch.memory.learned_entries(Language::Es).await.len(), 1);
    }

    #[tokio::test]
    async fn test_learned_cache_answers_after_source_removed() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(KnowledgeMemory::open(dir.path()).await.unwrap());
        memory
            .save_learned("qué es el dengue", "El dengue es viral.", Language::Es, "enfermedad")
            .await
            .unwrap();
        let config = SalubotConfig::new(dir.path().to_path_buf());
        let orch = Orchestrator::new(&config, memory);
        orch.handle_message("u1", "hola").await;

        let answer = orch.handle_message("u1", "qué es el dengue").await;
        assert_eq!(answer, "El dengue es viral.");
        let history = orch.memory.recent_history("u1", 1).await;
        assert_eq!(history[0].source, AnswerSource::Memory);
    }

    #[tokio::test]
    async fn test_fallback_when_nothing_matches() {
        let (_dir, orch) = orchestrator().await;
        orch.handle_message("u1", "hola").await;

        let answer = orch.handle_message("u1", "xyzzy cosa rara").await;
        assert!(answer.contains("no he entendido"));
        let history = orch.memory.recent_history("u1", 1).await;
        assert_eq!(history[0].source, AnswerSource::Fallback);
    }

    #[tokio::test]
    async fn test_language_switch_command() {
        let (dir, orch) = orchestrator().await;
        orch.handle_message("u1", "hola").await;
        let before = orch.memory.get_profile("u1").await.unwrap().total_messages;

        let answer = orch.handle_message("u1", "fang").await;
        assert!(answer.contains("fang"));

        // Preference persisted; the switch counts as exactly one message.
        let profile = orch.memory.get_profile("u1").await.unwrap();
        assert_eq!(profile.preferred_language, Language::Fang);
        assert_eq!(profile.total_messages, before + 1);

        // The interaction is logged in the language it was answered in.
        let log = tokio::fs::read_to_string(dir.path().join("interactions.jsonl"))
            .await
            .unwrap();
        let last: InteractionRecord = serde_json::from_str(log.lines().last().unwrap()).unwrap();
        assert_eq!(last.language, Language::Fang);
        assert_eq!(last.category, "idioma");

        // Subsequent canned responses come back in Fang.
        let menu = orch.handle_message("u1", "menu").await;
        assert!(menu.contains("Dzé ma ye bo wo?"));
    }

    #[tokio::test]
    async fn test_sweep_drops_per_user_state() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(KnowledgeMemory::open(dir.path()).await.unwrap());
        let config = SalubotConfig::new(dir.path().to_path_buf())
            .with_session_timeout(Duration::from_millis(20));
        let orch = Orchestrator::new(&config, memory);
        orch.handle_message("u1", "hola").await;
        assert_eq!(orch.user_locks.lock().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        orch.sweep_sessions().await;
        assert!(orch.user_locks.lock().await.is_empty());
        assert!(orch.histories.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let (_dir, orch) = orchestrator().await;
        orch.handle_message("u1", "hola").await;

        let answer = orch.handle_message("u1", "   ").await;
        assert!(answer.contains("no he entendido"));
        // No interaction record for unreadable input.
        assert_eq!(orch.memory.recent_history("u1", 10).await.len(), 1);
    }
}
