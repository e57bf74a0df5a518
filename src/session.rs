//! Per-user conversational session state
//!
//! Sessions live in process memory, keyed by the channel user id. A session
//! idle longer than the configured timeout `T` is discarded and recreated on
//! next contact; sessions idle beyond `2T` are removed by the periodic sweep.
//! Profile data is read from the knowledge memory to hydrate new sessions
//! (language, message count, first-contact flag) so users keep their
//! preferences across restarts.

use crate::memory::{KnowledgeMemory, Language};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Ephemeral conversational state for one user.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub language: Language,
    /// Free-form conversational state tag, e.g. "awaiting_symptoms"
    pub state: String,
    /// Transient slot values; later patches overwrite keys, others persist
    pub context: HashMap<String, String>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub message_count: u64,
    pub is_first_contact: bool,
}

/// Owns the in-memory session table. Nothing else mutates sessions.
pub struct SessionManager {
    memory: Arc<KnowledgeMemory>,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(memory: Arc<KnowledgeMemory>, idle_timeout: Duration) -> Self {
        Self {
            memory,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Get the user's session, creating or recreating it as needed.
    ///
    /// An existing session within the idle timeout is touched and returned
    /// unchanged; one idle beyond the timeout is discarded and a fresh
    /// session is created in its place.
    pub async fn get_or_create(&self, user_id: &str) -> Session {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get_mut(user_id) {
            let idle = now.signed_duration_since(session.last_activity_at);
            if idle.to_std().unwrap_or(Duration::ZERO) <= self.idle_timeout {
                session.last_activity_at = now;
                return session.clone();
            }
            info!("Session expired for {}", user_id);
            sessions.remove(user_id);
        }

        let session = self.create_session(user_id).await;
        sessions.insert(user_id.to_string(), session.clone());
        session
    }

    /// Build a new session, hydrated from the persisted profile if any.
    /// A profile with prior messages means the user is not a first contact
    /// even in a fresh process.
    async fn create_session(&self, user_id: &str) -> Session {
        let mut language = Language::Es;
        let mut message_count = 0;
        let mut is_first_contact = true;

        match self.memory.get_profile(user_id).await {
            Ok(profile) => {
                language = profile.preferred_language;
                message_count = profile.total_messages;
                if message_count > 0 {
                    is_first_contact = false;
                }
            }
            Err(e) => {
                warn!("Could not hydrate profile for {}: {}", user_id, e);
            }
        }

        let now = Utc::now();
        debug!(
            "New session for {} (first_contact={}, language={})",
            user_id, is_first_contact, language
        );
        Session {
            user_id: user_id.to_string(),
            language,
            state: "start".to_string(),
            context: HashMap::new(),
            last_activity_at: now,
            created_at: now,
            message_count,
            is_first_contact,
        }
    }

    /// Change the user's language, persisting the preference.
    pub async fn set_language(&self, user_id: &str, language: Language) {
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(user_id) {
                session.language = language;
            }
        }
        info!("Language changed to {} for {}", language, user_id);
        if let Err(e) = self
            .memory
            .update_profile(user_id, Some(language), None)
            .await
        {
            warn!("Could not persist language for {}: {}", user_id, e);
        }
    }

    /// Update the conversational state tag, merging any context patch.
    pub async fn set_state(
        &self,
        user_id: &str,
        state: &str,
        context_patch: Option<HashMap<String, String>>,
    ) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(user_id) {
            session.state = state.to_string();
            if let Some(patch) = context_patch {
                session.context.extend(patch);
            }
        }
    }

    pub async fn increment_message_count(&self, user_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(user_id) {
            session.message_count += 1;
        }
    }

    /// Flip the first-contact flag after the welcome message went out.
    pub async fn mark_welcomed(&self, user_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(user_id) {
            session.is_first_contact = false;
        }
    }

    /// Remove sessions idle beyond twice the timeout. The only deletion
    /// path; never touches persisted data. Returns the evicted user ids so
    /// callers can drop any per-user state of their own.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let eviction_window = self.idle_timeout * 2;
        let mut sessions = self.sessions.lock().await;
        let evicted: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| {
                let idle = now
                    .signed_duration_since(session.last_activity_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                idle > eviction_window
            })
            .map(|(user_id, _)| user_id.clone())
            .collect();
        for user_id in &evicted {
            sessions.remove(user_id);
        }
        if !evicted.is_empty() {
            info!("Swept {} expired sessions", evicted.len());
        }
        evicted
    }

    /// Number of live sessions (diagnostics).
    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn manager(timeout: Duration) -> (TempDir, SessionManager) {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(KnowledgeMemory::open(dir.path()).await.unwrap());
        (dir, SessionManager::new(memory, timeout))
    }

    #[tokio::test]
    async fn test_first_contact_session() {
        let (_dir, mgr) = manager(Duration::from_secs(60)).await;
        let session = mgr.get_or_create("u1").await;
        assert!(session.is_first_contact);
        assert_eq!(session.language, Language::Es);
        assert_eq!(session.message_count, 0);
    }

    #[tokio::test]
    async fn test_session_kept_within_timeout() {
        let (_dir, mgr) = manager(Duration::from_secs(60)).await;
        let first = mgr.get_or_create("u1").await;
        mgr.set_state(
            "u1",
            "awaiting_symptoms",
            Some(HashMap::from([("city".to_string(), "Bata".to_string())])),
        )
        .await;

        let second = mgr.get_or_create("u1").await;
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.state, "awaiting_symptoms");
        assert_eq!(second.context.get("city").map(String::as_str), Some("Bata"));
    }

    #[tokio::test]
    async fn test_session_recreated_after_timeout() {
        let (_dir, mgr) = manager(Duration::from_millis(30)).await;
        let first = mgr.get_or_create("u1").await;
        mgr.set_state("u1", "awaiting_symptoms", None).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = mgr.get_or_create("u1").await;
        assert_ne!(second.created_at, first.created_at);
        assert_eq!(second.state, "start");
        assert!(second.context.is_empty());
    }

    #[tokio::test]
    async fn test_hydration_from_profile() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(KnowledgeMemory::open(dir.path()).await.unwrap());
        memory
            .update_profile("u1", Some(Language::Fang), Some("enfermedad"))
            .await
            .unwrap();

        let mgr = SessionManager::new(memory, Duration::from_secs(60));
        let session = mgr.get_or_create("u1").await;
        assert!(!session.is_first_contact);
        assert_eq!(session.language, Language::Fang);
        assert_eq!(session.message_count, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_beyond_double_timeout() {
        let (_dir, mgr) = manager(Duration::from_millis(20)).await;
        mgr.get_or_create("u1").await;
        assert_eq!(mgr.active_sessions().await, 1);

        // Within 2T: sweep keeps it.
        assert!(mgr.sweep_expired().await.is_empty());
        assert_eq!(mgr.active_sessions().await, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(mgr.sweep_expired().await, vec!["u1".to_string()]);
        assert_eq!(mgr.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_mark_welcomed() {
        let (_dir, mgr) = manager(Duration::from_secs(60)).await;
        let session = mgr.get_or_create("u1").await;
        assert!(session.is_first_contact);

        mgr.mark_welcomed("u1").await;
        let session = mgr.get_or_create("u1").await;
        assert!(!session.is_first_contact);
        assert_eq!(session.message_count, 0);
    }
}
