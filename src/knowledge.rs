//! Static knowledge collaborator contract
//!
//! The disease, facility, legal and history knowledge bases are external
//! collaborators: inert lookup tables behind a narrow function contract.
//! The resolution pipeline queries registered sources in registration
//! order and takes the first non-empty hit.

use crate::memory::Language;

/// One static knowledge base: `lookup(normalized_query, language)`.
///
/// Implementations must be cheap and infallible; "no answer" is `None`,
/// never an error.
pub trait KnowledgeSource: Send + Sync {
    /// Stable name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Answer text for the query, if this source covers it.
    fn lookup(&self, query: &str, language: Language) -> Option<String>;
}

/// Keyword-triggered lookup table, the simplest [`KnowledgeSource`].
///
/// Each entry maps trigger keywords to a per-language answer; the first
/// entry with a keyword contained in the query wins.
pub struct StaticSource {
    name: String,
    entries: Vec<StaticEntry>,
}

struct StaticEntry {
    keywords: Vec<String>,
    answer_es: String,
    answer_fang: Option<String>,
}

impl StaticSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Add an entry answering in Spanish (used for both languages unless a
    /// Fang variant is added with [`with_bilingual_entry`]).
    ///
    /// [`with_bilingual_entry`]: StaticSource::with_bilingual_entry
    pub fn with_entry(mut self, keywords: &[&str], answer: &str) -> Self {
        self.entries.push(StaticEntry {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            answer_es: answer.to_string(),
            answer_fang: None,
        });
        self
    }

    pub fn with_bilingual_entry(
        mut self,
        keywords: &[&str],
        answer_es: &str,
        answer_fang: &str,
    ) -> Self {
        self.entries.push(StaticEntry {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            answer_es: answer_es.to_string(),
            answer_fang: Some(answer_fang.to_string()),
        });
        self
    }
}

impl KnowledgeSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, query: &str, language: Language) -> Option<String> {
        let query = query.to_lowercase();
        for entry in &self.entries {
            if entry.keywords.iter().any(|k| query.contains(k.as_str())) {
                let answer = match language {
                    Language::Fang => entry.answer_fang.as_ref().unwrap_or(&entry.answer_es),
                    Language::Es => &entry.answer_es,
                };
                return Some(answer.clone());
            }
        }
        None
    }
}
