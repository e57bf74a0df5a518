//! Knowledge memory for Salubot
//!
//! Persistent learned-answer cache, append-only interaction log, user
//! profiles and statistically reinforced question patterns.

mod records;
mod store;

pub use records::{
    AnswerSource, InteractionRecord, InteractionSummary, Language, LearnedEntry, LearnedPattern,
    MemoryStats, PatternSummary, UserProfile,
};
pub use store::{
    KnowledgeMemory, ACCEPT_THRESHOLD, CONTEXT_THRESHOLD, MERGE_THRESHOLD,
    PATTERN_CONFIRM_THRESHOLD,
};
