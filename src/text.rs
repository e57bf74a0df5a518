//! Text normalization and keyword-overlap similarity
//!
//! Matching across the whole engine is a bounded, explainable token-overlap
//! heuristic: lowercase, strip punctuation, drop stopwords, compare sets.

use std::collections::HashSet;

/// Spanish stopwords excluded from similarity comparison.
const STOPWORDS: &[&str] = &[
    "de", "la", "el", "en", "y", "a", "los", "las", "del", "un", "una", "es", "se", "que", "por",
    "con", "no", "para", "al", "lo", "como", "más", "mas", "pero", "su", "sus", "le", "ya", "o",
    "fue", "ha", "son", "muy", "mi", "me", "qué", "te", "tu", "nos", "si", "sobre", "este",
    "esta", "ser", "tiene", "hay", "puede", "yo", "cuando", "todo", "sin", "también", "entre",
    "después", "todos", "esa", "eso", "hace", "otra", "otro", "ni", "mismo", "hola", "cual",
    "cuál", "donde", "dónde", "cómo", "cuales", "puedo", "tengo", "hacer", "saber", "decir",
];

/// Punctuation replaced by whitespace before splitting.
const PUNCTUATION: &str = "¿?¡!.,;:()[]{}\"'-_/\\@#$%^&*+=~`<>";

/// Normalize text into its canonical keyword set.
///
/// Lowercases, replaces the fixed punctuation set with spaces, splits on
/// whitespace and removes stopwords. Empty or stopword-only input yields
/// an empty set.
pub fn tokenize(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if PUNCTUATION.contains(c) { ' ' } else { c })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|word| !STOPWORDS.contains(word))
        .map(|word| word.to_string())
        .collect()
}

/// Overlap coefficient between two keyword sets, in `[0, 1]`.
///
/// `|a ∩ b| / max(|a|, |b|)`. The denominator is the larger set, not the
/// union: a short confirmed phrase fully contained in a longer one still
/// scores highly. This asymmetric tolerance is intentional and must not be
/// replaced by Jaccard.
pub fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let denominator = a.len().max(b.len());
    intersection as f64 / denominator as f64
}

/// Tokenize both texts and score their overlap.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    similarity(&tokenize(a), &tokenize(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_strips_punctuation_and_stopwords() {
        let tokens = tokenize("¿Qué es la malaria?");
        assert!(tokens.contains("malaria"));
        assert!(!tokens.contains("es"));
        assert!(!tokens.contains("la"));
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_tokenize_stopword_only_is_empty() {
        assert!(tokenize("¿qué es la de?").is_empty());
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_identical_text_scores_one() {
        let text = "síntomas de fiebre tifoidea";
        assert_eq!(text_similarity(text, text), 1.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = "fiebre alta y dolor de cabeza";
        let b = "dolor fuerte de cabeza";
        assert_eq!(text_similarity(a, b), text_similarity(b, a));
    }

    #[test]
    fn test_empty_set_scores_zero() {
        let empty = HashSet::new();
        let full = tokenize("malaria");
        assert_eq!(similarity(&empty, &full), 0.0);
        assert_eq!(similarity(&full, &empty), 0.0);
        assert_eq!(similarity(&empty, &empty), 0.0);
    }

    #[test]
    fn test_short_phrase_contained_in_longer() {
        // Overlap coefficient: denominator is max(|a|,|b|), not the union.
        let short = tokenize("malaria prevención");
        let long = tokenize("malaria prevención mosquitero repelente");
        assert_eq!(similarity(&short, &long), 0.5);

        // Jaccard would give 2/4 here too, but differs when sets overlap
        // partially; pin a case where the two disagree.
        let a = tokenize("fiebre tos mareo");
        let b = tokenize("fiebre tos nausea vomito");
        // intersection = 2, max = 4, union = 5
        assert_eq!(similarity(&a, &b), 0.5);
    }
}
