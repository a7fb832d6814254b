//! # Input language heuristic
//!
//! A simple lexical detector for German input text, used by the Gateway
//! to decide whether a top-level task needs translation before
//! decomposition. Deliberately crude: a keyword-count threshold, not a
//! language model — matching the original framework's `is_german_text`
//! heuristic.

/// Common German function words and umlauts. Case-insensitive match.
const GERMAN_MARKERS: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "eine", "einen", "einer",
    "mit", "für", "auf", "bitte", "erstelle", "entwickle", "können", "müssen",
    "ä", "ö", "ü", "ß",
];

/// Minimum marker hits (across the whole text) before the text is judged
/// German.
const GERMAN_KEYWORD_THRESHOLD: usize = 3;

/// Heuristic: count German marker tokens and umlaut characters; judge the
/// text German if the count reaches the threshold.
pub fn looks_german(text: &str) -> bool {
    let lower = text.to_lowercase();
    let word_hits = lower
        .split_whitespace()
        .filter(|word| GERMAN_MARKERS.contains(&word.trim_matches(|c: char| !c.is_alphanumeric())))
        .count();
    let umlaut_hits = lower.chars().filter(|c| matches!(c, 'ä' | 'ö' | 'ü' | 'ß')).count();

    word_hits + umlaut_hits >= GERMAN_KEYWORD_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_clearly_german_sentence() {
        assert!(looks_german("Bitte erstelle eine neue Funktion für die Überprüfung"));
    }

    #[test]
    fn does_not_flag_english_sentence() {
        assert!(!looks_german("Please create a new function for validation"));
    }

    #[test]
    fn short_ambiguous_text_is_not_flagged() {
        assert!(!looks_german("ist das"));
    }
}
