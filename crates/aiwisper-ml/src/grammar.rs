//! Dictionary-backed grammar checker contract (spec.md §4.6 criterion D).
//!
//! The concrete dictionary (and any morphological smarts) is an external
//! collaborator out of scope for this crate (spec.md §1: "the
//! dictionary-backed grammar checker"). This module defines the narrow
//! trait the hybrid merger calls through, plus a small embedded-wordlist
//! fallback so the criterion still does something useful when no richer
//! checker is wired in.

use std::collections::HashSet;

/// Script detected in a candidate word, used to pick which dictionary to
/// consult (spec.md §4.6: "Cyrillic→ru dict, Latin→en dict").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Cyrillic,
    Other,
}

pub fn detect_script(text: &str) -> Script {
    let mut has_latin = false;
    let mut has_cyrillic = false;
    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            has_latin = true;
        } else if matches!(c, '\u{0400}'..='\u{04FF}') {
            has_cyrillic = true;
        }
    }
    if has_cyrillic {
        Script::Cyrillic
    } else if has_latin {
        Script::Latin
    } else {
        Script::Other
    }
}

/// Looks a word up in the dictionary for its detected script.
pub trait GrammarChecker: Send + Sync {
    /// True if `word` is a valid dictionary entry for `script`. Words in a
    /// script the checker has no dictionary for are treated as unknown
    /// (neither valid nor invalid) and should not cast a vote.
    fn is_valid(&self, word: &str, script: Script) -> Option<bool>;
}

/// Fallback checker backed by a small embedded common-word list. Good
/// enough to break ties against obvious transliteration artifacts; a real
/// deployment wires in the dictionary-backed collaborator instead.
pub struct HeuristicGrammarChecker {
    en: HashSet<&'static str>,
    ru: HashSet<&'static str>,
}

impl Default for HeuristicGrammarChecker {
    fn default() -> Self {
        Self {
            en: EN_COMMON_WORDS.iter().copied().collect(),
            ru: RU_COMMON_WORDS.iter().copied().collect(),
        }
    }
}

impl GrammarChecker for HeuristicGrammarChecker {
    fn is_valid(&self, word: &str, script: Script) -> Option<bool> {
        let normalized = word.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        match script {
            Script::Latin => Some(self.en.contains(normalized.as_str())),
            Script::Cyrillic => Some(self.ru.contains(normalized.as_str())),
            Script::Other => None,
        }
    }
}

/// Small common-word seed list; real coverage comes from the external
/// dictionary collaborator.
const EN_COMMON_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "be", "been",
    "i", "you", "he", "she", "it", "we", "they", "this", "that", "these", "those",
    "hello", "world", "yes", "no", "okay", "good", "bad", "new", "old", "one", "two",
    "three", "time", "year", "day", "work", "way", "people", "man", "woman", "thing",
    "genesis", "origin", "project", "team", "data", "system", "model", "engine",
    "speaker", "meeting", "session", "call", "thanks", "please", "sorry", "sure",
    "right", "left", "now", "here", "there", "what", "when", "where", "why", "how",
];

const RU_COMMON_WORDS: &[&str] = &[
    "и", "в", "не", "на", "я", "быть", "он", "с", "что", "а", "по", "это", "она",
    "этот", "к", "но", "они", "мы", "как", "из", "у", "который", "то", "за", "свой",
    "привет", "да", "нет", "хорошо", "плохо", "новый", "старый", "один", "два", "три",
    "время", "год", "день", "работа", "человек", "команда", "данные", "система",
    "модель", "встреча", "сессия", "звонок", "спасибо", "пожалуйста", "извините",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_latin_script() {
        assert_eq!(detect_script("Genesis"), Script::Latin);
    }

    #[test]
    fn detects_cyrillic_script() {
        assert_eq!(detect_script("джинезис"), Script::Cyrillic);
    }

    #[test]
    fn genesis_is_valid_english() {
        let checker = HeuristicGrammarChecker::default();
        assert_eq!(checker.is_valid("Genesis", Script::Latin), Some(true));
    }

    #[test]
    fn transliteration_artifact_is_invalid_russian() {
        let checker = HeuristicGrammarChecker::default();
        assert_eq!(checker.is_valid("джинезис", Script::Cyrillic), Some(false));
    }

    #[test]
    fn unscripted_text_abstains() {
        let checker = HeuristicGrammarChecker::default();
        assert_eq!(checker.is_valid("123", Script::Other), None);
    }
}
