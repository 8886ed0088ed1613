//! Wake word detection over recognized text.
//!
//! Matching policy: case-insensitive substring of the configured phrase,
//! applied only to finalized utterances above a confidence floor. Pure;
//! the controller owns all state around it.

use crate::recognizer::Utterance;

/// Default confidence floor below which utterances never match.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    phrase: String,
    min_confidence: f32,
}

impl WakeWordDetector {
    pub fn new(phrase: &str) -> Self {
        Self::with_min_confidence(phrase, DEFAULT_MIN_CONFIDENCE)
    }

    pub fn with_min_confidence(phrase: &str, min_confidence: f32) -> Self {
        Self {
            phrase: phrase.trim().to_lowercase(),
            min_confidence,
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Whether this utterance contains the wake phrase. Non-final, empty,
    /// and sub-threshold utterances never match.
    pub fn matches(&self, utterance: &Utterance) -> bool {
        if !utterance.is_final || utterance.is_empty() || self.phrase.is_empty() {
            return false;
        }
        if utterance.confidence < self.min_confidence {
            return false;
        }
        utterance.text.to_lowercase().contains(&self.phrase)
    }
}

/// The sleep command ends an active session. Only fires when the entire
/// input is the single word "sleep", so phrases like "how do I sleep
/// better" still go to the dispatcher.
pub fn is_sleep_command(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.len() == 1 && words[0].eq_ignore_ascii_case("sleep")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_utt(text: &str) -> Utterance {
        Utterance::final_text(text)
    }

    #[test]
    fn matches_case_insensitive_substring() {
        let detector = WakeWordDetector::new("Mango");
        assert!(detector.matches(&final_utt("hey mango what time is it")));
        assert!(detector.matches(&final_utt("MANGO")));
        assert!(detector.matches(&final_utt("okmangook")));
    }

    #[test]
    fn no_match_without_phrase() {
        let detector = WakeWordDetector::new("mango");
        assert!(!detector.matches(&final_utt("hello there")));
        assert!(!detector.matches(&final_utt("man go")));
    }

    #[test]
    fn empty_utterance_never_matches() {
        let detector = WakeWordDetector::new("mango");
        assert!(!detector.matches(&final_utt("")));
        assert!(!detector.matches(&final_utt("   ")));
    }

    #[test]
    fn partial_utterance_never_matches() {
        let detector = WakeWordDetector::new("mango");
        let partial = Utterance::new("hey mango", false, 1.0);
        assert!(!detector.matches(&partial));
    }

    #[test]
    fn low_confidence_never_matches() {
        let detector = WakeWordDetector::with_min_confidence("mango", 0.5);
        let mumble = Utterance::new("mango", true, 0.2);
        assert!(!detector.matches(&mumble));
    }

    #[test]
    fn phrase_is_normalized() {
        let detector = WakeWordDetector::new("  Beebo ");
        assert_eq!(detector.phrase(), "beebo");
        assert!(detector.matches(&final_utt("hey beebo")));
    }

    #[test]
    fn sleep_is_exact_single_word() {
        assert!(is_sleep_command("sleep"));
        assert!(is_sleep_command(" Sleep "));
        assert!(!is_sleep_command("go to sleep"));
        assert!(!is_sleep_command("sleepy"));
        assert!(!is_sleep_command(""));
    }
}
