//! Caller accessibility needs.
//!
//! Needs are sticky for the rest of the call: once a caller asks us to slow
//! down, every later response stays slow.

use calmline_types::VoiceAdjustments;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::text::{contains_any, normalize};

const HEARING_WORDS: &[&str] = &[
    "hard of hearing",
    "cant hear",
    "cannot hear",
    "speak up",
    "louder",
    "hearing aid",
    "say that again",
    "repeat that",
];

const SLOWER_WORDS: &[&str] = &["slow down", "slower", "too fast", "talking fast", "speaking fast"];

const SIMPLE_WORDS: &[&str] = &[
    "dont understand",
    "do not understand",
    "what does that mean",
    "simpler",
    "plain english",
    "confusing",
];

/// Maximum sentences kept in a simplified response.
const SIMPLE_MAX_SENTENCES: usize = 3;

static SIMPLIFICATIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bapproximately\b", "about"),
        (r"(?i)\bassistance\b", "help"),
        (r"(?i)\badditional\b", "more"),
        (r"(?i)\bregarding\b", "about"),
        (r"(?i)\bhowever\b", "but"),
        (r"(?i)\butilize\b", "use"),
        (r"(?i)\bprior to\b", "before"),
        (r"(?i)\bin order to\b", "to"),
        (r"(?i)\btherefore\b", "so"),
        (r"(?i)\bcommence\b", "start"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("invalid simplification regex"),
            replacement,
        )
    })
    .collect()
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessibilityNeeds {
    pub hearing_difficulty: bool,
    pub slower_speech: bool,
    pub simple_language: bool,
}

impl AccessibilityNeeds {
    /// Folds any needs expressed in `text` into the current set.
    pub fn observe(&mut self, text: &str) -> bool {
        let before = *self;
        let normalized = normalize(text);
        if contains_any(&normalized, HEARING_WORDS) {
            self.hearing_difficulty = true;
            self.slower_speech = true;
        }
        if contains_any(&normalized, SLOWER_WORDS) {
            self.slower_speech = true;
        }
        if contains_any(&normalized, SIMPLE_WORDS) {
            self.simple_language = true;
        }
        let changed = *self != before;
        if changed {
            tracing::debug!(needs = ?self, "accessibility needs updated");
        }
        changed
    }

    pub fn any(&self) -> bool {
        self.hearing_difficulty || self.slower_speech || self.simple_language
    }

    /// Lines appended to the generation system prompt.
    pub fn prompt_directives(&self) -> Vec<&'static str> {
        let mut directives = Vec::new();
        if self.hearing_difficulty {
            directives.push(
                "The caller has difficulty hearing. Use short sentences and restate key details.",
            );
        }
        if self.slower_speech {
            directives.push("Keep responses brief so they can be spoken slowly.");
        }
        if self.simple_language {
            directives.push("Use simple, everyday words. Avoid jargon and long sentences.");
        }
        directives
    }

    pub fn adjust_voice(&self, adjustments: VoiceAdjustments) -> VoiceAdjustments {
        if !self.slower_speech {
            return adjustments;
        }
        VoiceAdjustments {
            speed: (adjustments.speed * 0.85).max(0.7),
            stability: adjustments.stability.max(0.7),
        }
    }

    /// Rewrites a response for callers who asked for simpler language.
    pub fn post_process(&self, response: &str) -> String {
        if !self.simple_language {
            return response.to_string();
        }
        let mut text = response.to_string();
        for (pattern, replacement) in SIMPLIFICATIONS.iter() {
            text = pattern
                .replace_all(&text, |caps: &regex::Captures<'_>| {
                    match_case(&caps[0], replacement)
                })
                .into_owned();
        }
        truncate_sentences(&text, SIMPLE_MAX_SENTENCES)
    }
}

/// Capitalizes the replacement when the original word was capitalized.
fn match_case(original: &str, replacement: &str) -> String {
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = replacement.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    } else {
        replacement.to_string()
    }
}

fn truncate_sentences(text: &str, max: usize) -> String {
    let mut end = text.len();
    let mut seen = 0;
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            seen += 1;
            if seen == max {
                end = idx + ch.len_utf8();
                break;
            }
        }
    }
    text[..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hearing_difficulty_implies_slower_speech() {
        let mut needs = AccessibilityNeeds::default();
        assert!(needs.observe("Sorry, I'm hard of hearing"));
        assert!(needs.hearing_difficulty);
        assert!(needs.slower_speech);
        assert!(!needs.simple_language);
        assert!(!needs.observe("okay thanks"), "needs are sticky, nothing new");
        assert!(needs.slower_speech);
    }

    #[test]
    fn slower_speech_lowers_voice_speed() {
        let needs = AccessibilityNeeds {
            slower_speech: true,
            ..AccessibilityNeeds::default()
        };
        let adjusted = needs.adjust_voice(VoiceAdjustments::default());
        assert!(adjusted.speed < 1.0);
        assert!(adjusted.speed >= 0.7);
    }

    #[test]
    fn simple_language_rewrites_and_shortens() {
        let mut needs = AccessibilityNeeds::default();
        needs.observe("I don't understand what that means, can you say it simpler");
        let out = needs.post_process(
            "Sessions are approximately fifty minutes. However, the first one is longer. \
             We can provide assistance. Additional forms follow.",
        );
        assert_eq!(
            out,
            "Sessions are about fifty minutes. But, the first one is longer. We can provide help."
        );
    }

    #[test]
    fn directives_follow_needs() {
        assert!(AccessibilityNeeds::default().prompt_directives().is_empty());
        let needs = AccessibilityNeeds {
            simple_language: true,
            ..AccessibilityNeeds::default()
        };
        assert_eq!(needs.prompt_directives().len(), 1);
    }
}
