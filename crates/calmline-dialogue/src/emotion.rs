//! Emotional-state detection from caller wording.

use calmline_types::{EmotionalState, VoiceAdjustments};

use crate::text::{contains_any, normalize};

const CRISIS_WORDS: &[&str] = &[
    "cant go on",
    "can not go on",
    "no reason to live",
    "hopeless",
    "nothing matters anymore",
    "give up on everything",
];

const DISTRESSED_WORDS: &[&str] = &[
    "panic attack",
    "panicking",
    "cant breathe",
    "falling apart",
    "breaking down",
    "overwhelmed",
    "cant stop crying",
    "freaking out",
    "dont know what to do",
];

const ANXIOUS_WORDS: &[&str] = &[
    "anxious",
    "anxiety",
    "nervous",
    "worried",
    "scared",
    "afraid",
    "stressed",
];

const FRUSTRATED_WORDS: &[&str] = &[
    "frustrated",
    "frustrating",
    "annoyed",
    "ridiculous",
    "angry",
    "already told you",
    "not listening",
    "waste of time",
];

const CALM_WORDS: &[&str] = &["thank you", "thanks", "great", "perfect", "wonderful", "appreciate"];

/// Result of analyzing one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionAnalysis {
    pub state: EmotionalState,
    pub adjustments: VoiceAdjustments,
    /// Spoken before a generated answer to acknowledge the caller's state.
    pub empathetic_prefix: Option<&'static str>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EmotionAnalyzer;

impl EmotionAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Checks keyword families from most to least severe.
    pub fn analyze(&self, text: &str) -> EmotionAnalysis {
        let normalized = normalize(text);
        let state = if contains_any(&normalized, CRISIS_WORDS) {
            EmotionalState::Crisis
        } else if contains_any(&normalized, DISTRESSED_WORDS) {
            EmotionalState::Distressed
        } else if contains_any(&normalized, ANXIOUS_WORDS) {
            EmotionalState::Anxious
        } else if contains_any(&normalized, FRUSTRATED_WORDS) {
            EmotionalState::Frustrated
        } else if contains_any(&normalized, CALM_WORDS) {
            EmotionalState::Calm
        } else {
            EmotionalState::Neutral
        };

        EmotionAnalysis {
            state,
            adjustments: adjustments_for(state),
            empathetic_prefix: prefix_for(state),
        }
    }
}

/// Slower, steadier delivery for callers who are struggling.
pub fn adjustments_for(state: EmotionalState) -> VoiceAdjustments {
    let (speed, stability) = match state {
        EmotionalState::Crisis => (0.85, 0.85),
        EmotionalState::Distressed => (0.85, 0.8),
        EmotionalState::Anxious => (0.9, 0.7),
        EmotionalState::Frustrated => (0.95, 0.65),
        EmotionalState::Calm | EmotionalState::Neutral => return VoiceAdjustments::default(),
    };
    VoiceAdjustments { speed, stability }
}

fn prefix_for(state: EmotionalState) -> Option<&'static str> {
    match state {
        EmotionalState::Distressed => {
            Some("I can hear that you're going through a lot right now, and I'm here to help. ")
        }
        EmotionalState::Anxious => Some("I understand this can feel stressful. "),
        EmotionalState::Frustrated => Some("I'm sorry for the frustration. "),
        _ => None,
    }
}

/// Prepends the empathetic prefix unless the response already opens with it.
pub fn with_prefix(analysis: &EmotionAnalysis, response: &str) -> String {
    match analysis.empathetic_prefix {
        Some(prefix) if !response.starts_with(prefix.trim_end()) => {
            format!("{}{}", prefix, response)
        }
        _ => response.to_string(),
    }
}
