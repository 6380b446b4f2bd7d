//! Safety and escalation detection.
//!
//! `CrisisCoordinator::assess` is pure: it looks at the utterance, the
//! conversation so far and the detected emotional state, and decides
//! whether a human needs to get involved. Life-safety families match
//! word inflections and ignore spacing, so "killing myself" or
//! "kill-my-self" escalate the same as "kill myself".

use std::sync::LazyLock;

use calmline_types::{EmotionalState, Priority};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::ConversationTurn;
use crate::text::{contains_any, contains_loose, normalize};

// Patterns run over normalized text. `\s*` between words keeps
// "killmyself" and "kill-my-self" matching; verb stems take their
// inflections so "killing myself" and "hurting myself" are caught.
static SUICIDE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bkill(s|ed|ing)?\s*my\s*self\b",
        r"\bsuicid(e|al)\b",
        r"\bend(s|ed|ing)?\s*my\s*(own\s*)?life\b",
        r"\bend(s|ed|ing)?\s*it\s*all\b",
        r"\b(want|wanted|wanting|wanna)\s*(to\s*)?die\b",
        r"\btak(e|es|ing)\s*my\s*own\s*life\b",
        r"\bbetter\s*off\s*dead\b",
        r"\bwish\s*i\s*(was|were)\s*dead\b",
        r"\b(dont|do\s*not|no\s*longer|not)\s*(want|wanna)\s*(to\s*)?(live|be\s*alive)\b",
    ])
});

static SELF_HARM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(hurt|hurts|hurting|harm|harms|harmed|harming|cut|cuts|cutting|burn|burned|burning)\s*my\s*self\b",
        r"\bself\s*harm(s|ed|ing)?\b",
        r"\boverdos(e|ed|es|ing)\b",
    ])
});

const EMERGENCY_WORDS: &[&str] = &[
    "emergency",
    "911",
    "ambulance",
    "in danger",
    "not safe",
    "someone is hurting me",
    "going to hurt someone",
];

const COMPLEX_REQUEST_WORDS: &[&str] = &[
    "insurance authorization",
    "prior authorization",
    "billing dispute",
    "dispute a charge",
    "dispute the charge",
    "medical records",
    "medication",
    "prescription",
];

const CONFUSION_WORDS: &[&str] = &[
    "dont understand",
    "confused",
    "huh",
    "doesnt make sense",
    "what do you mean",
    "not what i asked",
    "im lost",
];

/// Confused caller turns that trigger an offer of a human.
pub const CONFUSION_THRESHOLD: usize = 3;

pub const SUICIDE_SCRIPT: &str = "I'm really glad you told me, and I want you to be safe. \
Please call or text 988, the Suicide and Crisis Lifeline, right now. They're available \
24 hours a day. If you're in immediate danger, please call 911. I'm letting our clinical \
team know so someone can follow up with you.";

pub const EMERGENCY_SCRIPT: &str = "This sounds like an emergency. Please hang up and \
call 911 right now, or go to your nearest emergency room. Your safety matters most.";

pub const SAFETY_SCRIPT: &str = "I'm concerned about your safety, and I'm glad you \
reached out. Please call or text 988 to talk with a trained crisis counselor right away, \
or call 911 if you're in immediate danger. I'm notifying our clinical team so someone \
can follow up with you.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    TransferToCrisisLine,
    ContactEmergencyServices,
    ScheduledCallback,
    OfferHumanTransfer,
    Monitor,
    None,
}

impl EscalationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransferToCrisisLine => "transfer_to_crisis_line",
            Self::ContactEmergencyServices => "contact_emergency_services",
            Self::ScheduledCallback => "scheduled_callback",
            Self::OfferHumanTransfer => "offer_human_transfer",
            Self::Monitor => "monitor",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub priority: Option<Priority>,
    pub action: EscalationAction,
    pub reason: String,
    /// Must be handled before anything else in the turn.
    pub immediate: bool,
    /// Scripted response replacing normal dialogue.
    pub response_override: Option<String>,
    pub monitor_closely: bool,
    pub follow_up_required: bool,
}

impl EscalationDecision {
    pub fn none() -> Self {
        Self {
            escalate: false,
            priority: None,
            action: EscalationAction::None,
            reason: String::new(),
            immediate: false,
            response_override: None,
            monitor_closely: false,
            follow_up_required: false,
        }
    }

    pub fn is_crisis(&self) -> bool {
        self.priority == Some(Priority::Crisis)
    }

    fn crisis(reason: &str, action: EscalationAction, script: &str) -> Self {
        Self {
            escalate: true,
            priority: Some(Priority::Crisis),
            action,
            reason: reason.to_string(),
            immediate: true,
            response_override: Some(script.to_string()),
            monitor_closely: true,
            follow_up_required: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CrisisCoordinator;

impl CrisisCoordinator {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(
        &self,
        transcript: &str,
        history: &[ConversationTurn],
        emotion: EmotionalState,
    ) -> EscalationDecision {
        let normalized = normalize(transcript);

        if matches_any(&normalized, &SUICIDE_PATTERNS) {
            return EscalationDecision::crisis(
                "suicidal ideation expressed",
                EscalationAction::TransferToCrisisLine,
                SUICIDE_SCRIPT,
            );
        }
        if matches_family(&mask_phone_numbers(&normalized), EMERGENCY_WORDS) {
            return EscalationDecision::crisis(
                "emergency reported",
                EscalationAction::ContactEmergencyServices,
                EMERGENCY_SCRIPT,
            );
        }
        if matches_any(&normalized, &SELF_HARM_PATTERNS) {
            return EscalationDecision::crisis(
                "self-harm risk expressed",
                EscalationAction::TransferToCrisisLine,
                SAFETY_SCRIPT,
            );
        }
        if emotion == EmotionalState::Crisis {
            return EscalationDecision::crisis(
                "caller in emotional crisis",
                EscalationAction::TransferToCrisisLine,
                SAFETY_SCRIPT,
            );
        }

        if contains_any(&normalized, COMPLEX_REQUEST_WORDS) {
            return EscalationDecision {
                escalate: true,
                priority: Some(Priority::High),
                action: EscalationAction::ScheduledCallback,
                reason: "complex request needs staff".to_string(),
                immediate: false,
                response_override: None,
                monitor_closely: false,
                follow_up_required: true,
            };
        }

        let confused_turns = history
            .iter()
            .filter(|turn| contains_any(&normalize(&turn.caller_text), CONFUSION_WORDS))
            .count();
        if confused_turns >= CONFUSION_THRESHOLD {
            return EscalationDecision {
                escalate: true,
                priority: Some(Priority::Medium),
                action: EscalationAction::OfferHumanTransfer,
                reason: format!("caller confused on {} turns", confused_turns),
                immediate: false,
                response_override: None,
                monitor_closely: false,
                follow_up_required: false,
            };
        }

        if emotion == EmotionalState::Distressed {
            return EscalationDecision {
                action: EscalationAction::Monitor,
                reason: "caller distressed".to_string(),
                monitor_closely: true,
                ..EscalationDecision::none()
            };
        }

        EscalationDecision::none()
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("invalid crisis pattern"))
        .collect()
}

fn matches_any(normalized: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|re| re.is_match(normalized))
}

fn matches_family(normalized: &str, words: &[&str]) -> bool {
    words.iter().any(|w| contains_loose(normalized, w))
}

/// Drops runs of numeric tokens long enough to be a phone number, so a
/// caller reading "555 911 2345" is not mistaken for dialing 911.
fn mask_phone_numbers(normalized: &str) -> String {
    fn flush<'a>(run: &mut Vec<&'a str>, kept: &mut Vec<&'a str>) {
        let digits: usize = run.iter().map(|t| t.len()).sum();
        if digits < 7 {
            kept.append(run);
        }
        run.clear();
    }

    let mut kept: Vec<&str> = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    for token in normalized.split(' ') {
        if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
            run.push(token);
        } else {
            flush(&mut run, &mut kept);
            kept.push(token);
        }
    }
    flush(&mut run, &mut kept);
    kept.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConversationTurn;

    fn assess(text: &str) -> EscalationDecision {
        CrisisCoordinator::new().assess(text, &[], EmotionalState::Neutral)
    }

    fn turn(caller: &str) -> ConversationTurn {
        ConversationTurn::new(caller, "Let me explain.", None)
    }

    #[test]
    fn suicidal_statement_is_crisis() {
        let decision = assess("I want to kill myself");
        assert!(decision.escalate);
        assert!(decision.immediate);
        assert_eq!(decision.priority, Some(Priority::Crisis));
        assert_eq!(decision.action, EscalationAction::TransferToCrisisLine);
        assert!(decision.response_override.unwrap().contains("988"));
    }

    #[test]
    fn crisis_ignores_prior_state() {
        let history: Vec<_> = (0..5).map(|_| turn("I don't understand")).collect();
        let decision = CrisisCoordinator::new().assess(
            "honestly I've been thinking about suicide",
            &history,
            EmotionalState::Calm,
        );
        assert!(decision.is_crisis());
    }

    #[test]
    fn odd_spacing_still_escalates() {
        assert!(assess("i want to kill-my-self").is_crisis());
        assert!(assess("I'M SUICIDAL!!!").is_crisis());
    }

    #[test]
    fn inflected_and_indirect_suicidal_phrasings_escalate() {
        for text in [
            "I've been thinking about killing myself",
            "I don't want to live anymore",
            "I want to end it all",
            "I'm thinking about ending it all tonight",
            "I no longer want to be alive",
            "honestly I do not want to be alive",
            "sometimes I wish I was dead",
            "I wanna die",
        ] {
            let decision = assess(text);
            assert!(decision.is_crisis(), "expected crisis for {:?}", text);
            assert_eq!(
                decision.response_override.as_deref(),
                Some(SUICIDE_SCRIPT),
                "wrong script for {:?}",
                text
            );
        }
    }

    #[test]
    fn inflected_self_harm_escalates() {
        for text in [
            "I keep hurting myself",
            "I've been cutting my self again",
            "I harmed myself last week",
            "I think I overdosed",
            "I've been self-harming",
        ] {
            assert!(assess(text).is_crisis(), "expected crisis for {:?}", text);
        }
    }

    #[test]
    fn similar_everyday_phrases_do_not_escalate() {
        for text in [
            "I'm killing time until my appointment",
            "can I end the call",
            "I want to live closer to the office",
            "will the session end at noon",
        ] {
            assert!(!assess(text).escalate, "unexpected escalation for {:?}", text);
        }
    }

    #[test]
    fn phone_numbers_containing_911_are_not_emergencies() {
        assert!(!assess("my number is 555 911 2345").escalate);
        assert!(assess("should I call 911").is_crisis());
    }

    #[test]
    fn emergency_uses_emergency_script() {
        let decision = assess("There's an emergency, someone is hurting me");
        assert_eq!(decision.action, EscalationAction::ContactEmergencyServices);
        assert_eq!(decision.response_override.as_deref(), Some(EMERGENCY_SCRIPT));
    }

    #[test]
    fn self_harm_uses_safety_script() {
        let decision = assess("sometimes I hurt myself");
        assert_eq!(decision.response_override.as_deref(), Some(SAFETY_SCRIPT));
    }

    #[test]
    fn emotional_crisis_without_keywords_escalates() {
        let decision =
            CrisisCoordinator::new().assess("I feel so hopeless", &[], EmotionalState::Crisis);
        assert!(decision.is_crisis());
    }

    #[test]
    fn complex_request_is_high_without_override() {
        let decision = assess("I need a prior authorization for my insurance");
        assert_eq!(decision.priority, Some(Priority::High));
        assert_eq!(decision.action, EscalationAction::ScheduledCallback);
        assert!(decision.response_override.is_none());
        assert!(decision.follow_up_required);
    }

    #[test]
    fn repeated_confusion_offers_a_human() {
        let history = vec![turn("huh?"), turn("I'm confused"), turn("what do you mean")];
        let decision =
            CrisisCoordinator::new().assess("okay", &history, EmotionalState::Neutral);
        assert_eq!(decision.priority, Some(Priority::Medium));
        assert_eq!(decision.action, EscalationAction::OfferHumanTransfer);
    }

    #[test]
    fn two_confused_turns_are_not_enough() {
        let history = vec![turn("huh?"), turn("I'm confused")];
        let decision =
            CrisisCoordinator::new().assess("okay", &history, EmotionalState::Neutral);
        assert!(!decision.escalate);
    }

    #[test]
    fn distressed_caller_is_monitored_not_escalated() {
        let decision = CrisisCoordinator::new().assess(
            "I'm having a panic attack, I don't know what to do",
            &[],
            EmotionalState::Distressed,
        );
        assert!(!decision.escalate);
        assert!(decision.monitor_closely);
        assert_eq!(decision.action, EscalationAction::Monitor);
    }

    #[test]
    fn ordinary_question_is_not_escalated() {
        assert_eq!(assess("What are your hours on Friday?"), EscalationDecision::none());
    }
}
