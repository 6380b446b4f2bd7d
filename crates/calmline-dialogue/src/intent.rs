//! Keyword intent classification.

use serde::{Deserialize, Serialize};

use crate::text::{count_matches, normalize};

/// Below this confidence the classifier reports no intent.
pub const MIN_CONFIDENCE: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    NewAppointment,
    AppointmentChange,
    Billing,
    CareManagement,
    ProviderAvailability,
    Insurance,
    Hours,
    Location,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewAppointment => "new_appointment",
            Self::AppointmentChange => "appointment_change",
            Self::Billing => "billing",
            Self::CareManagement => "care_management",
            Self::ProviderAvailability => "provider_availability",
            Self::Insurance => "insurance",
            Self::Hours => "hours",
            Self::Location => "location",
        }
    }
}

/// A classification result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentMatch {
    pub intent: Intent,
    /// Share of all keyword hits that went to the winning intent.
    pub confidence: f32,
    /// Keyword hits for the winning intent.
    pub score: usize,
}

pub trait IntentClassifier: Send + Sync {
    /// Classifies one caller utterance. `None` means no confident intent.
    fn classify(&self, text: &str) -> Option<IntentMatch>;
}

const NEW_APPOINTMENT: &[&str] = &[
    "schedule",
    "first appointment",
    "new client",
    "new patient",
    "book an appointment",
    "make an appointment",
    "get started",
    "start therapy",
    "start counseling",
    "intake",
    "set up an appointment",
    "looking for a therapist",
];

const APPOINTMENT_CHANGE: &[&str] = &[
    "reschedule",
    "cancel",
    "change my appointment",
    "move my appointment",
    "running late",
    "existing appointment",
    "my next appointment",
];

const BILLING: &[&str] = &[
    "bill",
    "billing",
    "invoice",
    "payment",
    "charge",
    "charged",
    "copay",
    "balance",
    "refund",
    "statement",
];

const CARE_MANAGEMENT: &[&str] = &[
    "case manager",
    "care manager",
    "care management",
    "referral",
    "refer",
    "psychiatrist",
    "hospital",
    "discharge",
    "higher level of care",
    "intensive outpatient",
];

const PROVIDER_AVAILABILITY: &[&str] = &[
    "accepting new clients",
    "therapist available",
    "therapists available",
    "counselor available",
    "which therapists",
    "who is available",
    "specific therapist",
    "availability",
];

const INSURANCE: &[&str] = &[
    "insurance",
    "in network",
    "out of network",
    "accept my",
    "aetna",
    "blue cross",
    "cigna",
    "united healthcare",
    "self pay",
    "sliding scale",
];

const HOURS: &[&str] = &[
    "hours",
    "what time",
    "open",
    "closed",
    "weekend",
    "saturday",
    "sunday",
    "evening",
];

const LOCATION: &[&str] = &[
    "address",
    "location",
    "located",
    "where are you",
    "directions",
    "parking",
    "office",
    "telehealth",
    "virtual",
    "online",
];

/// Scores each intent by the number of its keywords present in the text.
///
/// Confidence is the winner's hits divided by all hits. Ties go to the
/// intent listed first.
pub struct KeywordIntentClassifier {
    table: Vec<(Intent, &'static [&'static str])>,
    min_confidence: f32,
}

impl Default for KeywordIntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self {
            table: vec![
                (Intent::NewAppointment, NEW_APPOINTMENT),
                (Intent::AppointmentChange, APPOINTMENT_CHANGE),
                (Intent::Billing, BILLING),
                (Intent::CareManagement, CARE_MANAGEMENT),
                (Intent::ProviderAvailability, PROVIDER_AVAILABILITY),
                (Intent::Insurance, INSURANCE),
                (Intent::Hours, HOURS),
                (Intent::Location, LOCATION),
            ],
            min_confidence: MIN_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> Option<IntentMatch> {
        let normalized = normalize(text);
        let mut total = 0usize;
        let mut best: Option<(Intent, usize)> = None;

        for (intent, keywords) in &self.table {
            let score = count_matches(&normalized, keywords);
            total += score;
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((*intent, score));
            }
        }

        let (intent, score) = best?;
        let confidence = score as f32 / total as f32;
        if confidence < self.min_confidence {
            tracing::debug!(
                intent = intent.as_str(),
                confidence,
                "intent below confidence threshold"
            );
            return None;
        }
        Some(IntentMatch {
            intent,
            confidence,
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Option<IntentMatch> {
        KeywordIntentClassifier::new().classify(text)
    }

    #[test]
    fn first_appointment_is_new_appointment() {
        let result = classify("I want to schedule my first appointment").unwrap();
        assert_eq!(result.intent, Intent::NewAppointment);
        assert_eq!(result.score, 2);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn reschedule_is_not_new_appointment() {
        let result = classify("I need to reschedule my appointment").unwrap();
        assert_eq!(result.intent, Intent::AppointmentChange);
    }

    #[test]
    fn billing_question() {
        let result = classify("I have a question about a charge on my bill").unwrap();
        assert_eq!(result.intent, Intent::Billing);
    }

    #[test]
    fn split_signals_fall_below_threshold() {
        // One billing hit and one insurance hit: 0.5 confidence.
        assert_eq!(classify("does my insurance cover the copay"), None);
    }

    #[test]
    fn no_keywords_means_no_intent() {
        assert_eq!(classify("hello, is anyone there?"), None);
    }

    #[test]
    fn threshold_is_configurable() {
        let classifier = KeywordIntentClassifier::new().with_min_confidence(0.5);
        let result = classifier.classify("does my insurance cover the copay").unwrap();
        assert_eq!(result.intent, Intent::Billing);
        assert_eq!(result.confidence, 0.5);
    }
}
