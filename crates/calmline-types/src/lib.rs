//! Shared types for the Calmline call engine.
//!
//! This crate provides the small value types that cross crate boundaries:
//! escalation priorities, notification urgencies and types, caller
//! emotional states, intake stages and service types, and the voice tuning
//! parameters passed from the dialogue layer to speech synthesis.
//!
//! Nothing in here performs I/O. Keeping these definitions in one leaf
//! crate keeps the dependency graph acyclic.

use serde::{Deserialize, Serialize};

pub mod voice;

/// Escalation priority attached to an escalation decision or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Life-safety situation. Always short-circuits normal dialogue.
    Crisis,
    /// Complex request that needs a staff callback.
    High,
    /// Caller would likely be better served by a human.
    Medium,
}

impl Priority {
    /// Returns the canonical label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crisis => "CRISIS",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
        }
    }

    /// Maps an escalation priority onto the notification urgency scale.
    pub fn urgency(self) -> Urgency {
        match self {
            Self::Crisis => Urgency::Critical,
            Self::High => Urgency::High,
            Self::Medium => Urgency::Medium,
        }
    }
}

/// Urgency of a staff notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    /// SMS is reserved for messages somebody must see right away.
    pub fn allows_sms(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

/// The kind of staff notification, used as the routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Crisis,
    Billing,
    AppointmentChange,
    CareManagement,
    NewIntake,
    Callback,
    General,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crisis => "crisis",
            Self::Billing => "billing",
            Self::AppointmentChange => "appointment_change",
            Self::CareManagement => "care_management",
            Self::NewIntake => "new_intake",
            Self::Callback => "callback",
            Self::General => "general",
        }
    }

    /// Human-readable label used in notification subjects.
    pub fn label(self) -> &'static str {
        match self {
            Self::Crisis => "Crisis call",
            Self::Billing => "Billing question",
            Self::AppointmentChange => "Appointment change",
            Self::CareManagement => "Care management referral",
            Self::NewIntake => "New client intake",
            Self::Callback => "Callback requested",
            Self::General => "Message from caller",
        }
    }

    /// All notification types, in routing-table order.
    pub fn all() -> [Self; 7] {
        [
            Self::Crisis,
            Self::Billing,
            Self::AppointmentChange,
            Self::CareManagement,
            Self::NewIntake,
            Self::Callback,
            Self::General,
        ]
    }
}

impl std::str::FromStr for NotificationType {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}

/// Error returned when a stored label does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLabel(pub String);

impl std::fmt::Display for UnknownLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown label: {}", self.0)
    }
}

impl std::error::Error for UnknownLabel {}

/// Caller emotional state as inferred from the current utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmotionalState {
    Calm,
    #[default]
    Neutral,
    Anxious,
    Frustrated,
    Distressed,
    Crisis,
}

impl EmotionalState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calm => "CALM",
            Self::Neutral => "NEUTRAL",
            Self::Anxious => "ANXIOUS",
            Self::Frustrated => "FRUSTRATED",
            Self::Distressed => "DISTRESSED",
            Self::Crisis => "CRISIS",
        }
    }
}

/// Type of counseling service a new client is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Individual,
    Couples,
    Child,
    Family,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Couples => "couples",
            Self::Child => "child",
            Self::Family => "family",
        }
    }

    /// Couples and child services collect partner or child details.
    pub fn needs_additional_info(self) -> bool {
        matches!(self, Self::Couples | Self::Child)
    }

    /// Phrase used when restating the record to the caller.
    pub fn spoken(self) -> &'static str {
        match self {
            Self::Individual => "individual therapy",
            Self::Couples => "couples therapy",
            Self::Child => "therapy for your child",
            Self::Family => "family therapy",
        }
    }
}

/// Stages of the new-client intake workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStage {
    #[default]
    Greeting,
    Disclaimer,
    ServiceType,
    ContactInfo,
    AdditionalInfo,
    InsuranceInfo,
    Availability,
    Confirmation,
    Completion,
    /// Caller was disqualified; no record is kept.
    Ended,
}

impl IntakeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Disclaimer => "disclaimer",
            Self::ServiceType => "service_type",
            Self::ContactInfo => "contact_info",
            Self::AdditionalInfo => "additional_info",
            Self::InsuranceInfo => "insurance_info",
            Self::Availability => "availability",
            Self::Confirmation => "confirmation",
            Self::Completion => "completion",
            Self::Ended => "ended",
        }
    }

    /// Whether the flow has reached a terminal stage.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completion | Self::Ended)
    }
}

/// What the system knows about the person on the line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    /// Caller ID as reported by the telephony transport.
    pub phone: Option<String>,
    /// Name, once the caller has given one.
    pub name: Option<String>,
}

impl CallerInfo {
    /// One-line description for notification bodies.
    pub fn summary(&self) -> String {
        match (&self.name, &self.phone) {
            (Some(name), Some(phone)) => format!("{} ({})", name, phone),
            (Some(name), None) => name.clone(),
            (None, Some(phone)) => phone.clone(),
            (None, None) => "Unknown caller".to_string(),
        }
    }
}

/// Voice tuning applied by speech synthesis for a single response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceAdjustments {
    /// Speaking-rate multiplier (1.0 is normal).
    pub speed: f32,
    /// Voice stability, 0.0 (expressive) to 1.0 (steady).
    pub stability: f32,
}

impl Default for VoiceAdjustments {
    fn default() -> Self {
        Self {
            speed: 1.0,
            stability: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_type_labels_parse_back() {
        for kind in NotificationType::all() {
            assert_eq!(kind.as_str().parse::<NotificationType>(), Ok(kind));
        }
        assert!("fax".parse::<NotificationType>().is_err());
    }

    #[test]
    fn only_urgent_messages_allow_sms() {
        assert!(Urgency::Critical.allows_sms());
        assert!(Urgency::High.allows_sms());
        assert!(!Urgency::Medium.allows_sms());
        assert!(!Urgency::Low.allows_sms());
    }

    #[test]
    fn crisis_priority_maps_to_critical_urgency() {
        assert_eq!(Priority::Crisis.urgency(), Urgency::Critical);
        assert_eq!(Priority::Medium.urgency(), Urgency::Medium);
    }

    #[test]
    fn additional_info_only_for_couples_and_child() {
        assert!(ServiceType::Couples.needs_additional_info());
        assert!(ServiceType::Child.needs_additional_info());
        assert!(!ServiceType::Individual.needs_additional_info());
        assert!(!ServiceType::Family.needs_additional_info());
    }

    #[test]
    fn caller_summary_prefers_name_and_phone() {
        let caller = CallerInfo {
            phone: Some("+15551234567".to_string()),
            name: Some("Dana".to_string()),
        };
        assert_eq!(caller.summary(), "Dana (+15551234567)");
        assert_eq!(CallerInfo::default().summary(), "Unknown caller");
    }

    #[test]
    fn enums_serialize_to_stored_labels() {
        assert_eq!(
            serde_json::to_value(Priority::Crisis).unwrap(),
            serde_json::json!("CRISIS")
        );
        assert_eq!(
            serde_json::to_value(IntakeStage::ContactInfo).unwrap(),
            serde_json::json!("contact_info")
        );
        assert_eq!(
            serde_json::to_value(EmotionalState::Distressed).unwrap(),
            serde_json::json!("DISTRESSED")
        );
    }
}
