//! New-client intake workflow.
//!
//! One `IntakeFlow` per call walks the caller through eligibility, service
//! type, contact details, insurance and availability. A stage only advances
//! once its fields validate; otherwise the caller is asked again. The record
//! is handed back for persistence only after the caller confirms it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use calmline_types::{IntakeStage, ServiceType};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::extract::{self, Answer, InsuranceAnswer};
use crate::practice::PracticeProfile;
use crate::text::{contains_any, normalize};

/// Youngest client age the practice sees.
pub const MIN_CHILD_AGE: u8 = 10;

const SERVICE_TYPE_PROMPT: &str = "Great. Are you looking for individual therapy, couples \
therapy, family therapy, or therapy for a child?";

const PUBLIC_PLAN_ENDING: &str = "I'm sorry, we're not able to accept Medicaid or Medicare. \
I'd recommend contacting your plan for a list of in-network providers. Thank you for calling, \
and take care.";

const IN_PERSON_ENDING: &str = "I'm sorry, our sessions are only offered by secure video, so we \
wouldn't be a good fit for in-person care. Your insurance or primary care doctor can refer you \
to a local office. Thank you for calling, and take care.";

const CHILD_AGE_ENDING: &str = "Thank you for letting me know. Our clinicians work with \
children ages 10 and up, so we wouldn't be the right fit. Your pediatrician can recommend a \
child specialist. Take care.";

const DECLINED_ENDING: &str = "I understand. If anything changes, please give us a call. \
Take care.";

const COUPLES_WORDS: &[&str] = &[
    "couples",
    "couple",
    "marriage",
    "marital",
    "partner",
    "spouse",
    "husband",
    "wife",
    "relationship",
];

const CHILD_WORDS: &[&str] = &[
    "child",
    "my son",
    "my daughter",
    "kid",
    "teen",
    "teenager",
    "adolescent",
    "for my son",
    "for my daughter",
];

const FAMILY_WORDS: &[&str] = &["family", "whole family", "family therapy"];

const INDIVIDUAL_WORDS: &[&str] = &[
    "individual",
    "myself",
    "just me",
    "for me",
    "only me",
    "one on one",
];

/// Details collected during intake. Fields stay `None` until validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub state: Option<String>,
    pub service_type: Option<ServiceType>,
    pub insurance: Option<String>,
    pub availability: Option<String>,
    pub partner_name: Option<String>,
    pub child_name: Option<String>,
    pub child_age: Option<u8>,
}

impl IntakeRecord {
    fn missing_contact_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.full_name.is_none() {
            missing.push("your full name");
        }
        if self.phone.is_none() {
            missing.push("a phone number");
        }
        if self.email.is_none() {
            missing.push("your email address");
        }
        if self.state.is_none() {
            missing.push("the state you live in");
        }
        missing
    }

    fn additional_info_complete(&self) -> bool {
        match self.service_type {
            Some(ServiceType::Couples) => self.partner_name.is_some(),
            Some(ServiceType::Child) => self.child_name.is_some() && self.child_age.is_some(),
            _ => true,
        }
    }

    /// Clears everything collected from contact details onward.
    fn reset_from_contact(&mut self) {
        *self = Self {
            service_type: self.service_type,
            ..Self::default()
        };
    }

    /// True once every field required for the service type is present.
    pub fn is_complete(&self) -> bool {
        self.missing_contact_fields().is_empty()
            && self.service_type.is_some()
            && self.insurance.is_some()
            && self.availability.is_some()
            && self.additional_info_complete()
    }

    fn restatement(&self) -> String {
        let mut text = format!(
            "Let me make sure I have everything right. Your name is {}, your phone number is {}, \
             your email is {}, and you live in {}.",
            self.full_name.as_deref().unwrap_or("not given"),
            self.phone.as_deref().unwrap_or("not given"),
            self.email.as_deref().unwrap_or("not given"),
            self.state.as_deref().unwrap_or("not given"),
        );
        if let Some(service) = self.service_type {
            text.push_str(&format!(" You're looking for {}", service.spoken()));
            match service {
                ServiceType::Couples => {
                    if let Some(partner) = &self.partner_name {
                        text.push_str(&format!(" with {}", partner));
                    }
                }
                ServiceType::Child => {
                    if let (Some(name), Some(age)) = (&self.child_name, self.child_age) {
                        text.push_str(&format!(", {}, age {}", name, age));
                    }
                }
                _ => {}
            }
            text.push('.');
        }
        text.push_str(&format!(
            " Insurance: {}. Availability: {}. Is all of that correct?",
            self.insurance.as_deref().unwrap_or("not given"),
            self.availability.as_deref().unwrap_or("not given"),
        ));
        text
    }
}

/// How a turn left the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    InProgress,
    /// Caller confirmed; the record is ready to persist.
    Completed(IntakeRecord),
    /// Caller is not eligible or declined.
    Ended { reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeReply {
    pub text: String,
    pub stage: IntakeStage,
    pub outcome: IntakeOutcome,
}

#[derive(Debug)]
pub struct IntakeFlow {
    call_id: String,
    stage: IntakeStage,
    record: IntakeRecord,
    caller_phone: Option<String>,
    last_activity: Instant,
}

impl IntakeFlow {
    pub fn new(call_id: impl Into<String>, caller_phone: Option<String>) -> Self {
        Self {
            call_id: call_id.into(),
            stage: IntakeStage::Greeting,
            record: IntakeRecord::default(),
            caller_phone,
            last_activity: Instant::now(),
        }
    }

    pub fn stage(&self) -> IntakeStage {
        self.stage
    }

    pub fn record(&self) -> &IntakeRecord {
        &self.record
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Opens the flow by reading the eligibility disclaimer.
    pub fn start(&mut self, practice: &PracticeProfile) -> IntakeReply {
        self.last_activity = Instant::now();
        self.stage = IntakeStage::Disclaimer;
        self.reply(practice.disclaimer())
    }

    /// Handles one caller utterance at the current stage.
    pub fn handle(&mut self, text: &str, practice: &PracticeProfile) -> IntakeReply {
        self.last_activity = Instant::now();
        let reply = match self.stage {
            IntakeStage::Greeting => self.start(practice),
            IntakeStage::Disclaimer => self.on_disclaimer(text, practice),
            IntakeStage::ServiceType => self.on_service_type(text),
            IntakeStage::ContactInfo => self.on_contact_info(text),
            IntakeStage::AdditionalInfo => self.on_additional_info(text),
            IntakeStage::InsuranceInfo => self.on_insurance(text),
            IntakeStage::Availability => self.on_availability(text),
            IntakeStage::Confirmation => self.on_confirmation(text),
            IntakeStage::Completion | IntakeStage::Ended => self.reply(
                "Is there anything else I can help you with today?".to_string(),
            ),
        };
        tracing::debug!(
            call_id = %self.call_id,
            stage = self.stage.as_str(),
            "intake turn handled"
        );
        reply
    }

    fn reply(&self, text: String) -> IntakeReply {
        IntakeReply {
            text,
            stage: self.stage,
            outcome: IntakeOutcome::InProgress,
        }
    }

    fn end(&mut self, text: &str, reason: &'static str) -> IntakeReply {
        self.stage = IntakeStage::Ended;
        tracing::info!(call_id = %self.call_id, reason, "intake ended");
        IntakeReply {
            text: text.to_string(),
            stage: self.stage,
            outcome: IntakeOutcome::Ended { reason },
        }
    }

    fn on_disclaimer(&mut self, text: &str, practice: &PracticeProfile) -> IntakeReply {
        if extract::mentions_public_plan(text) {
            return self.end(PUBLIC_PLAN_ENDING, "public insurance only");
        }
        if extract::wants_in_person_only(text) {
            return self.end(IN_PERSON_ENDING, "in-person care requested");
        }
        let normalized = normalize(text);
        if contains_any(&normalized, CHILD_WORDS) {
            if let Some(age) = extract::extract_age(text).filter(|age| *age < MIN_CHILD_AGE) {
                tracing::debug!(call_id = %self.call_id, age, "child below minimum age");
                return self.end(CHILD_AGE_ENDING, "child under minimum age");
            }
        }

        match extract::yes_no(text) {
            Answer::Yes => {
                if let Some(service) = detect_service_type(text) {
                    self.record.service_type = Some(service);
                    self.stage = IntakeStage::ContactInfo;
                    return self.reply(contact_prompt());
                }
                self.stage = IntakeStage::ServiceType;
                self.reply(SERVICE_TYPE_PROMPT.to_string())
            }
            Answer::No => self.end(DECLINED_ENDING, "declined disclaimer"),
            Answer::Unclear => self.reply(format!(
                "Sorry, I want to make sure. {}",
                practice.disclaimer()
            )),
        }
    }

    fn on_service_type(&mut self, text: &str) -> IntakeReply {
        match detect_service_type(text) {
            Some(service) => {
                self.record.service_type = Some(service);
                self.stage = IntakeStage::ContactInfo;
                self.reply(contact_prompt())
            }
            None => self.reply(
                "Sorry, I didn't catch that. Is this for individual therapy, couples therapy, \
                 family therapy, or for a child?"
                    .to_string(),
            ),
        }
    }

    fn on_contact_info(&mut self, text: &str) -> IntakeReply {
        let before = self.record.clone();
        if self.record.phone.is_none() {
            self.record.phone = extract::extract_phone(text, self.caller_phone.as_deref());
        }
        if self.record.email.is_none() {
            self.record.email = extract::extract_email(text);
        }
        if self.record.state.is_none() {
            self.record.state = extract::extract_state(text);
        }
        if self.record.full_name.is_none() {
            self.record.full_name = extract::extract_name(text).or_else(|| {
                // A bare name only counts when nothing else was said.
                (self.record == before)
                    .then(|| extract::bare_name(text))
                    .flatten()
            });
        }

        let missing = self.record.missing_contact_fields();
        if !missing.is_empty() {
            let lead = if self.record == before {
                "Sorry, I didn't quite get that."
            } else {
                "Thank you."
            };
            return self.reply(format!("{} Could I also get {}?", lead, join_fields(&missing)));
        }

        match self.record.service_type {
            Some(ServiceType::Couples) => {
                self.stage = IntakeStage::AdditionalInfo;
                self.reply("Thank you. What is your partner's name?".to_string())
            }
            Some(ServiceType::Child) => {
                self.stage = IntakeStage::AdditionalInfo;
                self.reply("Thank you. What is your child's name, and how old are they?".to_string())
            }
            _ => {
                self.stage = IntakeStage::InsuranceInfo;
                self.reply(insurance_prompt())
            }
        }
    }

    fn on_additional_info(&mut self, text: &str) -> IntakeReply {
        match self.record.service_type {
            Some(ServiceType::Couples) => {
                if self.record.partner_name.is_none() {
                    self.record.partner_name = extract::extract_partner_name(text);
                }
                if self.record.partner_name.is_none() {
                    return self.reply("Sorry, could you tell me your partner's name?".to_string());
                }
            }
            Some(ServiceType::Child) => {
                if self.record.child_age.is_none() {
                    self.record.child_age = extract::extract_age(text);
                }
                if let Some(age) = self.record.child_age.filter(|age| *age < MIN_CHILD_AGE) {
                    tracing::debug!(call_id = %self.call_id, age, "child below minimum age");
                    return self.end(CHILD_AGE_ENDING, "child under minimum age");
                }
                if self.record.child_name.is_none() {
                    self.record.child_name = extract::extract_child_name(text);
                }
                match (&self.record.child_name, self.record.child_age) {
                    (None, None) => {
                        return self.reply(
                            "Sorry, could you tell me your child's name and age?".to_string(),
                        )
                    }
                    (None, Some(_)) => {
                        return self.reply("And what is your child's name?".to_string())
                    }
                    (Some(_), None) => {
                        return self.reply("And how old is your child?".to_string())
                    }
                    (Some(_), Some(_)) => {}
                }
            }
            _ => {}
        }
        self.stage = IntakeStage::InsuranceInfo;
        self.reply(insurance_prompt())
    }

    fn on_insurance(&mut self, text: &str) -> IntakeReply {
        match extract::extract_insurance(text) {
            Some(InsuranceAnswer::Carrier(name)) => self.record.insurance = Some(name),
            Some(InsuranceAnswer::SelfPay) => self.record.insurance = Some("Self-pay".to_string()),
            Some(InsuranceAnswer::PublicPlan) => {
                return self.reply(
                    "Unfortunately we can't accept Medicaid or Medicare. Do you have another \
                     insurance plan, or would you like to pay out of pocket?"
                        .to_string(),
                )
            }
            None => {
                return self.reply(
                    "Sorry, who is your insurance provider? You can also say self-pay."
                        .to_string(),
                )
            }
        }
        self.stage = IntakeStage::Availability;
        self.reply(
            "Got it. What days and times generally work best for you for sessions?".to_string(),
        )
    }

    fn on_availability(&mut self, text: &str) -> IntakeReply {
        match extract::extract_availability(text) {
            Some(availability) => {
                self.record.availability = Some(availability);
                self.stage = IntakeStage::Confirmation;
                self.reply(self.record.restatement())
            }
            None => self.reply(
                "Which days of the week, and mornings, afternoons or evenings, work best for you?"
                    .to_string(),
            ),
        }
    }

    fn on_confirmation(&mut self, text: &str) -> IntakeReply {
        if extract::yes_no(text) == Answer::Yes && self.record.is_complete() {
            self.stage = IntakeStage::Completion;
            let first_name = self
                .record
                .full_name
                .as_deref()
                .and_then(|name| name.split_whitespace().next())
                .unwrap_or("");
            tracing::info!(call_id = %self.call_id, "intake confirmed");
            return IntakeReply {
                text: format!(
                    "Thank you{}{}! I've passed your information to our intake team, and someone \
                     will reach out within one business day to schedule your first session. Is \
                     there anything else I can help you with?",
                    if first_name.is_empty() { "" } else { ", " },
                    first_name
                ),
                stage: self.stage,
                outcome: IntakeOutcome::Completed(self.record.clone()),
            };
        }

        self.record.reset_from_contact();
        self.stage = IntakeStage::ContactInfo;
        self.reply(
            "No problem, let's go over your details again. Could you tell me your full name, \
             phone number, email address, and the state you live in?"
                .to_string(),
        )
    }
}

fn detect_service_type(text: &str) -> Option<ServiceType> {
    let normalized = normalize(text);
    if contains_any(&normalized, COUPLES_WORDS) {
        Some(ServiceType::Couples)
    } else if contains_any(&normalized, CHILD_WORDS) {
        Some(ServiceType::Child)
    } else if contains_any(&normalized, FAMILY_WORDS) {
        Some(ServiceType::Family)
    } else if contains_any(&normalized, INDIVIDUAL_WORDS) {
        Some(ServiceType::Individual)
    } else {
        None
    }
}

fn contact_prompt() -> String {
    "Perfect. Could I get your full name, the best phone number to reach you, your email \
     address, and the state you live in?"
        .to_string()
}

fn insurance_prompt() -> String {
    "Who is your insurance provider? If you plan to pay out of pocket, just say self-pay."
        .to_string()
}

fn join_fields(fields: &[&str]) -> String {
    match fields {
        [] => String::new(),
        [one] => (*one).to_string(),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

/// Active intake flows keyed by call id.
#[derive(Clone, Default)]
pub struct IntakeFlowTable {
    flows: Arc<DashMap<String, Arc<Mutex<IntakeFlow>>>>,
}

impl IntakeFlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a flow for `call_id` unless one is already active.
    ///
    /// Returns `None` when a flow exists, so two racing turns cannot both
    /// start one.
    pub fn create(
        &self,
        call_id: &str,
        caller_phone: Option<String>,
    ) -> Option<Arc<Mutex<IntakeFlow>>> {
        match self.flows.entry(call_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let flow = Arc::new(Mutex::new(IntakeFlow::new(call_id, caller_phone)));
                slot.insert(Arc::clone(&flow));
                Some(flow)
            }
        }
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<Mutex<IntakeFlow>>> {
        self.flows.get(call_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, call_id: &str) -> bool {
        self.flows.remove(call_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Removes flows idle for at least `max_idle`. Flows in the middle of a
    /// turn are locked and skipped.
    pub fn purge_idle(&self, max_idle: Duration) -> usize {
        let before = self.flows.len();
        self.flows.retain(|call_id, flow| match flow.try_lock() {
            Ok(flow) if flow.idle_for() >= max_idle => {
                tracing::debug!(call_id = %call_id, "purging idle intake flow");
                false
            }
            _ => true,
        });
        before.saturating_sub(self.flows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn practice() -> PracticeProfile {
        PracticeProfile {
            telehealth_states: vec!["New Jersey".into(), "New York".into()],
            ..PracticeProfile::generic("t1")
        }
    }

    fn flow_at_disclaimer() -> IntakeFlow {
        let mut flow = IntakeFlow::new("CA1", Some("+15557654321".to_string()));
        let reply = flow.start(&practice());
        assert_eq!(reply.stage, IntakeStage::Disclaimer);
        flow
    }

    fn say(flow: &mut IntakeFlow, text: &str) -> IntakeReply {
        flow.handle(text, &practice())
    }

    #[test]
    fn start_reads_disclaimer() {
        let mut flow = IntakeFlow::new("CA1", None);
        let reply = flow.start(&practice());
        assert_eq!(reply.text, practice().disclaimer());
        assert_eq!(flow.stage(), IntakeStage::Disclaimer);
    }

    #[test]
    fn agreement_moves_to_service_type() {
        let mut flow = flow_at_disclaimer();
        let reply = say(&mut flow, "yes that works");
        assert_eq!(reply.stage, IntakeStage::ServiceType);
        assert!(reply.text.contains("individual therapy"));
    }

    #[test]
    fn medicaid_only_ends_the_flow() {
        let mut flow = flow_at_disclaimer();
        let reply = say(&mut flow, "I only have Medicaid, is that okay?");
        assert_eq!(reply.stage, IntakeStage::Ended);
        assert_eq!(
            reply.outcome,
            IntakeOutcome::Ended {
                reason: "public insurance only"
            }
        );
    }

    #[test]
    fn in_person_request_ends_the_flow() {
        let mut flow = flow_at_disclaimer();
        assert_eq!(
            say(&mut flow, "no, it has to be in person").stage,
            IntakeStage::Ended
        );
    }

    #[test]
    fn young_child_ends_the_flow_at_disclaimer() {
        let mut flow = flow_at_disclaimer();
        let reply = say(&mut flow, "it's for my son, he is seven");
        assert_eq!(reply.stage, IntakeStage::Ended);
    }

    #[test]
    fn unclear_disclaimer_answer_reprompts() {
        let mut flow = flow_at_disclaimer();
        let reply = say(&mut flow, "hmm what");
        assert_eq!(reply.stage, IntakeStage::Disclaimer);
        assert!(reply.text.contains("Does that work for you?"));
    }

    #[test]
    fn contact_info_accumulates_across_turns() {
        let mut flow = flow_at_disclaimer();
        say(&mut flow, "yes");
        say(&mut flow, "just for myself");
        assert_eq!(flow.stage(), IntakeStage::ContactInfo);

        let reply = say(&mut flow, "My name is Jane Doe and I live in New Jersey");
        assert_eq!(reply.stage, IntakeStage::ContactInfo);
        assert!(reply.text.contains("a phone number"));
        assert!(reply.text.contains("your email address"));
        assert!(!reply.text.contains("your full name"));

        let reply = say(&mut flow, "use this number, and jane at example dot com");
        assert_eq!(reply.stage, IntakeStage::InsuranceInfo);
        let record = flow.record();
        assert_eq!(record.full_name.as_deref(), Some("Jane Doe"));
        assert_eq!(record.phone.as_deref(), Some("(555) 765-4321"));
        assert_eq!(record.email.as_deref(), Some("jane@example.com"));
        assert_eq!(record.state.as_deref(), Some("New Jersey"));
    }

    #[test]
    fn couples_collects_partner_name() {
        let mut flow = flow_at_disclaimer();
        say(&mut flow, "yes");
        say(&mut flow, "couples counseling for me and my wife");
        let reply = say(
            &mut flow,
            "my name is Sam Lee, 555-123-4567, sam@example.com, New York",
        );
        assert_eq!(reply.stage, IntakeStage::AdditionalInfo);
        let reply = say(&mut flow, "her name is Alex");
        assert_eq!(reply.stage, IntakeStage::InsuranceInfo);
        assert_eq!(flow.record().partner_name.as_deref(), Some("Alex"));
    }

    #[test]
    fn child_under_ten_ends_at_additional_info() {
        let mut flow = flow_at_disclaimer();
        say(&mut flow, "yes");
        say(&mut flow, "it's for my daughter");
        say(
            &mut flow,
            "my name is Pat Kim, 555-123-4567, pat@example.com, New Jersey",
        );
        let reply = say(&mut flow, "her name is Mia and she is eight");
        assert_eq!(reply.stage, IntakeStage::Ended);
    }

    #[test]
    fn public_plan_at_insurance_reprompts() {
        let mut flow = flow_at_disclaimer();
        say(&mut flow, "yes");
        say(&mut flow, "individual");
        say(
            &mut flow,
            "my name is Jo Park, 555-123-4567, jo@example.com, New York",
        );
        let reply = say(&mut flow, "medicare");
        assert_eq!(reply.stage, IntakeStage::InsuranceInfo);
        let reply = say(&mut flow, "Aetna");
        assert_eq!(reply.stage, IntakeStage::Availability);
    }

    #[test]
    fn purge_skips_busy_flows() {
        let table = IntakeFlowTable::new();
        let busy = table.create("CA1", None).expect("created");
        table.create("CA2", None).expect("created");
        assert!(table.create("CA1", None).is_none(), "one flow per call");

        let _guard = busy.try_lock().expect("lock");
        assert_eq!(table.purge_idle(Duration::ZERO), 1);
        assert!(table.get("CA1").is_some());
        assert!(table.get("CA2").is_none());
    }
}
