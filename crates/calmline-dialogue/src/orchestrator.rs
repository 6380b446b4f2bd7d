//! Per-turn dialogue routing.
//!
//! Each final utterance is handled in strict precedence: crisis, active
//! intake, intent classification, fixed handlers, new intake, knowledge
//! base, and finally generation. Whatever happens, the caller gets a
//! response; provider and store failures degrade to scripted text.

use std::sync::Arc;
use std::time::Duration;

use calmline_notify::{NotificationRequest, Notifier};
use calmline_types::{
    CallerInfo, EmotionalState, IntakeStage, NotificationType, Priority, Urgency,
    VoiceAdjustments,
};

use crate::context::{CallContext, ConversationTurn};
use crate::crisis::{CrisisCoordinator, EscalationDecision};
use crate::emotion::{adjustments_for, with_prefix, EmotionAnalysis, EmotionAnalyzer};
use crate::generation::{GenerationRequest, LanguageModel};
use crate::intake::{IntakeFlowTable, IntakeOutcome, IntakeRecord};
use crate::intent::{Intent, IntentClassifier, KeywordIntentClassifier};
use crate::knowledge::KnowledgeCache;
use crate::practice::{PracticeDirectory, PracticeProfile};
use crate::store::{DialogueStore, EscalationEvent, TurnRecord};
use crate::text::{contains_any, normalize};

/// Generated answers shorter than this are treated as non-answers.
const MIN_GENERATED_CHARS: usize = 20;

const DONT_KNOW_MARKERS: &[&str] = &[
    "dont know",
    "do not know",
    "not sure",
    "dont have that information",
    "do not have that information",
    "unable to answer",
];

const HUMAN_REQUEST_WORDS: &[&str] = &[
    "speak to someone",
    "talk to someone",
    "speak to a person",
    "talk to a person",
    "real person",
    "human",
    "call me back",
    "speak with someone",
];

pub const MESSAGE_TAKING_SCRIPT: &str = "I'm not sure I have the answer to that, but I'd be \
glad to pass your question along. I've noted your message, and a member of our staff will \
call you back as soon as possible.";

const HUMAN_OFFER: &str = " If you'd prefer, I can have a member of our staff call you back.";

const BILLING_RESPONSE: &str = "I can help get your billing question to the right person. \
I've let our billing team know, and they'll call you back within one business day.";

const APPOINTMENT_CHANGE_RESPONSE: &str = "I've passed your request along to our scheduling \
team, and someone will call you back to confirm the change.";

const CARE_MANAGEMENT_RESPONSE: &str = "Thank you. I've notified our care coordination team, \
and someone will reach out to you shortly.";

const PROVIDER_AVAILABILITY_RESPONSE: &str = "Our clinicians' schedules change week to week, \
so our intake team matches each new client with a therapist who has openings that fit their \
availability. Would you like to get started as a new client?";

const HUMAN_REQUEST_RESPONSE: &str = "Of course. I've asked a member of our staff to call you \
back as soon as they're available.";

/// Which branch produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Crisis,
    Intake,
    FixedHandler,
    Knowledge,
    Generated,
    MessageTaking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnResponse {
    pub response_text: String,
    pub intent: Option<Intent>,
    pub confidence: f32,
    pub emotional_state: EmotionalState,
    pub voice_adjustments: VoiceAdjustments,
    pub escalation: EscalationDecision,
    pub monitor_closely: bool,
    pub intake_stage: Option<IntakeStage>,
    pub source: ResponseSource,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub generation_timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Bound on the crisis event write before the response is returned.
    pub crisis_log_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(10),
            max_tokens: 150,
            temperature: 0.7,
            crisis_log_timeout: Duration::from_secs(2),
        }
    }
}

/// Intermediate result before metadata is attached.
struct Routed {
    text: String,
    intent: Option<Intent>,
    confidence: f32,
    intake_stage: Option<IntakeStage>,
    source: ResponseSource,
}

pub struct DialogueOrchestrator {
    classifier: Arc<dyn IntentClassifier>,
    emotion: EmotionAnalyzer,
    crisis: CrisisCoordinator,
    intake: IntakeFlowTable,
    knowledge: KnowledgeCache,
    practices: PracticeDirectory,
    model: Option<Arc<dyn LanguageModel>>,
    notifier: Arc<dyn Notifier>,
    store: DialogueStore,
    settings: OrchestratorSettings,
}

impl DialogueOrchestrator {
    pub fn new(store: DialogueStore, notifier: Arc<dyn Notifier>) -> Self {
        let pool = store.pool().clone();
        Self {
            classifier: Arc::new(KeywordIntentClassifier::new()),
            emotion: EmotionAnalyzer::new(),
            crisis: CrisisCoordinator::new(),
            intake: IntakeFlowTable::new(),
            knowledge: KnowledgeCache::new(pool.clone()),
            practices: PracticeDirectory::new(pool),
            model: None,
            notifier,
            store,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn intake_flows(&self) -> &IntakeFlowTable {
        &self.intake
    }

    pub fn practices(&self) -> &PracticeDirectory {
        &self.practices
    }

    pub fn store(&self) -> &DialogueStore {
        &self.store
    }

    /// Handles one final caller utterance and appends the turn to history.
    pub async fn handle_turn(&self, ctx: &mut CallContext, text: &str) -> TurnResponse {
        ctx.accessibility.observe(text);
        let emotion = self.emotion.analyze(text);
        let decision = self.crisis.assess(text, &ctx.history, emotion.state);

        let routed = if decision.is_crisis() {
            self.handle_crisis(ctx, text, &decision).await
        } else {
            if decision.escalate {
                self.handle_escalation(ctx, text, &decision).await;
            }
            let mut routed = self.route(ctx, text, &emotion).await;
            if decision.priority == Some(Priority::Medium) {
                routed.text.push_str(HUMAN_OFFER);
            }
            routed
        };

        let (emotional_state, adjustments) = if decision.is_crisis() {
            (EmotionalState::Crisis, adjustments_for(EmotionalState::Crisis))
        } else {
            (emotion.state, emotion.adjustments)
        };

        let response = TurnResponse {
            response_text: routed.text,
            intent: routed.intent,
            confidence: routed.confidence,
            emotional_state,
            voice_adjustments: ctx.accessibility.adjust_voice(adjustments),
            monitor_closely: decision.monitor_closely,
            escalation: decision,
            intake_stage: routed.intake_stage,
            source: routed.source,
        };

        self.append_turn(ctx, text, &response);
        response
    }

    /// Writes the event (bounded wait) and alerts clinical staff.
    async fn handle_crisis(
        &self,
        ctx: &CallContext,
        text: &str,
        decision: &EscalationDecision,
    ) -> Routed {
        tracing::warn!(
            call_id = %ctx.call_id,
            reason = %decision.reason,
            action = decision.action.as_str(),
            "crisis escalation"
        );
        self.record_escalation(ctx, text, decision, Some(self.settings.crisis_log_timeout))
            .await;
        self.notifier.notify(NotificationRequest {
            kind: NotificationType::Crisis,
            urgency: Urgency::Critical,
            caller: ctx.caller.clone(),
            content: format!("{}. Caller said: \"{}\"", decision.reason, text),
            call_id: Some(ctx.call_id.clone()),
        });

        Routed {
            text: decision
                .response_override
                .clone()
                .unwrap_or_else(|| crate::crisis::SAFETY_SCRIPT.to_string()),
            intent: None,
            confidence: 0.0,
            intake_stage: None,
            source: ResponseSource::Crisis,
        }
    }

    /// HIGH and MEDIUM escalations are recorded; HIGH also schedules a callback.
    async fn handle_escalation(&self, ctx: &CallContext, text: &str, decision: &EscalationDecision) {
        tracing::info!(
            call_id = %ctx.call_id,
            priority = ?decision.priority,
            reason = %decision.reason,
            "escalation"
        );
        self.record_escalation(ctx, text, decision, None).await;
        if decision.priority == Some(Priority::High) {
            self.notifier.notify(NotificationRequest {
                kind: NotificationType::Callback,
                urgency: Urgency::High,
                caller: ctx.caller.clone(),
                content: format!("{}. Caller said: \"{}\"", decision.reason, text),
                call_id: Some(ctx.call_id.clone()),
            });
        }
    }

    async fn record_escalation(
        &self,
        ctx: &CallContext,
        text: &str,
        decision: &EscalationDecision,
        bound: Option<Duration>,
    ) {
        let Some(event) =
            EscalationEvent::from_decision(&ctx.call_id, &ctx.tenant_id, text, decision)
        else {
            return;
        };
        let write = self.store.record_escalation(event);
        let result = match bound {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(call_id = %ctx.call_id, "escalation event write timed out");
                    return;
                }
            },
            None => write.await,
        };
        if let Err(e) = result {
            tracing::warn!(call_id = %ctx.call_id, error = %e, "failed to record escalation event");
        }
    }

    async fn route(&self, ctx: &mut CallContext, text: &str, emotion: &EmotionAnalysis) -> Routed {
        let practice = self.practices.get(&ctx.tenant_id).await;

        if let Some(flow) = self.intake.get(&ctx.call_id) {
            let reply = flow.lock().await.handle(text, &practice);
            self.finish_intake(ctx, &reply.outcome).await;
            return Routed {
                text: reply.text,
                intent: Some(Intent::NewAppointment),
                confidence: 1.0,
                intake_stage: Some(reply.stage),
                source: ResponseSource::Intake,
            };
        }

        let classified = self.classifier.classify(text);
        let intent = classified.map(|m| m.intent);
        let confidence = classified.map_or(0.0, |m| m.confidence);
        let fixed = |text: &str| Routed {
            text: text.to_string(),
            intent,
            confidence,
            intake_stage: None,
            source: ResponseSource::FixedHandler,
        };

        match intent {
            Some(Intent::Billing) => {
                self.notify_staff(ctx, NotificationType::Billing, Urgency::High, text);
                return fixed(BILLING_RESPONSE);
            }
            Some(Intent::AppointmentChange) => {
                self.notify_staff(ctx, NotificationType::AppointmentChange, Urgency::Medium, text);
                return fixed(APPOINTMENT_CHANGE_RESPONSE);
            }
            Some(Intent::CareManagement) => {
                self.notify_staff(ctx, NotificationType::CareManagement, Urgency::High, text);
                return fixed(CARE_MANAGEMENT_RESPONSE);
            }
            Some(Intent::ProviderAvailability) => return fixed(PROVIDER_AVAILABILITY_RESPONSE),
            Some(Intent::NewAppointment) => {
                let phone = ctx.caller.phone.clone();
                let reply = match self.intake.create(&ctx.call_id, phone) {
                    Some(flow) => flow.lock().await.start(&practice),
                    // Another turn created the flow first.
                    None => match self.intake.get(&ctx.call_id) {
                        Some(flow) => flow.lock().await.handle(text, &practice),
                        None => {
                            return self
                                .answer(ctx, text, emotion, &practice, intent, confidence)
                                .await
                        }
                    },
                };
                tracing::info!(call_id = %ctx.call_id, "intake started");
                return Routed {
                    text: reply.text,
                    intent,
                    confidence,
                    intake_stage: Some(reply.stage),
                    source: ResponseSource::Intake,
                };
            }
            _ => {}
        }

        if contains_any(&normalize(text), HUMAN_REQUEST_WORDS) {
            self.notify_staff(ctx, NotificationType::Callback, Urgency::Medium, text);
            return fixed(HUMAN_REQUEST_RESPONSE);
        }

        self.answer(ctx, text, emotion, &practice, intent, confidence)
            .await
    }

    /// Knowledge base first, then generation, then the message-taking script.
    async fn answer(
        &self,
        ctx: &CallContext,
        text: &str,
        emotion: &EmotionAnalysis,
        practice: &PracticeProfile,
        intent: Option<Intent>,
        confidence: f32,
    ) -> Routed {
        match self.knowledge.lookup(&ctx.tenant_id, text).await {
            Ok(Some(answer)) => {
                return Routed {
                    text: ctx
                        .accessibility
                        .post_process(&with_prefix(emotion, &answer)),
                    intent,
                    confidence,
                    intake_stage: None,
                    source: ResponseSource::Knowledge,
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(call_id = %ctx.call_id, error = %e, "knowledge lookup failed");
            }
        }

        let generated = match &self.model {
            Some(model) => {
                let request = GenerationRequest {
                    system_prompt: practice.system_prompt(&ctx.accessibility),
                    history: ctx.history.clone(),
                    user_text: text.to_string(),
                    max_tokens: self.settings.max_tokens,
                    temperature: self.settings.temperature,
                };
                match tokio::time::timeout(self.settings.generation_timeout, model.generate(request))
                    .await
                {
                    Ok(Ok(text)) => Some(text),
                    Ok(Err(e)) => {
                        tracing::warn!(call_id = %ctx.call_id, error = %e, "generation failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(
                            call_id = %ctx.call_id,
                            timeout_ms = self.settings.generation_timeout.as_millis() as u64,
                            "generation timed out"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        match generated.filter(|answer| is_useful_answer(answer)) {
            Some(answer) => Routed {
                text: ctx
                    .accessibility
                    .post_process(&with_prefix(emotion, &answer)),
                intent,
                confidence,
                intake_stage: None,
                source: ResponseSource::Generated,
            },
            None => {
                self.notify_staff(ctx, NotificationType::General, Urgency::Medium, text);
                Routed {
                    text: MESSAGE_TAKING_SCRIPT.to_string(),
                    intent,
                    confidence,
                    intake_stage: None,
                    source: ResponseSource::MessageTaking,
                }
            }
        }
    }

    /// Persists a confirmed intake and retires finished flows.
    async fn finish_intake(&self, ctx: &mut CallContext, outcome: &IntakeOutcome) {
        match outcome {
            IntakeOutcome::InProgress => {}
            IntakeOutcome::Ended { .. } => {
                self.intake.remove(&ctx.call_id);
            }
            IntakeOutcome::Completed(record) => {
                self.intake.remove(&ctx.call_id);
                if ctx.caller.name.is_none() {
                    ctx.caller.name = record.full_name.clone();
                }
                if let Err(e) = self
                    .store
                    .record_intake(ctx.call_id.clone(), ctx.tenant_id.clone(), record.clone())
                    .await
                {
                    tracing::error!(call_id = %ctx.call_id, error = %e, "failed to persist intake record");
                }
                self.notifier.notify(NotificationRequest {
                    kind: NotificationType::NewIntake,
                    urgency: Urgency::Medium,
                    caller: CallerInfo {
                        phone: record.phone.clone().or_else(|| ctx.caller.phone.clone()),
                        name: record.full_name.clone(),
                    },
                    content: intake_summary(record),
                    call_id: Some(ctx.call_id.clone()),
                });
            }
        }
    }

    fn notify_staff(&self, ctx: &CallContext, kind: NotificationType, urgency: Urgency, text: &str) {
        self.notifier.notify(NotificationRequest {
            kind,
            urgency,
            caller: ctx.caller.clone(),
            content: format!("Caller said: \"{}\"", text),
            call_id: Some(ctx.call_id.clone()),
        });
    }

    fn append_turn(&self, ctx: &mut CallContext, text: &str, response: &TurnResponse) {
        let turn_index = ctx.turn_count;
        ctx.push_turn(ConversationTurn::new(
            text,
            response.response_text.clone(),
            response.intent,
        ));

        let record = TurnRecord {
            call_id: ctx.call_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            turn_index,
            caller_text: text.to_string(),
            assistant_text: response.response_text.clone(),
            intent: response.intent.map(|i| i.as_str().to_string()),
            confidence: response.confidence,
            emotional_state: response.emotional_state,
        };
        let store = self.store.clone();
        let call_id = ctx.call_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.record_turn(record).await {
                tracing::warn!(call_id = %call_id, error = %e, "failed to persist conversation turn");
            }
        });
    }
}

fn is_useful_answer(answer: &str) -> bool {
    answer.trim().chars().count() >= MIN_GENERATED_CHARS
        && !contains_any(&normalize(answer), DONT_KNOW_MARKERS)
}

fn intake_summary(record: &IntakeRecord) -> String {
    let mut lines = vec![
        format!("Name: {}", record.full_name.as_deref().unwrap_or("")),
        format!("Phone: {}", record.phone.as_deref().unwrap_or("")),
        format!("Email: {}", record.email.as_deref().unwrap_or("")),
        format!("State: {}", record.state.as_deref().unwrap_or("")),
        format!(
            "Service: {}",
            record.service_type.map(|s| s.as_str()).unwrap_or("")
        ),
    ];
    if let Some(partner) = &record.partner_name {
        lines.push(format!("Partner: {}", partner));
    }
    if let Some(child) = &record.child_name {
        lines.push(format!(
            "Child: {}{}",
            child,
            record
                .child_age
                .map(|age| format!(", age {}", age))
                .unwrap_or_default()
        ));
    }
    lines.push(format!("Insurance: {}", record.insurance.as_deref().unwrap_or("")));
    lines.push(format!(
        "Availability: {}",
        record.availability.as_deref().unwrap_or("")
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_or_unsure_answers_are_rejected() {
        assert!(!is_useful_answer("Yes."));
        assert!(!is_useful_answer("I'm not sure about that, sorry, please ask staff."));
        assert!(is_useful_answer("Our office is open weekdays from nine to five."));
    }
}
