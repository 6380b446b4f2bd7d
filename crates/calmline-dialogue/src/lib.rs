//! Dialogue layer for the Calmline call engine.
//!
//! Turns a caller's final utterance into a spoken response. The
//! [`DialogueOrchestrator`] checks for safety first, then drives an active
//! intake, classifies the request, answers fixed questions, consults the
//! practice knowledge base, and falls back to language generation.
//!
//! The building blocks are usable on their own:
//!
//! - [`CrisisCoordinator`] is a pure safety assessment.
//! - [`IntakeFlow`] is the per-call new-client state machine.
//! - [`KeywordIntentClassifier`] implements [`IntentClassifier`].
//! - [`EmotionAnalyzer`] and [`AccessibilityNeeds`] tune the delivery.

pub mod accessibility;
pub mod context;
pub mod crisis;
pub mod emotion;
mod error;
pub mod extract;
pub mod generation;
pub mod intake;
pub mod intent;
pub mod knowledge;
pub mod orchestrator;
pub mod practice;
pub mod store;
mod text;

pub use accessibility::AccessibilityNeeds;
pub use context::{CallContext, ConversationTurn, MAX_HISTORY_TURNS};
pub use crisis::{CrisisCoordinator, EscalationAction, EscalationDecision};
pub use emotion::{EmotionAnalysis, EmotionAnalyzer};
pub use error::DialogueError;
pub use generation::{GenerationConfig, GenerationRequest, HttpLanguageModel, LanguageModel};
pub use intake::{IntakeFlow, IntakeFlowTable, IntakeOutcome, IntakeRecord, IntakeReply};
pub use intent::{Intent, IntentClassifier, IntentMatch, KeywordIntentClassifier};
pub use knowledge::{KnowledgeCache, KnowledgeEntry};
pub use orchestrator::{
    DialogueOrchestrator, OrchestratorSettings, ResponseSource, TurnResponse,
    MESSAGE_TAKING_SCRIPT,
};
pub use practice::{PracticeDirectory, PracticeProfile};
pub use store::{DialogueStore, EscalationEvent, TurnRecord};
