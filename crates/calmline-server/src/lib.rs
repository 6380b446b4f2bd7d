//! Calmline server library logic.
//!
//! Wires the voice, dialogue and notification crates behind an axum router:
//! `/health`, the `/media` telephony WebSocket and a read-only
//! `/api/sessions` view for operators.

pub mod api_media;
pub mod background;
pub mod call;
pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod session;
pub mod utterance;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Json, Router};
use calmline_db::DbPool;
use calmline_dialogue::{
    DialogueError, DialogueOrchestrator, DialogueStore, HttpLanguageModel, LanguageModel,
    OrchestratorSettings,
};
use calmline_notify::{
    HttpEmailSender, NotificationRouter, Notifier, NotifyError, TwilioSmsSender,
};
use calmline_voice::{
    ChannelSettings, HttpSynthesizer, RecognitionProvider, SpeechSynthesizer, StreamingRecognizer,
    SynthesisService, VoiceError,
};
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::{Config, SessionConfig};
use dispatcher::SpeechDispatcher;
use registry::SessionRegistry;
use session::{Session, SessionSummary};

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("voice provider setup failed: {0}")]
    Voice(#[from] VoiceError),

    #[error("generation provider setup failed: {0}")]
    Dialogue(#[from] DialogueError),

    #[error("notification provider setup failed: {0}")]
    Notify(#[from] NotifyError),
}

/// External capabilities the server talks to.
pub struct Providers {
    pub recognizer: Arc<dyn RecognitionProvider>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub language_model: Option<Arc<dyn LanguageModel>>,
    pub notifier: Arc<dyn Notifier>,
}

impl Providers {
    /// Builds the HTTP/WebSocket provider clients from configuration.
    ///
    /// Missing API keys are logged, not fatal: the affected capability
    /// degrades to scripted fallbacks at call time.
    pub fn from_config(config: &Config, pool: &DbPool) -> Result<Self, StartupError> {
        if !config.recognition.is_enabled() {
            tracing::warn!("recognition api_key not set, callers will not be heard");
        }
        if config.synthesis.api_key.is_empty() {
            tracing::warn!("synthesis api_key not set, responses cannot be spoken");
        }

        let language_model: Option<Arc<dyn LanguageModel>> = if config.generation.api_key.is_empty()
        {
            tracing::warn!("generation api_key not set, unanswered questions go to message taking");
            None
        } else {
            Some(Arc::new(HttpLanguageModel::new(&config.generation)?))
        };

        let notifier = NotificationRouter::new(
            config.notifications.route_table(),
            Arc::new(TwilioSmsSender::new(config.notifications.sms.clone())?),
            Arc::new(HttpEmailSender::new(config.notifications.email.clone())?),
        )
        .with_store(pool.clone());

        Ok(Self {
            recognizer: Arc::new(StreamingRecognizer::new(config.recognition.clone())),
            synthesizer: Arc::new(HttpSynthesizer::new(config.synthesis.clone())?),
            language_model,
            notifier: Arc::new(notifier),
        })
    }
}

/// Application state shared across all request handlers.
pub struct AppState {
    pub registry: SessionRegistry,
    pub orchestrator: Arc<DialogueOrchestrator>,
    pub dispatcher: SpeechDispatcher,
    pub recognizer: Arc<dyn RecognitionProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: SessionConfig,
    pub channel_settings: ChannelSettings,
}

impl AppState {
    pub fn new(config: &Config, pool: DbPool, providers: Providers) -> Self {
        let mut orchestrator =
            DialogueOrchestrator::new(DialogueStore::new(pool), Arc::clone(&providers.notifier))
                .with_settings(OrchestratorSettings {
                    generation_timeout: Duration::from_millis(config.generation.timeout_ms),
                    max_tokens: config.generation.max_tokens,
                    temperature: config.generation.temperature,
                    ..OrchestratorSettings::default()
                });
        if let Some(model) = providers.language_model {
            orchestrator = orchestrator.with_language_model(model);
        }

        Self {
            registry: SessionRegistry::new(),
            orchestrator: Arc::new(orchestrator),
            dispatcher: SpeechDispatcher::new(
                SynthesisService::new(providers.synthesizer, config.synthesis.request_timeout()),
                config.session.frame_send_timeout(),
            ),
            recognizer: providers.recognizer,
            notifier: providers.notifier,
            settings: config.session.clone(),
            channel_settings: config
                .session
                .channel_settings(config.recognition.connect_timeout()),
        }
    }

    /// Tears a session down and discards any unfinished intake for its call.
    pub fn end_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self.registry.remove(session_id)?;
        if self.orchestrator.intake_flows().remove(session.call_id()) {
            tracing::info!(
                session_id,
                call_id = session.call_id(),
                "discarded incomplete intake"
            );
        }
        Some(session)
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET /api/sessions`: active sessions and intake flows.
async fn sessions_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let sessions: Vec<SessionSummary> = state
        .registry
        .sessions()
        .iter()
        .map(|session| session.summary())
        .collect();
    Json(json!({
        "count": sessions.len(),
        "intake_flows": state.orchestrator.intake_flows().len(),
        "sessions": sessions,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/media", get(api_media::media_handler))
        .route("/api/sessions", get(sessions_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(state))
}
