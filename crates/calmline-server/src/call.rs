//! The per-session dialogue task.
//!
//! Consumes recognition events, aggregates utterances and runs at most one
//! dialogue turn at a time. A turn runs in its own task so that new
//! fragments keep flowing into the aggregator while it is in flight; the
//! call context moves into the turn and comes back when it finishes.

use std::sync::Arc;

use calmline_dialogue::CallContext;
use calmline_notify::NotificationRequest;
use calmline_types::{NotificationType, Urgency, VoiceAdjustments};
use calmline_voice::ChannelEvent;
use tokio::sync::mpsc;

use crate::session::Session;
use crate::utterance::UtteranceAggregator;
use crate::AppState;

pub const RECOGNITION_FALLBACK_SCRIPT: &str = "I'm sorry, I'm having trouble hearing you right \
now. I've let our staff know, and someone will call you back as soon as possible.";

pub const TURN_FALLBACK_SCRIPT: &str = "I'm sorry, that took me longer than expected. Could you \
say that one more time?";

/// Runs until the recognition channel is gone or the session closes.
pub async fn run_dialogue(
    state: Arc<AppState>,
    session: Arc<Session>,
    mut events: mpsc::Receiver<ChannelEvent>,
) {
    let practice = state
        .orchestrator
        .practices()
        .get(session.tenant_id())
        .await;
    state
        .dispatcher
        .send_welcome(
            &session,
            &practice,
            state.orchestrator.store(),
            state.settings.greeting_window(),
        )
        .await;

    let mut aggregator = UtteranceAggregator::new();
    let mut context = Some(CallContext::new(
        session.call_id(),
        session.tenant_id(),
        session.caller().clone(),
    ));
    let (done_tx, mut done_rx) = mpsc::channel::<CallContext>(1);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    // The supervisor stopped on its own, e.g. the provider
                    // closed normally mid-call. Nothing more will be heard.
                    if !session.is_closed() {
                        recognition_unavailable(&state, &session).await;
                    }
                    break;
                };
                match event {
                    ChannelEvent::Fragment(fragment) => {
                        if let Some(utterance) = aggregator.on_fragment(fragment) {
                            match context.take() {
                                Some(ctx) => start_turn(&state, &session, ctx, utterance, done_tx.clone()),
                                None => {
                                    tracing::error!(session_id = session.session_id(), "turn started without call context");
                                }
                            }
                        }
                    }
                    ChannelEvent::Interrupted => aggregator.interrupt(),
                    ChannelEvent::Unavailable => {
                        recognition_unavailable(&state, &session).await;
                        break;
                    }
                }
            }
            Some(ctx) = done_rx.recv() => {
                match aggregator.finish_turn() {
                    Some(next) => start_turn(&state, &session, ctx, next, done_tx.clone()),
                    None => context = Some(ctx),
                }
            }
        }
        if session.is_closed() {
            break;
        }
    }

    tracing::debug!(
        session_id = session.session_id(),
        in_flight = aggregator.is_in_flight(),
        "dialogue task finished"
    );
}

fn start_turn(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    mut ctx: CallContext,
    utterance: String,
    done: mpsc::Sender<CallContext>,
) {
    let state = Arc::clone(state);
    let session = Arc::clone(session);
    session.set_pending_response(true);

    tokio::spawn(async move {
        tracing::info!(
            session_id = session.session_id(),
            call_id = session.call_id(),
            chars = utterance.chars().count(),
            "caller turn"
        );

        let turn = async {
            let response = state.orchestrator.handle_turn(&mut ctx, &utterance).await;
            let practice = state
                .orchestrator
                .practices()
                .get(session.tenant_id())
                .await;
            state
                .dispatcher
                .speak(
                    &session,
                    &response.response_text,
                    practice.voice.as_ref(),
                    response.voice_adjustments,
                )
                .await;
        };

        if tokio::time::timeout(state.settings.turn_timeout(), turn)
            .await
            .is_err()
        {
            tracing::warn!(session_id = session.session_id(), "dialogue turn timed out");
            state
                .dispatcher
                .speak(&session, TURN_FALLBACK_SCRIPT, None, VoiceAdjustments::default())
                .await;
        }

        session.set_pending_response(false);
        if done.send(ctx).await.is_err() {
            tracing::debug!(session_id = session.session_id(), "dialogue task gone, dropping call context");
        }
    });
}

async fn recognition_unavailable(state: &AppState, session: &Session) {
    tracing::error!(
        session_id = session.session_id(),
        call_id = session.call_id(),
        "recognition unavailable for the rest of the call"
    );
    state.notifier.notify(NotificationRequest {
        kind: NotificationType::Callback,
        urgency: Urgency::High,
        caller: session.caller().clone(),
        content: "Speech recognition failed during the call; the caller could not be heard."
            .to_string(),
        call_id: Some(session.call_id().to_string()),
    });
    state
        .dispatcher
        .speak(
            session,
            RECOGNITION_FALLBACK_SCRIPT,
            None,
            VoiceAdjustments::default(),
        )
        .await;
}
