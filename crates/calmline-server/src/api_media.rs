//! Telephony media stream WebSocket handler.
//!
//! The transport connects to `/media` and sends JSON events: `connected`,
//! `start` (call and stream ids plus custom parameters), `media` (base64
//! μ-law audio), `mark` (playback finished) and `stop`. The read loop never
//! waits on recognition or dialogue work: audio goes to the session's flow
//! controller and everything downstream runs in other tasks.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use calmline_types::CallerInfo;
use calmline_voice::{decode_event, RecognitionChannel, StreamStart, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::call::run_dialogue;
use crate::registry::RegistryError;
use crate::session::{Session, SessionInit};
use crate::AppState;

/// WebSocket handler: `GET /media`.
pub async fn media_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded so a slow transport cannot grow memory; frames beyond this
    // are dropped by `Session::send`.
    let (tx, mut rx) = mpsc::channel::<String>(state.settings.outbound_buffer);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(AxumMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session: Option<Arc<Session>> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            AxumMessage::Text(text) => text,
            AxumMessage::Close(_) => break,
            _ => continue,
        };

        let event = match decode_event(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    session_id = session.as_ref().map(|s| s.session_id()).unwrap_or(""),
                    error = %e,
                    "ignoring malformed transport event"
                );
                continue;
            }
        };

        match event {
            TransportEvent::Connected => {
                tracing::debug!("media stream connected");
            }
            TransportEvent::Start(start) => {
                if let Some(existing) = &session {
                    tracing::warn!(
                        session_id = existing.session_id(),
                        "ignoring repeated start event"
                    );
                    continue;
                }
                match start_session(&state, start, tx.clone()) {
                    Ok(created) => session = Some(created),
                    Err(e) => {
                        tracing::warn!(error = %e, "rejecting media stream");
                        break;
                    }
                }
            }
            TransportEvent::Media(chunk) => match &session {
                Some(session) => {
                    session.enqueue_audio(chunk);
                }
                None => tracing::debug!("media before start, ignoring"),
            },
            TransportEvent::Mark(name) => {
                if let Some(session) = &session {
                    if !session.ack_mark(&name) {
                        tracing::debug!(session_id = session.session_id(), mark = %name, "unknown playback mark");
                    }
                }
            }
            TransportEvent::Stop => {
                tracing::info!(
                    session_id = session.as_ref().map(|s| s.session_id()).unwrap_or(""),
                    "media stream stopped"
                );
                break;
            }
            TransportEvent::Ignored => {}
        }
    }

    if let Some(session) = session {
        state.end_session(session.session_id());
    }
    send_task.abort();
}

/// Registers the session and starts its recognition and dialogue tasks.
fn start_session(
    state: &Arc<AppState>,
    start: StreamStart,
    outbound: mpsc::Sender<String>,
) -> Result<Arc<Session>, RegistryError> {
    let init = SessionInit {
        tenant_id: start
            .tenant_id()
            .unwrap_or(&state.settings.default_tenant)
            .to_string(),
        caller: CallerInfo {
            phone: start.caller_phone().map(str::to_string),
            name: None,
        },
        call_id: start.call_id,
        stream_id: start.stream_id,
        queue_capacity: state.settings.queue_capacity,
    };

    let session = state.registry.create(init, outbound)?;
    let (channel, events) = RecognitionChannel::spawn(
        session.session_id(),
        Arc::clone(&state.recognizer),
        session.flow(),
        state.channel_settings.clone(),
    );
    session.attach_recognition(channel);
    tokio::spawn(run_dialogue(Arc::clone(state), Arc::clone(&session), events));
    Ok(session)
}
