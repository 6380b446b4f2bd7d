//! Recognition channel supervision.
//!
//! Each session owns one `RecognitionChannel`. A supervisor task drives the
//! provider connection through an explicit state machine:
//!
//! ```text
//! Closed -> Opening -> Ready -> Closed
//!              |         |
//!              v         v
//!            Error <-----+
//!              |
//!              +-> Opening (after backoff)
//!              +-> Failed  (retry ceiling reached)
//! ```
//!
//! Only one connection exists at a time: the previous one is detached from
//! the flow controller and closed before the next attempt starts. Audio that
//! arrives in between is held by the [`AudioFlowController`] and replayed
//! when the new connection reports ready.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::flow::{AudioFlowController, DEFAULT_QUEUE_CAPACITY};
use crate::recognition::{ProviderEvent, RecognitionConnection, RecognitionProvider, NORMAL_CLOSE};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Ready,
    Error,
    /// The retry ceiling was reached; recognition is unavailable for the
    /// rest of the session.
    Failed,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Ready)
                | (Opening, Error)
                | (Opening, Closed)
                | (Ready, Error)
                | (Ready, Closed)
                | (Error, Opening)
                | (Error, Failed)
                | (Error, Closed)
        )
    }
}

/// Tuning for the supervisor.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Consecutive failed attempts after which the channel gives up.
    pub max_consecutive_failures: u32,
    /// Fixed delay between a failure and the next attempt.
    pub backoff: Duration,
    /// Upper bound on a single connect call.
    pub open_timeout: Duration,
    /// Capacity of each connection's audio channel.
    pub audio_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            backoff: Duration::from_secs(1),
            open_timeout: Duration::from_secs(5),
            audio_capacity: DEFAULT_QUEUE_CAPACITY + 64,
        }
    }
}

/// A piece of recognized text for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub session_id: String,
    pub text: String,
    pub is_final: bool,
}

/// Events delivered to the session's dialogue task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Fragment(TranscriptFragment),
    /// The connection dropped; any partial utterance is stale.
    Interrupted,
    /// Reconnection gave up. Recognition will not resume.
    Unavailable,
}

/// Handle to a session's recognition channel.
///
/// Dropping the handle shuts the supervisor down.
#[derive(Debug)]
pub struct RecognitionChannel {
    session_id: String,
    state: watch::Receiver<ChannelState>,
    shutdown: watch::Sender<bool>,
    failures: Arc<AtomicU32>,
}

impl RecognitionChannel {
    /// Starts supervising a recognition connection for `session_id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        session_id: impl Into<String>,
        provider: Arc<dyn RecognitionProvider>,
        flow: Arc<AudioFlowController>,
        settings: ChannelSettings,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let session_id = session_id.into();
        let (state_tx, state_rx) = watch::channel(ChannelState::Closed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let failures = Arc::new(AtomicU32::new(0));

        let supervisor = Supervisor {
            session_id: session_id.clone(),
            provider,
            flow,
            settings,
            state: state_tx,
            events: events_tx,
            failures: failures.clone(),
        };
        tokio::spawn(supervisor.run(shutdown_rx));

        (
            Self {
                session_id,
                state: state_rx,
                shutdown: shutdown_tx,
                failures,
            },
            events_rx,
        )
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Failed attempts since the connection was last ready.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Recognition can still produce transcripts (now or after reconnecting).
    pub fn is_usable(&self) -> bool {
        self.state() != ChannelState::Failed
    }

    /// Requests shutdown; the supervisor closes the live connection.
    pub fn close(&self) {
        if self.shutdown.send(true).is_err() {
            tracing::debug!(session_id = %self.session_id, "recognition supervisor already stopped");
        }
    }
}

enum AttemptOutcome {
    Shutdown,
    NormalClose,
    Failed { reason: String, reached_ready: bool },
}

struct Supervisor {
    session_id: String,
    provider: Arc<dyn RecognitionProvider>,
    flow: Arc<AudioFlowController>,
    settings: ChannelSettings,
    state: watch::Sender<ChannelState>,
    events: mpsc::Sender<ChannelEvent>,
    failures: Arc<AtomicU32>,
}

impl Supervisor {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.transition(ChannelState::Opening);

            match self.attempt(&mut shutdown).await {
                AttemptOutcome::Shutdown => break,
                AttemptOutcome::NormalClose => {
                    tracing::info!(session_id = %self.session_id, "recognition connection closed normally");
                    break;
                }
                AttemptOutcome::Failed {
                    reason,
                    reached_ready,
                } => {
                    if reached_ready {
                        consecutive = 0;
                    }
                    consecutive += 1;
                    self.failures.store(consecutive, Ordering::Relaxed);
                    self.transition(ChannelState::Error);
                    tracing::warn!(
                        session_id = %self.session_id,
                        attempt = consecutive,
                        max_attempts = self.settings.max_consecutive_failures,
                        reason = %reason,
                        "recognition connection failed"
                    );
                    if self.events.send(ChannelEvent::Interrupted).await.is_err() {
                        break;
                    }

                    if consecutive >= self.settings.max_consecutive_failures {
                        self.transition(ChannelState::Failed);
                        tracing::error!(
                            session_id = %self.session_id,
                            "recognition unavailable, retry ceiling reached"
                        );
                        let _ = self.events.send(ChannelEvent::Unavailable).await;
                        return;
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.backoff) => {}
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }
            }
        }

        self.flow.detach();
        self.transition(ChannelState::Closed);
    }

    /// One connection attempt, from connect until the connection ends.
    async fn attempt(&self, shutdown: &mut watch::Receiver<bool>) -> AttemptOutcome {
        let connect = self
            .provider
            .connect(&self.session_id, self.settings.audio_capacity);

        let mut connection = tokio::select! {
            result = tokio::time::timeout(self.settings.open_timeout, connect) => match result {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => {
                    return AttemptOutcome::Failed { reason: e.to_string(), reached_ready: false };
                }
                Err(_) => {
                    return AttemptOutcome::Failed {
                        reason: "connect timed out".to_string(),
                        reached_ready: false,
                    };
                }
            },
            _ = shutdown_requested(shutdown) => return AttemptOutcome::Shutdown,
        };

        let outcome = self.pump(&mut connection, shutdown).await;
        self.flow.detach();
        connection.close();
        outcome
    }

    async fn pump(
        &self,
        connection: &mut RecognitionConnection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> AttemptOutcome {
        let mut reached_ready = false;
        loop {
            let event = tokio::select! {
                event = connection.events.recv() => event,
                _ = shutdown_requested(shutdown) => return AttemptOutcome::Shutdown,
            };

            match event {
                Some(ProviderEvent::Open) => {
                    if reached_ready {
                        continue;
                    }
                    reached_ready = true;
                    self.failures.store(0, Ordering::Relaxed);
                    let flushed = self.flow.attach(connection.audio.clone());
                    self.transition(ChannelState::Ready);
                    tracing::info!(
                        session_id = %self.session_id,
                        flushed,
                        dropped_total = self.flow.dropped_count(),
                        "recognition ready"
                    );
                }
                Some(ProviderEvent::Transcript { text, is_final }) => {
                    let fragment = TranscriptFragment {
                        session_id: self.session_id.clone(),
                        text,
                        is_final,
                    };
                    if self.events.send(ChannelEvent::Fragment(fragment)).await.is_err() {
                        return AttemptOutcome::Shutdown;
                    }
                }
                Some(ProviderEvent::Closed { code, reason }) => {
                    if code == Some(NORMAL_CLOSE) {
                        return AttemptOutcome::NormalClose;
                    }
                    return AttemptOutcome::Failed {
                        reason: format!("closed with code {:?}: {}", code, reason),
                        reached_ready,
                    };
                }
                Some(ProviderEvent::Error(reason)) => {
                    return AttemptOutcome::Failed {
                        reason,
                        reached_ready,
                    };
                }
                None => {
                    return AttemptOutcome::Failed {
                        reason: "provider event stream ended".to_string(),
                        reached_ready,
                    };
                }
            }
        }
    }

    fn transition(&self, next: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                tracing::warn!(
                    session_id = %self.session_id,
                    from = current.as_str(),
                    to = next.as_str(),
                    "ignoring invalid recognition channel transition"
                );
                return false;
            }
            tracing::debug!(
                session_id = %self.session_id,
                from = current.as_str(),
                to = next.as_str(),
                "recognition channel transition"
            );
            *current = next;
            true
        });
    }
}

/// Resolves once shutdown is requested or the handle is dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
