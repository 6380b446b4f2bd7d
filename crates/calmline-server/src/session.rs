//! Per-call session state shared between the transport handler, the
//! dialogue task and the background sweeps.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use calmline_types::CallerInfo;
use calmline_voice::{
    AudioChunk, AudioFlowController, ChannelState, EnqueueOutcome, OutboundEvent,
    RecognitionChannel,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Identifiers and caller details taken from the transport `start` event.
#[derive(Debug, Clone)]
pub struct SessionInit {
    pub call_id: String,
    pub stream_id: String,
    pub tenant_id: String,
    pub caller: CallerInfo,
    pub queue_capacity: usize,
}

#[derive(Debug)]
pub struct Session {
    session_id: String,
    call_id: String,
    stream_id: String,
    tenant_id: String,
    caller: CallerInfo,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    flow: Arc<AudioFlowController>,
    recognition: Mutex<Option<RecognitionChannel>>,
    outbound: mpsc::Sender<String>,
    pending_response: AtomicBool,
    welcome_sent: AtomicBool,
    closed: AtomicBool,
    marks: Mutex<HashSet<String>>,
    mark_seq: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Session {
    pub fn new(session_id: String, init: SessionInit, outbound: mpsc::Sender<String>) -> Self {
        Self {
            session_id,
            call_id: init.call_id,
            stream_id: init.stream_id,
            tenant_id: init.tenant_id,
            caller: init.caller,
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            flow: Arc::new(AudioFlowController::new(init.queue_capacity)),
            recognition: Mutex::new(None),
            outbound,
            pending_response: AtomicBool::new(false),
            welcome_sent: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            marks: Mutex::new(HashSet::new()),
            mark_seq: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn caller(&self) -> &CallerInfo {
        &self.caller
    }

    pub fn flow(&self) -> Arc<AudioFlowController> {
        Arc::clone(&self.flow)
    }

    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    /// Hands inbound audio to the flow controller. Never waits.
    pub fn enqueue_audio(&self, chunk: AudioChunk) -> EnqueueOutcome {
        self.touch();
        let outcome = self.flow.enqueue(chunk);
        if outcome == EnqueueOutcome::BufferedDroppedOldest {
            let dropped = self.flow.dropped_count();
            // One line per second of dropped audio is enough.
            if dropped % 50 == 1 {
                tracing::warn!(
                    session_id = %self.session_id,
                    dropped,
                    "recognition not ready, dropping oldest buffered audio"
                );
            }
        }
        outcome
    }

    pub fn attach_recognition(&self, channel: RecognitionChannel) {
        let previous = lock(&self.recognition).replace(channel);
        if let Some(previous) = previous {
            previous.close();
        }
    }

    pub fn recognition_state(&self) -> ChannelState {
        lock(&self.recognition)
            .as_ref()
            .map_or(ChannelState::Closed, RecognitionChannel::state)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.recognition)
            .as_ref()
            .map_or(0, RecognitionChannel::consecutive_failures)
    }

    /// Queues one outbound frame, waiting up to `wait` for buffer room.
    ///
    /// Returns false if the session closed, the transport writer is gone,
    /// or the buffer stayed full for the whole wait.
    pub async fn send(&self, event: &OutboundEvent, wait: Duration) -> bool {
        if self.is_closed() {
            return false;
        }
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "failed to encode outbound event");
                return false;
            }
        };
        match tokio::time::timeout(wait, self.outbound.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                tracing::debug!(session_id = %self.session_id, "transport writer gone, frame discarded");
                false
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    wait_ms = wait.as_millis() as u64,
                    "outbound buffer stayed full, transport is not draining"
                );
                false
            }
        }
    }

    /// Allocates a mark name and records it as awaiting playback.
    pub fn next_mark(&self) -> String {
        let seq = self.mark_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("response-{}", seq);
        lock(&self.marks).insert(name.clone());
        name
    }

    /// Records the transport's playback acknowledgement for `name`.
    pub fn ack_mark(&self, name: &str) -> bool {
        self.touch();
        lock(&self.marks).remove(name)
    }

    pub fn outstanding_marks(&self) -> usize {
        lock(&self.marks).len()
    }

    pub fn set_pending_response(&self, pending: bool) {
        self.pending_response.store(pending, Ordering::Release);
    }

    pub fn has_pending_response(&self) -> bool {
        self.pending_response.load(Ordering::Acquire)
    }

    /// Returns true only for the first caller; the welcome is sent once.
    pub fn claim_welcome(&self) -> bool {
        !self.welcome_sent.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops recognition and drops buffered audio. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(channel) = lock(&self.recognition).take() {
            channel.close();
        }
        self.flow.close();
        lock(&self.marks).clear();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            call_id: self.call_id.clone(),
            tenant_id: self.tenant_id.clone(),
            recognition_state: self.recognition_state().as_str(),
            reconnect_attempts: self.reconnect_attempts(),
            pending_response: self.has_pending_response(),
            queued_audio: self.flow.queued_len(),
            dropped_audio: self.flow.dropped_count(),
            created_at: self.created_at,
            idle_secs: self.idle_for().as_secs(),
        }
    }
}

/// Operator view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub call_id: String,
    pub tenant_id: String,
    pub recognition_state: &'static str,
    pub reconnect_attempts: u32,
    pub pending_response: bool,
    pub queued_audio: usize,
    pub dropped_audio: u64,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(outbound: mpsc::Sender<String>) -> Session {
        Session::new(
            "s1".to_string(),
            SessionInit {
                call_id: "CA1".to_string(),
                stream_id: "MZ1".to_string(),
                tenant_id: "default".to_string(),
                caller: CallerInfo::default(),
                queue_capacity: 3,
            },
            outbound,
        )
    }

    #[test]
    fn welcome_is_claimed_once() {
        let (tx, _rx) = mpsc::channel(4);
        let session = session(tx);
        assert!(session.claim_welcome());
        assert!(!session.claim_welcome());
    }

    #[test]
    fn marks_are_tracked_until_acknowledged() {
        let (tx, _rx) = mpsc::channel(4);
        let session = session(tx);
        let first = session.next_mark();
        let second = session.next_mark();
        assert_ne!(first, second);
        assert_eq!(session.outstanding_marks(), 2);
        assert!(session.ack_mark(&first));
        assert!(!session.ack_mark(&first));
        assert_eq!(session.outstanding_marks(), 1);
    }

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn send_waits_for_buffer_room() {
        let (tx, mut rx) = mpsc::channel(1);
        let session = Arc::new(session(tx));
        assert!(session.send(&OutboundEvent::clear("MZ1"), WAIT).await);

        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let mut frames = 0;
            while rx.recv().await.is_some() {
                frames += 1;
            }
            frames
        });
        assert!(session.send(&OutboundEvent::clear("MZ1"), Duration::from_secs(5)).await);
        drop(session);
        assert_eq!(drain.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stalled_transport_gives_up_after_wait() {
        let (tx, _rx) = mpsc::channel(1);
        let session = session(tx);
        assert!(session.send(&OutboundEvent::clear("MZ1"), WAIT).await);
        assert!(!session.send(&OutboundEvent::clear("MZ1"), WAIT).await);
    }

    #[tokio::test]
    async fn closed_session_discards_audio_and_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let session = session(tx);
        session.enqueue_audio(AudioChunk::new(vec![0xFF; 160]));
        assert_eq!(session.flow().queued_len(), 1);

        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(
            session.enqueue_audio(AudioChunk::new(vec![0xFF; 160])),
            EnqueueOutcome::Discarded
        );
        assert!(!session.send(&OutboundEvent::clear("MZ1"), WAIT).await);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn buffered_audio_is_capped() {
        let (tx, _rx) = mpsc::channel(4);
        let session = session(tx);
        for _ in 0..10 {
            session.enqueue_audio(AudioChunk::new(vec![0xFF; 160]));
        }
        assert_eq!(session.flow().queued_len(), 3);
        assert_eq!(session.flow().dropped_count(), 7);
    }
}
