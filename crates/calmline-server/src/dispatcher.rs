//! Speech synthesis dispatch: text in, framed transport audio out.

use std::time::Duration;

use calmline_dialogue::{DialogueStore, PracticeProfile};
use calmline_types::voice::VoiceProfile;
use calmline_types::VoiceAdjustments;
use calmline_voice::{frame_audio, SynthesisService};

use crate::session::Session;

const DEFAULT_PROFILE: &str = "default";

#[derive(Clone)]
pub struct SpeechDispatcher {
    synthesis: SynthesisService,
    /// Per-frame wait for outbound buffer room.
    frame_wait: Duration,
}

impl SpeechDispatcher {
    pub fn new(synthesis: SynthesisService, frame_wait: Duration) -> Self {
        Self {
            synthesis,
            frame_wait,
        }
    }

    /// Synthesizes `text` and sends it to the caller followed by a mark.
    ///
    /// Returns false if the response was not delivered whole: the session
    /// closed, synthesis failed or timed out, or the transport stopped
    /// draining its buffer.
    pub async fn speak(
        &self,
        session: &Session,
        text: &str,
        voice: Option<&VoiceProfile>,
        adjustments: VoiceAdjustments,
    ) -> bool {
        if session.is_closed() {
            tracing::debug!(session_id = session.session_id(), "session closed, response discarded");
            return false;
        }

        let profile_id = match voice {
            Some(profile) => {
                self.synthesis.add_profile(profile.clone()).await;
                profile.id.as_str()
            }
            None => DEFAULT_PROFILE,
        };

        let audio = match self.synthesis.synthesize(text, profile_id, adjustments).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(
                    session_id = session.session_id(),
                    call_id = session.call_id(),
                    error = %e,
                    "speech synthesis failed"
                );
                return false;
            }
        };

        // The call may have ended while synthesis was running.
        if session.is_closed() {
            tracing::debug!(session_id = session.session_id(), "session closed during synthesis, response discarded");
            return false;
        }

        let mark = session.next_mark();
        let events = frame_audio(session.stream_id(), &audio, &mark);
        let frames = events.len();
        // Waits for buffer room; the transport drains faster than real time.
        for (sent, event) in events.iter().enumerate() {
            if !session.send(event, self.frame_wait).await {
                tracing::warn!(
                    session_id = session.session_id(),
                    sent,
                    frames,
                    closed = session.is_closed(),
                    "response cut short"
                );
                return false;
            }
        }
        tracing::debug!(
            session_id = session.session_id(),
            frames,
            mark = %mark,
            "response sent"
        );
        true
    }

    /// Speaks the practice welcome once per session.
    ///
    /// Skipped when the call already has a turn newer than `window`, which
    /// happens when the transport reconnects mid-call.
    pub async fn send_welcome(
        &self,
        session: &Session,
        practice: &PracticeProfile,
        store: &DialogueStore,
        window: Duration,
    ) -> bool {
        if !session.claim_welcome() {
            return false;
        }
        match store
            .recent_turn_exists(session.call_id().to_string(), window)
            .await
        {
            Ok(true) => {
                tracing::info!(
                    session_id = session.session_id(),
                    call_id = session.call_id(),
                    "recent conversation found, skipping welcome"
                );
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    session_id = session.session_id(),
                    error = %e,
                    "could not check recent turns, sending welcome"
                );
            }
        }
        self.speak(
            session,
            &practice.welcome(),
            practice.voice.as_ref(),
            VoiceAdjustments::default(),
        )
        .await
    }
}
