//! Telephony transport frame codec.
//!
//! The transport speaks JSON text frames over a WebSocket. Inbound media
//! events carry base64-encoded 8 kHz μ-law audio; outbound audio has to be
//! cut into 20 ms frames and followed by a `mark` so the transport can
//! report when playback finished.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use crate::error::VoiceError;

/// Bytes in one 20 ms frame of 8 kHz μ-law audio.
pub const FRAME_BYTES: usize = 160;

/// μ-law encoding of a zero sample, used to pad the final frame.
const MULAW_SILENCE: u8 = 0xFF;

/// Raw inbound audio plus the moment it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub received_at: Instant,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            received_at: Instant::now(),
        }
    }
}

/// Metadata carried by the transport `start` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStart {
    pub call_id: String,
    pub stream_id: String,
    pub custom_parameters: HashMap<String, String>,
}

impl StreamStart {
    /// Caller phone number, when the call handler forwarded it.
    pub fn caller_phone(&self) -> Option<&str> {
        ["from", "From", "caller"]
            .iter()
            .find_map(|key| self.custom_parameters.get(*key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Tenant the call belongs to, when the call handler forwarded it.
    pub fn tenant_id(&self) -> Option<&str> {
        ["tenant", "tenantId", "tenant_id"]
            .iter()
            .find_map(|key| self.custom_parameters.get(*key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// A decoded inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Start(StreamStart),
    Media(AudioChunk),
    /// Playback of the named mark finished on the caller's side.
    Mark(String),
    Stop,
    /// Recognized but irrelevant event (outbound-track media, DTMF, ...).
    Ignored,
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum InboundFrame {
    Connected,
    Start {
        start: StartPayload,
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        mark: MarkPayload,
    },
    Stop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    call_sid: String,
    #[serde(default)]
    stream_sid: Option<String>,
    #[serde(default)]
    custom_parameters: HashMap<String, String>,
}

#[derive(Deserialize)]
struct MediaPayload {
    #[serde(default)]
    track: Option<String>,
    payload: String,
}

#[derive(Deserialize, Serialize)]
struct MarkPayload {
    name: String,
}

/// Decodes one inbound text frame.
pub fn decode_event(text: &str) -> Result<TransportEvent, VoiceError> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    let event = match frame {
        InboundFrame::Connected => TransportEvent::Connected,
        InboundFrame::Start { start, stream_sid } => {
            let stream_id = start
                .stream_sid
                .or(stream_sid)
                .ok_or_else(|| VoiceError::Codec("start event without streamSid".to_string()))?;
            if start.call_sid.is_empty() {
                return Err(VoiceError::Codec("start event without callSid".to_string()));
            }
            TransportEvent::Start(StreamStart {
                call_id: start.call_sid,
                stream_id,
                custom_parameters: start.custom_parameters,
            })
        }
        InboundFrame::Media { media } => {
            if media.track.as_deref().is_some_and(|t| t != "inbound") {
                return Ok(TransportEvent::Ignored);
            }
            let data = BASE64
                .decode(media.payload.as_bytes())
                .map_err(|e| VoiceError::Codec(format!("invalid media payload: {}", e)))?;
            TransportEvent::Media(AudioChunk::new(data))
        }
        InboundFrame::Mark { mark } => TransportEvent::Mark(mark.name),
        InboundFrame::Stop => TransportEvent::Stop,
        InboundFrame::Other => TransportEvent::Ignored,
    };
    Ok(event)
}

/// An outbound transport event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

impl OutboundEvent {
    pub fn media(stream_sid: &str, audio: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: BASE64.encode(audio),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: OutboundMark {
                name: name.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    /// Serializes the event into a transport text frame.
    pub fn encode(&self) -> Result<String, VoiceError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Cuts synthesized audio into 20 ms media events followed by a mark.
///
/// The last frame is padded with silence so every frame is full length.
pub fn frame_audio(stream_sid: &str, audio: &[u8], mark_name: &str) -> Vec<OutboundEvent> {
    let mut events = Vec::with_capacity(audio.len() / FRAME_BYTES + 2);
    for chunk in audio.chunks(FRAME_BYTES) {
        if chunk.len() == FRAME_BYTES {
            events.push(OutboundEvent::media(stream_sid, chunk));
        } else {
            let mut padded = chunk.to_vec();
            padded.resize(FRAME_BYTES, MULAW_SILENCE);
            events.push(OutboundEvent::media(stream_sid, &padded));
        }
    }
    events.push(OutboundEvent::mark(stream_sid, mark_name));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_start_with_custom_parameters() {
        let text = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"from": "+15551234567", "tenant": "harbor"}
            },
            "streamSid": "MZ1"
        }"#;
        let TransportEvent::Start(start) = decode_event(text).unwrap() else {
            panic!("expected start event");
        };
        assert_eq!(start.call_id, "CA1");
        assert_eq!(start.stream_id, "MZ1");
        assert_eq!(start.caller_phone(), Some("+15551234567"));
        assert_eq!(start.tenant_id(), Some("harbor"));
    }

    #[test]
    fn decodes_media_payload() {
        let payload = BASE64.encode([0x7f, 0xff, 0x00]);
        let text = format!(
            r#"{{"event":"media","streamSid":"MZ1","media":{{"track":"inbound","chunk":"2","timestamp":"40","payload":"{}"}}}}"#,
            payload
        );
        match decode_event(&text).unwrap() {
            TransportEvent::Media(chunk) => assert_eq!(chunk.data, vec![0x7f, 0xff, 0x00]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn outbound_track_media_is_ignored() {
        let text = r#"{"event":"media","media":{"track":"outbound","payload":"AAAA"}}"#;
        assert_eq!(decode_event(text).unwrap(), TransportEvent::Ignored);
    }

    #[test]
    fn invalid_base64_is_a_codec_error() {
        let text = r#"{"event":"media","media":{"payload":"not base64!"}}"#;
        assert!(matches!(decode_event(text), Err(VoiceError::Codec(_))));
    }

    #[test]
    fn mark_and_stop_decode() {
        let mark = r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"reply-3"}}"#;
        assert_eq!(
            decode_event(mark).unwrap(),
            TransportEvent::Mark("reply-3".to_string())
        );
        let stop = r#"{"event":"stop","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#;
        assert_eq!(decode_event(stop).unwrap(), TransportEvent::Stop);
        let dtmf = r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#;
        assert_eq!(decode_event(dtmf).unwrap(), TransportEvent::Ignored);
    }

    #[test]
    fn framing_pads_last_frame_and_appends_mark() {
        let audio = vec![1u8; FRAME_BYTES * 2 + 10];
        let events = frame_audio("MZ1", &audio, "reply-1");
        assert_eq!(events.len(), 4);

        let OutboundEvent::Media { media, .. } = &events[2] else {
            panic!("expected media frame");
        };
        let last = BASE64.decode(&media.payload).unwrap();
        assert_eq!(last.len(), FRAME_BYTES);
        assert_eq!(&last[..10], &[1u8; 10]);
        assert!(last[10..].iter().all(|b| *b == MULAW_SILENCE));

        assert_eq!(events[3], OutboundEvent::mark("MZ1", "reply-1"));
    }

    #[test]
    fn outbound_events_use_transport_field_names() {
        let json: serde_json::Value =
            serde_json::from_str(&OutboundEvent::clear("MZ1").encode().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"event": "clear", "streamSid": "MZ1"}));

        let json: serde_json::Value =
            serde_json::from_str(&OutboundEvent::mark("MZ1", "m").encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "mark", "streamSid": "MZ1", "mark": {"name": "m"}})
        );
    }
}
