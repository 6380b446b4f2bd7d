//! Streaming speech-recognition providers.
//!
//! A provider opens one connection per attempt. The connection is a pair of
//! channels: audio goes in, lifecycle and transcript events come out.
//! Dropping the audio sender closes the connection.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::codec::AudioChunk;
use crate::config::RecognitionConfig;
use crate::error::VoiceError;

/// WebSocket close code for a normal, intentional close.
pub const NORMAL_CLOSE: u16 = 1000;

const EVENT_BUFFER: usize = 64;

/// Lifecycle and result events emitted by a provider connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Open,
    Transcript { text: String, is_final: bool },
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// One live provider connection.
#[derive(Debug)]
pub struct RecognitionConnection {
    pub audio: mpsc::Sender<AudioChunk>,
    pub events: mpsc::Receiver<ProviderEvent>,
}

impl RecognitionConnection {
    pub fn new(audio: mpsc::Sender<AudioChunk>, events: mpsc::Receiver<ProviderEvent>) -> Self {
        Self { audio, events }
    }

    /// Releases both ends; the provider side sees its audio channel close.
    pub fn close(self) {
        drop(self.audio);
        drop(self.events);
    }
}

#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Opens a new connection for the given session.
    ///
    /// `audio_capacity` bounds the connection's inbound audio channel.
    async fn connect(
        &self,
        session_id: &str,
        audio_capacity: usize,
    ) -> Result<RecognitionConnection, VoiceError>;
}

/// Recognition over a streaming WebSocket API.
///
/// Audio is sent as binary μ-law frames; results arrive as JSON messages
/// carrying `is_final` and `channel.alternatives[0].transcript`.
#[derive(Debug, Clone)]
pub struct StreamingRecognizer {
    config: RecognitionConfig,
}

impl StreamingRecognizer {
    pub fn new(config: RecognitionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RecognitionProvider for StreamingRecognizer {
    async fn connect(
        &self,
        session_id: &str,
        audio_capacity: usize,
    ) -> Result<RecognitionConnection, VoiceError> {
        if !self.config.is_enabled() {
            return Err(VoiceError::Config(
                "recognition api_key is not configured".to_string(),
            ));
        }

        let mut request = self
            .config
            .listen_url()
            .into_client_request()
            .map_err(|e| VoiceError::Config(format!("invalid recognition url: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|_| VoiceError::Config("invalid recognition api_key".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let timeout = self.config.connect_timeout();
        let (socket, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    VoiceError::Timeout("recognition connect", timeout.as_millis() as u64)
                })?
                .map_err(|e| VoiceError::Recognition(format!("connect failed: {}", e)))?;

        tracing::debug!(session_id, "recognition socket connected");

        let (mut sink, mut stream) = socket.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<AudioChunk>(audio_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(EVENT_BUFFER);

        // The handshake succeeded, so the connection is open.
        let _ = event_tx.send(ProviderEvent::Open).await;

        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                if let Err(e) = sink.send(Message::Binary(chunk.data.into())).await {
                    let _ = writer_events
                        .send(ProviderEvent::Error(format!("audio send failed: {}", e)))
                        .await;
                    return;
                }
            }
            // Audio sender dropped: ask the service to flush, then close.
            let _ = sink
                .send(Message::Text(r#"{"type":"CloseStream"}"#.to_string().into()))
                .await;
            let _ = sink.close().await;
        });

        let session = session_id.to_string();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => match parse_result(text.as_str()) {
                        Some(event) => event,
                        None => continue,
                    },
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(frame) => (
                                Some(u16::from(frame.code)),
                                frame.reason.as_str().to_string(),
                            ),
                            None => (None, String::new()),
                        };
                        let _ = event_tx.send(ProviderEvent::Closed { code, reason }).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => ProviderEvent::Error(e.to_string()),
                };
                let stop = matches!(event, ProviderEvent::Error(_));
                if event_tx.send(event).await.is_err() {
                    tracing::debug!(session_id = %session, "recognition consumer gone");
                    return;
                }
                if stop {
                    return;
                }
            }
            let _ = event_tx
                .send(ProviderEvent::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                })
                .await;
        });

        Ok(RecognitionConnection::new(audio_tx, event_rx))
    }
}

#[derive(Deserialize)]
struct ResultMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
    #[serde(default)]
    channel: Option<ResultChannel>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct ResultChannel {
    #[serde(default)]
    alternatives: Vec<ResultAlternative>,
}

#[derive(Deserialize)]
struct ResultAlternative {
    #[serde(default)]
    transcript: String,
}

/// Maps one service message onto a provider event.
///
/// Metadata and empty interim results produce nothing.
pub fn parse_result(text: &str) -> Option<ProviderEvent> {
    let message: ResultMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable recognition message");
            return None;
        }
    };

    if message.kind.as_deref() == Some("Error") {
        return Some(ProviderEvent::Error(
            message
                .description
                .unwrap_or_else(|| "recognition service error".to_string()),
        ));
    }

    let transcript = message
        .channel?
        .alternatives
        .into_iter()
        .next()
        .map(|alt| alt.transcript.trim().to_string())
        .unwrap_or_default();
    let is_final = message.is_final || message.speech_final;

    if transcript.is_empty() && !is_final {
        return None;
    }
    Some(ProviderEvent::Transcript {
        text: transcript,
        is_final,
    })
}
