use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_recognition_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_recognition_model() -> String {
    "nova-2-phonecall".to_string()
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_endpointing_ms() -> u64 {
    300
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_synthesis_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_output_format() -> String {
    "ulaw_8000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Streaming speech-recognition service settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// WebSocket endpoint of the streaming recognition service.
    #[serde(default = "default_recognition_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_recognition_model")]
    pub model: String,
    /// Sample rate of the telephony audio (8 kHz μ-law).
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Silence, in milliseconds, the service waits before finalizing speech.
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u64,
    /// Maximum time to wait for the socket handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            url: default_recognition_url(),
            api_key: String::new(),
            model: default_recognition_model(),
            sample_rate: default_sample_rate(),
            endpointing_ms: default_endpointing_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl fmt::Debug for RecognitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("sample_rate", &self.sample_rate)
            .field("endpointing_ms", &self.endpointing_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl RecognitionConfig {
    /// Full listen URL including the audio format and result options.
    pub fn listen_url(&self) -> String {
        format!(
            "{}?model={}&encoding=mulaw&sample_rate={}&channels=1&interim_results=true&punctuate=true&endpointing={}",
            self.url, self.model, self.sample_rate, self.endpointing_ms
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Speech-synthesis service settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Audio format requested from the service; must match the transport.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_synthesis_url(),
            api_key: String::new(),
            output_format: default_output_format(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("output_format", &self.output_format)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl SynthesisConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
