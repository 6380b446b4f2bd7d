use async_trait::async_trait;
use calmline_types::voice::VoiceProfile;
use calmline_types::VoiceAdjustments;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::SynthesisConfig;
use crate::error::VoiceError;

/// Maximum text input size for synthesis (64 KiB). Prevents resource
/// exhaustion from oversized synthesis requests.
pub const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Turns text into transport-ready audio (8 kHz μ-law).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        profile: &VoiceProfile,
        adjustments: VoiceAdjustments,
    ) -> Result<Vec<u8>, VoiceError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    speed: f32,
}

/// Synthesis over the provider's HTTP text-to-speech endpoint.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl HttpSynthesizer {
    pub fn new(config: SynthesisConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!(
            "{}/v1/text-to-speech/{}?output_format={}",
            self.config.base_url.trim_end_matches('/'),
            voice_id,
            self.config.output_format
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        profile: &VoiceProfile,
        adjustments: VoiceAdjustments,
    ) -> Result<Vec<u8>, VoiceError> {
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config(
                "synthesis api_key is not configured".to_string(),
            ));
        }

        let tuned = profile.tuned(adjustments);
        let body = SynthesisRequest {
            text,
            model_id: profile.model.model_id(),
            voice_settings: VoiceSettings {
                stability: tuned.stability,
                similarity_boost: 0.75,
                speed: tuned.speed,
            },
        };

        let response = self
            .client
            .post(self.endpoint(&profile.voice_id))
            .header("xi-api-key", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "audio/basic")
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "service returned {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read audio: {}", e)))?;
        Ok(audio.to_vec())
    }
}

/// Service for generating speech from text with named voice profiles.
#[derive(Clone)]
pub struct SynthesisService {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    profiles: Arc<RwLock<HashMap<String, VoiceProfile>>>,
    timeout: Duration,
}

impl SynthesisService {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, timeout: Duration) -> Self {
        let mut profiles = HashMap::new();
        let default = VoiceProfile::default();
        profiles.insert(default.id.clone(), default);
        Self {
            synthesizer,
            profiles: Arc::new(RwLock::new(profiles)),
            timeout,
        }
    }

    /// Adds a voice profile to the service.
    pub async fn add_profile(&self, profile: VoiceProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile);
    }

    /// Retrieves a voice profile by ID.
    pub async fn get_profile(&self, id: &str) -> Option<VoiceProfile> {
        self.profiles.read().await.get(id).cloned()
    }

    /// Synthesizes `text` with the named profile, bounded by the service
    /// timeout.
    pub async fn synthesize(
        &self,
        text: &str,
        profile_id: &str,
        adjustments: VoiceAdjustments,
    ) -> Result<Vec<u8>, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }
        if text.trim().is_empty() {
            return Err(VoiceError::Synthesis("text is empty".to_string()));
        }

        let profile = self
            .get_profile(profile_id)
            .await
            .ok_or_else(|| VoiceError::ProfileNotFound(profile_id.to_string()))?;

        tokio::time::timeout(
            self.timeout,
            self.synthesizer.synthesize(text, &profile, adjustments),
        )
        .await
        .map_err(|_| VoiceError::Timeout("speech synthesis", self.timeout.as_millis() as u64))?
    }
}
