//! Voice profile and model definitions.
//!
//! A `VoiceProfile` maps a logical ID (referenced by a practice profile) to a
//! synthesis model and the voice parameters the synthesis service expects.

use serde::{Deserialize, Serialize};

use crate::VoiceAdjustments;

/// Synthesis model tiers offered by the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceModel {
    /// Low-latency model tuned for telephony.
    #[default]
    Turbo,
    /// Higher quality, slower model.
    Multilingual,
}

impl VoiceModel {
    /// Model identifier sent to the synthesis service.
    pub fn model_id(self) -> &'static str {
        match self {
            Self::Turbo => "eleven_turbo_v2_5",
            Self::Multilingual => "eleven_multilingual_v2",
        }
    }
}

/// A voice profile configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Unique identifier for the voice profile.
    pub id: String,
    /// Provider-side voice identifier.
    pub voice_id: String,
    /// The synthesis model.
    #[serde(default)]
    pub model: VoiceModel,
    /// Baseline tuning; per-response adjustments are layered on top.
    #[serde(default)]
    pub baseline: VoiceAdjustments,
}

impl VoiceProfile {
    /// Combines the profile baseline with a per-response adjustment.
    ///
    /// Speed multiplies; stability takes the steadier of the two values so
    /// that calming adjustments are never undone by the baseline.
    pub fn tuned(&self, adjustments: VoiceAdjustments) -> VoiceAdjustments {
        VoiceAdjustments {
            speed: (self.baseline.speed * adjustments.speed).clamp(0.7, 1.2),
            stability: self.baseline.stability.max(adjustments.stability).clamp(0.0, 1.0),
        }
    }
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            voice_id: "EXAVITQu4vr4xnSDxMaL".to_string(),
            model: VoiceModel::Turbo,
            baseline: VoiceAdjustments::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuned_voice_is_clamped_to_telephony_range() {
        let profile = VoiceProfile::default();
        let tuned = profile.tuned(VoiceAdjustments {
            speed: 0.1,
            stability: 0.9,
        });
        assert_eq!(tuned.speed, 0.7);
        assert_eq!(tuned.stability, 0.9);
    }

    #[test]
    fn baseline_stability_is_a_floor() {
        let profile = VoiceProfile {
            baseline: VoiceAdjustments {
                speed: 1.0,
                stability: 0.8,
            },
            ..VoiceProfile::default()
        };
        let tuned = profile.tuned(VoiceAdjustments::default());
        assert_eq!(tuned.stability, 0.8);
        assert_eq!(tuned.speed, 1.0);
    }
}
