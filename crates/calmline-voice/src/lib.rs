//! Voice plumbing for Calmline calls.
//!
//! Covers everything between the telephony socket and the dialogue layer:
//! the transport frame codec, per-session audio flow control, the streaming
//! recognition provider and its supervised channel, and speech synthesis.

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod flow;
pub mod recognition;
pub mod synthesis;

pub use channel::{
    ChannelEvent, ChannelSettings, ChannelState, RecognitionChannel, TranscriptFragment,
};
pub use codec::{decode_event, frame_audio, AudioChunk, OutboundEvent, StreamStart, TransportEvent};
pub use config::{RecognitionConfig, SynthesisConfig};
pub use error::VoiceError;
pub use flow::{AudioFlowController, EnqueueOutcome, DEFAULT_QUEUE_CAPACITY};
pub use recognition::{
    ProviderEvent, RecognitionConnection, RecognitionProvider, StreamingRecognizer,
};
pub use synthesis::{HttpSynthesizer, SpeechSynthesizer, SynthesisService};
