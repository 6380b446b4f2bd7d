use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("recognition error: {0}")]
    Recognition(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("transport frame error: {0}")]
    Codec(String),

    #[error("transport frame JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} timed out after {1} ms")]
    Timeout(&'static str, u64),

    #[error("voice profile not found: {0}")]
    ProfileNotFound(String),
}
