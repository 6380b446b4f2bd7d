//! Error types for staff notification.

/// Errors that can occur while routing or delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// A database operation failed.
    #[error("notification database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection was available.
    #[error("notification pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization failed.
    #[error("notification serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking database task panicked or was cancelled.
    #[error("notification store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A delivery provider rejected or failed the request.
    #[error("{channel} delivery failed: {message}")]
    Delivery {
        channel: &'static str,
        message: String,
    },

    /// A provider is missing required settings.
    #[error("{0} provider is not configured")]
    NotConfigured(&'static str),
}
