use thiserror::Error;

#[derive(Error, Debug)]
pub enum DialogueError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("generation timed out after {0} ms")]
    GenerationTimeout(u64),

    #[error("practice configuration error: {0}")]
    Configuration(String),

    #[error("intake record is incomplete: missing {0}")]
    IncompleteIntake(&'static str),
}
