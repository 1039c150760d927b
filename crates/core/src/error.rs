/// Errors raised by collaborators of the engagement core. None of these ever
/// reach the ingestion boundary; the engagement machine turns them into silence.
#[derive(Debug, thiserror::Error)]
pub enum EngageError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("prompt unavailable: {0}")]
    Prompt(String),
    #[error("channel closed")]
    ChannelClosed,
}
