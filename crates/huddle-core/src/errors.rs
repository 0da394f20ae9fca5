use thiserror::Error;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("settings io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("roster dispatcher is not running")]
    DispatcherClosed,
    #[error("roster dispatcher dropped the reply")]
    ReplyDropped,
}
