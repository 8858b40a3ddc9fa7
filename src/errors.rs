/// Domain-specific error types for the simulator engine.
/// The engine keeps running on every variant except `StateCorruption`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage quota exceeded: need {needed} bytes, quota {quota}")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown screen: {0}")]
    UnknownScreen(String),

    #[error("screen {screen_id} is sold out for {date}")]
    SoldOut { screen_id: String, date: String },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("state corruption: {0}")]
    StateCorruption(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
