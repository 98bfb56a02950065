use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// REST call failed: non-2xx status (`status` is set) or network failure
    #[error("Fetch error ({}): {message}", .status.map_or_else(|| "network".to_string(), |s| s.to_string()))]
    Fetch { status: Option<u16>, message: String },

    /// Why a live channel session ended; logged and recovered by reconnecting
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed payload from the backend
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The session lacks something the operation needs
    #[error("Session error: {0}")]
    Session(String),

    /// The owning feed was torn down before the operation finished
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn network(err: impl std::fmt::Display) -> Self {
        Self::Fetch { status: None, message: err.to_string() }
    }

    /// Network failures and 5xx responses are worth another attempt; 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { status: None, .. } => true,
            Self::Fetch { status: Some(code), .. } => *code >= 500,
            Self::Transport(_) => true,
            _ => false,
        }
    }
}
