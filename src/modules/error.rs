use thiserror::Error;

/// Everything that can go wrong between the dashboard and the backend.
#[derive(Debug, Error)]
pub enum Error {
    /// Network unreachable, CORS, mixed content, connection reset.
    #[error("{0}")]
    Transport(String),

    /// Non-2xx response.
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    /// The backend answered `success: false`.
    #[error("{0}")]
    Application(String),

    /// Every polled resource failed in one refresh cycle.
    #[error("All {failed} API calls failed. First error: {first}")]
    TotalFailure { failed: usize, first: String },

    #[error("Cannot connect to server (tried both HTTPS and HTTP): {0}")]
    FallbackExhausted(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Admin privileges required")]
    NotAdmin,

    #[error("Please load user first")]
    NoSession,

    #[error("Insufficient tokens! You need {required} tokens to access a link (balance: {balance}).")]
    InsufficientTokens { balance: i64, required: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("cannot {action} an item that is already {from}")]
    InvalidTransition { from: String, action: &'static str },
}

impl Error {
    /// Transport-level failures are the only ones worth a protocol downgrade.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Error::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            }
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
