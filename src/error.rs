use thiserror::Error;

#[derive(Error, Debug)]
pub enum CIPulseError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("HTTP error: backend responded with status {status}")]
    Http { status: u16 },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Push channel error: {0}")]
    Channel(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CIPulseError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
            },
            None => Self::Network(err),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CIPulseError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

impl CIPulseError {
    /// Transport and HTTP failures are worth another fetch later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { .. } | Self::Channel(_))
    }
}

pub type Result<T> = std::result::Result<T, CIPulseError>;
