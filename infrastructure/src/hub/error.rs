use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid hub url: {0}")]
    InvalidUrl(String),

    #[error("hub negotiation failed: {0}")]
    Negotiate(String),

    #[error("hub http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hub transport error: {0}")]
    Transport(#[from] Box<tungstenite::Error>),

    #[error("hub handshake failed: {0}")]
    Handshake(String),

    #[error("malformed hub message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("hub connection is not connected")]
    NotConnected,

    #[error("hub connection was already started")]
    AlreadyStarted,

    #[error("hub connection closed before the invocation completed")]
    ConnectionClosed,

    #[error("hub invocation failed: {0}")]
    Invocation(String),
}

impl From<tungstenite::Error> for HubError {
    fn from(err: tungstenite::Error) -> Self {
        HubError::Transport(Box::new(err))
    }
}
