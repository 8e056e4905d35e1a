//! Error types shared by the relay and the client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No tunnel registered for subdomain '{0}'")]
    NoSuchTunnel(String),

    #[error("Control channel closed")]
    ChannelClosed,

    #[error("No response within the exchange deadline")]
    Timeout,

    #[error("Upstream client disconnected while the exchange was pending")]
    UpstreamUnavailable,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
