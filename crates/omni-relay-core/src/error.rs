use std::time::Duration;

use thiserror::Error;

/// Failure while opening the upstream realtime session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Upstream refuses requests from the relay's network origin.
    #[error("region unsupported: {0}")]
    RegionUnsupported(String),

    #[error("auth rejected: {0}")]
    AuthRejected(String),

    #[error("upstream error: {0}")]
    UpstreamInternal(String),

    #[error("connect timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// A frame that could not be mapped onto a [`crate::message::RelayMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unrecognized frame: {0}")]
    UnrecognizedFrame(String),
}

/// One side of the relay went away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("client closed the connection")]
    ClientClosed,

    #[error("upstream closed the session{}: {reason}", code.map(|c| format!(" ({c})")).unwrap_or_default())]
    UpstreamClosed { code: Option<u16>, reason: String },
}

impl TransportError {
    /// Upstream closed without a close frame (stream ended or socket dropped).
    pub fn upstream_eof() -> Self {
        Self::UpstreamClosed {
            code: None,
            reason: "upstream stream ended".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
