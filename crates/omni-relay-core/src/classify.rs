//! Error classifier.
//!
//! Every failure the relay can hit ends up as one [`ErrorKind`], which fixes
//! the WebSocket close code and the short reason the client sees. Region and
//! auth failures get their own codes in the 4000 range so client code can
//! stop reconnecting.

use serde::{Deserialize, Serialize};

use crate::error::{ConnectError, DecodeError, TransportError};

/// Maximum close-reason length allowed by RFC 6455 (125 byte payload minus the code).
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RegionUnsupported,
    AuthRejected,
    SchemaUnrecognized,
    TransportClosed,
    UpstreamInternal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::RegionUnsupported,
        ErrorKind::AuthRejected,
        ErrorKind::SchemaUnrecognized,
        ErrorKind::TransportClosed,
        ErrorKind::UpstreamInternal,
    ];

    /// WebSocket close code sent to the client.
    pub fn close_code(self) -> u16 {
        match self {
            ErrorKind::AuthRejected => 4001,
            ErrorKind::RegionUnsupported => 4003,
            ErrorKind::SchemaUnrecognized => 1007,
            ErrorKind::TransportClosed => 1001,
            ErrorKind::UpstreamInternal => 1011,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            ErrorKind::RegionUnsupported => "upstream rejects this network region",
            ErrorKind::AuthRejected => "upstream rejected the relay credential",
            ErrorKind::SchemaUnrecognized => "unrecognized frame",
            ErrorKind::TransportClosed => "connection closed",
            ErrorKind::UpstreamInternal => "upstream session failed",
        }
    }

    /// Region and auth failures will fail the same way on every retry.
    pub fn is_retriable(self) -> bool {
        !matches!(self, ErrorKind::RegionUnsupported | ErrorKind::AuthRejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RegionUnsupported => "region_unsupported",
            ErrorKind::AuthRejected => "auth_rejected",
            ErrorKind::SchemaUnrecognized => "schema_unrecognized",
            ErrorKind::TransportClosed => "transport_closed",
            ErrorKind::UpstreamInternal => "upstream_internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure ready to be sent as a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseNotice {
    pub kind: ErrorKind,
    pub code: u16,
    pub reason: String,
}

impl CloseNotice {
    pub fn new(kind: ErrorKind, detail: &str) -> Self {
        let reason = if detail.is_empty() {
            kind.reason().to_string()
        } else {
            format!("{}: {detail}", kind.reason())
        };
        Self {
            kind,
            code: kind.close_code(),
            reason: truncate_reason(&reason),
        }
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

pub fn classify_connect(err: &ConnectError) -> ErrorKind {
    match err {
        ConnectError::RegionUnsupported(_) => ErrorKind::RegionUnsupported,
        ConnectError::AuthRejected(_) => ErrorKind::AuthRejected,
        ConnectError::UpstreamInternal(_) | ConnectError::Timeout(_) => ErrorKind::UpstreamInternal,
    }
}

pub fn classify_decode(err: &DecodeError) -> ErrorKind {
    match err {
        DecodeError::UnrecognizedFrame(_) => ErrorKind::SchemaUnrecognized,
    }
}

pub fn classify_transport(err: &TransportError) -> ErrorKind {
    match err {
        TransportError::ClientClosed => ErrorKind::TransportClosed,
        TransportError::UpstreamClosed { code: None, .. }
        | TransportError::UpstreamClosed {
            code: Some(1000 | 1001),
            ..
        } => ErrorKind::TransportClosed,
        TransportError::UpstreamClosed { code: Some(_), reason } => {
            classify_connect(&classify_rejection(None, reason))
        }
    }
}

/// Turn an upstream rejection (HTTP status during the handshake, or the
/// reason text of a close frame) into a [`ConnectError`].
pub fn classify_rejection(http_status: Option<u16>, reason: &str) -> ConnectError {
    let lower = reason.to_ascii_lowercase();

    if lower.contains("location")
        || lower.contains("region")
        || lower.contains("country")
        || lower.contains("territory")
    {
        return ConnectError::RegionUnsupported(reason.to_string());
    }

    if matches!(http_status, Some(401 | 403))
        || lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("unauthenticated")
        || lower.contains("permission denied")
        || lower.contains("permission_denied")
    {
        return ConnectError::AuthRejected(reason.to_string());
    }

    ConnectError::UpstreamInternal(reason.to_string())
}
