//! Transfer-level error types and the on-wire ERR payload convention.
//!
//! Codec-level errors ([`crate::packet::PacketError`]) never surface to a
//! peer: malformed datagrams are dropped silently at the socket layer.
//! Everything in this module describes failures that abort a transfer and
//! are reported exactly once, either to the peer as an ERR packet or to the
//! CLI as an exit code.

use std::time::Duration;

use thiserror::Error;

/// Two-digit error codes carried in ERR packet payloads as `NN:reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The server could not create the destination file for an upload.
    CannotCreate,
    /// A packet arrived that is impossible for the session's current state.
    BadState,
    /// The worker pool is saturated; no session was allocated.
    ServerBusy,
    /// The SYN negotiation payload failed to parse or validate.
    MalformedRequest,
    /// The requested file does not exist in the server store.
    FileNotFound,
    /// A local read or write failed mid-transfer.
    LocalIo,
    /// A code this implementation does not know.
    Unknown(u8),
}

impl ErrorCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::CannotCreate => 1,
            Self::BadState => 2,
            Self::ServerBusy => 3,
            Self::MalformedRequest => 4,
            Self::FileNotFound => 5,
            Self::LocalIo => 6,
            Self::Unknown(c) => *c,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::CannotCreate,
            2 => Self::BadState,
            3 => Self::ServerBusy,
            4 => Self::MalformedRequest,
            5 => Self::FileNotFound,
            6 => Self::LocalIo,
            c => Self::Unknown(c),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}", self.code())
    }
}

/// Build the UTF-8 payload of an ERR packet: `NN:reason`.
pub fn encode_err_payload(code: ErrorCode, reason: &str) -> Vec<u8> {
    format!("{code}:{reason}").into_bytes()
}

/// Parse an ERR packet payload back into `(code, reason)`.
///
/// A payload that does not follow the `NN:reason` convention is kept whole
/// as the reason with code `Unknown(0)`.
pub fn parse_err_payload(payload: &[u8]) -> (ErrorCode, String) {
    let text = String::from_utf8_lossy(payload);
    if let Some((code, reason)) = text.split_once(':') {
        if let Ok(n) = code.parse::<u8>() {
            return (ErrorCode::from_code(n), reason.to_string());
        }
    }
    (ErrorCode::Unknown(0), text.into_owned())
}

/// Errors that abort a transfer session.
#[derive(Debug, Error)]
pub enum TransferError {
    /// SYN (or SYN-ACK) retries were exhausted without a response.
    #[error("handshake failed after {0} attempts")]
    HandshakeFailed(u32),

    /// The peer reported an error via an ERR packet.
    #[error("peer error {code}: {reason}")]
    Peer { code: ErrorCode, reason: String },

    /// No packets from the peer within the idle bound.
    #[error("peer silent for {0:?}, giving up")]
    PeerGone(Duration),

    /// Local file I/O failed (FileSource or FileSink).
    #[error("local i/o error: {0}")]
    LocalIo(#[source] std::io::Error),

    /// Socket I/O failed.
    #[error("network error: {0}")]
    Network(#[source] std::io::Error),

    /// The peer sent a packet impossible for the session's current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_payload_roundtrip() {
        let payload = encode_err_payload(ErrorCode::FileNotFound, "no such file: a.bin");
        assert_eq!(payload, b"05:no such file: a.bin");
        let (code, reason) = parse_err_payload(&payload);
        assert_eq!(code, ErrorCode::FileNotFound);
        assert_eq!(reason, "no such file: a.bin");
    }

    #[test]
    fn err_payload_unknown_code() {
        let (code, reason) = parse_err_payload(b"99:strange");
        assert_eq!(code, ErrorCode::Unknown(99));
        assert_eq!(reason, "strange");
    }

    #[test]
    fn err_payload_without_convention() {
        let (code, reason) = parse_err_payload(b"something went wrong");
        assert_eq!(code, ErrorCode::Unknown(0));
        assert_eq!(reason, "something went wrong");
    }
}
