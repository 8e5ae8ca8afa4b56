//! Connection establishment: the negotiation codec and the client side of
//! the three-way exchange.
//!
//! A transfer starts with a SYN to the server's well-known port whose
//! payload names the operation (upload or download), the remote filename,
//! and the ARQ protocol to run. The server answers SYN-ACK *from a freshly
//! bound ephemeral port*; the client reseats its peer address to that port
//! for all subsequent traffic, which keeps per-session datagrams off the
//! listener socket entirely. The client's final ACK is sent once and never
//! retransmitted: if it is lost, the server's SYN-ACK retransmissions (or
//! the first DATA packet) heal the exchange.
//!
//! The handshake-completion ACK (and every repeat of it) carries the
//! reserved acknowledgement number [`HANDSHAKE_ACK`] instead of 0, so on
//! the wire it can never be mistaken for the acknowledgement of data
//! segment 0 by a sender whose first segment is still in flight.
//!
//! The server half of establishment lives in [`crate::server`].

use std::net::SocketAddr;

use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::arq::ArqKind;
use crate::config::{MAX_SYN_RETRIES, SOCKET_TIMEOUT};
use crate::error::{parse_err_payload, TransferError};
use crate::packet::{flags, Packet};
use crate::socket::RdtSocket;
use crate::state::SessionState;

/// Longest filename accepted on the wire.
pub const MAX_FILENAME: usize = 255;

/// Acknowledgement number of the client's handshake-completion ACK.
///
/// Data segments are numbered from 0, one per kibibyte, so no practical
/// transfer ever reaches this value; an ACK carrying it is always a
/// handshake echo, never the acknowledgement of a data segment.
pub const HANDSHAKE_ACK: u32 = u32::MAX;

/// Transfer direction, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Download,
}

impl Operation {
    fn to_byte(self) -> u8 {
        match self {
            Self::Upload => 0x01,
            Self::Download => 0x02,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Upload),
            0x02 => Some(Self::Download),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload => write!(f, "UPLOAD"),
            Self::Download => write!(f, "DOWNLOAD"),
        }
    }
}

fn protocol_to_byte(kind: ArqKind) -> u8 {
    match kind {
        ArqKind::StopAndWait => 0x01,
        ArqKind::SelectiveRepeat => 0x02,
    }
}

fn protocol_from_byte(b: u8) -> Option<ArqKind> {
    match b {
        0x01 => Some(ArqKind::StopAndWait),
        0x02 => Some(ArqKind::SelectiveRepeat),
        _ => None,
    }
}

/// Reasons a negotiation payload or filename is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("malformed negotiation payload")]
    Malformed,
    #[error("bad filename: {0}")]
    BadFilename(&'static str),
}

/// Reject filenames that are empty, oversized, traverse directories, or
/// smuggle path separators. The server store is flat.
pub fn validate_filename(name: &str) -> Result<(), HandshakeError> {
    if name.is_empty() {
        return Err(HandshakeError::BadFilename("empty"));
    }
    if name.len() > MAX_FILENAME {
        return Err(HandshakeError::BadFilename("too long"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(HandshakeError::BadFilename("path separator"));
    }
    if name == "." || name == ".." {
        return Err(HandshakeError::BadFilename("directory reference"));
    }
    if name.contains('\0') {
        return Err(HandshakeError::BadFilename("NUL byte"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Negotiation payloads
// ---------------------------------------------------------------------------

/// The SYN payload: what the client wants from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub operation: Operation,
    pub protocol: ArqKind,
    pub filename: String,
}

impl HandshakeRequest {
    /// Layout: operation byte, protocol byte, u16-BE filename length,
    /// filename bytes.
    pub fn encode(&self) -> Vec<u8> {
        let name = self.filename.as_bytes();
        let mut buf = Vec::with_capacity(4 + name.len());
        buf.push(self.operation.to_byte());
        buf.push(protocol_to_byte(self.protocol));
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, HandshakeError> {
        if payload.len() < 4 {
            return Err(HandshakeError::Malformed);
        }
        let operation = Operation::from_byte(payload[0]).ok_or(HandshakeError::Malformed)?;
        let protocol = protocol_from_byte(payload[1]).ok_or(HandshakeError::Malformed)?;
        let name_len = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        if payload.len() != 4 + name_len {
            return Err(HandshakeError::Malformed);
        }
        let filename = std::str::from_utf8(&payload[4..])
            .map_err(|_| HandshakeError::Malformed)?
            .to_string();
        validate_filename(&filename)?;
        Ok(Self {
            operation,
            protocol,
            filename,
        })
    }
}

/// Encode the SYN-ACK payload: the file size for a download, empty for an
/// upload acknowledgement.
pub fn encode_syn_ack_payload(file_size: Option<u64>) -> Vec<u8> {
    match file_size {
        Some(size) => size.to_be_bytes().to_vec(),
        None => Vec::new(),
    }
}

/// Parse a SYN-ACK payload. An 8-byte payload is a file size; anything
/// else means no size was advertised.
pub fn decode_syn_ack_payload(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Client connect
// ---------------------------------------------------------------------------

/// Perform the client side of the handshake against `listener`.
///
/// Retransmits the SYN on RTO up to [`MAX_SYN_RETRIES`] times. On SYN-ACK
/// the returned address is the server's per-session port; the caller must
/// direct all further traffic there. The advertised file size (downloads
/// only) is returned alongside.
pub async fn connect(
    socket: &RdtSocket,
    listener: SocketAddr,
    request: &HandshakeRequest,
) -> Result<(SocketAddr, Option<u64>), TransferError> {
    let syn = Packet::syn(request.encode());
    let mut state = SessionState::SynSent;

    for attempt in 1..=MAX_SYN_RETRIES {
        socket
            .send_to(&syn, listener)
            .await
            .map_err(TransferError::Network)?;
        log::debug!(
            "[handshake] → SYN {} {} {} (attempt {attempt}/{MAX_SYN_RETRIES})",
            request.operation,
            request.filename,
            request.protocol
        );

        let deadline = Instant::now() + SOCKET_TIMEOUT;
        loop {
            let received = match timeout_at(deadline, socket.recv_from()).await {
                Ok(res) => res.map_err(TransferError::Network)?,
                Err(_elapsed) => break, // RTO; retransmit the SYN
            };
            let (pkt, from) = received;
            // The SYN-ACK arrives from a new port on the server host; ERR
            // validation failures come from the listener itself.
            if from.ip() != listener.ip() {
                log::trace!("[handshake] ignoring packet from unrelated host {from}");
                continue;
            }

            let h = &pkt.header;
            if h.has(flags::ERR) {
                let (code, reason) = parse_err_payload(&pkt.payload);
                log::debug!("[handshake] ← ERR {code}: {reason}");
                return Err(TransferError::Peer { code, reason });
            }
            if h.has(flags::SYN | flags::ACK) {
                let file_size = decode_syn_ack_payload(&pkt.payload);
                // Final ACK: sent exactly once, by design never retried.
                socket
                    .send_to(&Packet::ack(HANDSHAKE_ACK), from)
                    .await
                    .map_err(TransferError::Network)?;
                state = SessionState::Established;
                log::debug!(
                    "[handshake] ← SYN-ACK from {from}; → ACK; {state}{}",
                    match file_size {
                        Some(n) => format!(" (remote size {n} bytes)"),
                        None => String::new(),
                    }
                );
                return Ok((from, file_size));
            }
            log::trace!(
                "[handshake] ignoring unexpected packet (flags {:#06x}) in {state}",
                h.flags
            );
        }
    }

    log::warn!("[handshake] no SYN-ACK after {MAX_SYN_RETRIES} attempts");
    Err(TransferError::HandshakeFailed(MAX_SYN_RETRIES))
}

/// Answer a retransmitted SYN-ACK during the data phase: the server missed
/// our final ACK, so repeat it. Carries [`HANDSHAKE_ACK`], which a data
/// sender must never feed into its ARQ engine.
pub fn reack() -> Packet {
    Packet::ack(HANDSHAKE_ACK)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
