//! Wire-format definitions for protocol datagrams.
//!
//! Every datagram exchanged between peers is a [`Packet`]: a fixed 16-byte
//! big-endian header followed by at most [`MAX_PAYLOAD`] payload bytes.
//! This module is responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission,
//!   computing the CRC-32 checksum over the zero-checksum header plus the
//!   payload.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated, corrupted, or inconsistent input.
//!
//! No I/O happens here; this is pure data transformation.

use crc::Crc;
use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Connection request; payload carries the transfer negotiation.
    pub const SYN: u16 = 0x01;
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 0x02;
    /// Finish; the data sender has nothing further to transmit.
    pub const FIN: u16 = 0x04;
    /// Payload carries file bytes.
    pub const DATA: u16 = 0x08;
    /// Payload carries a UTF-8 error reason; the session is aborted.
    pub const ERR: u16 = 0x10;
}

/// Serialized header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Maximum payload bytes per packet.
pub const MAX_PAYLOAD: usize = 1024;

/// Largest datagram this protocol ever puts on the wire.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Flag combinations this protocol emits. Anything else is rejected on
/// decode.
const VALID_FLAGS: &[u16] = &[
    flags::SYN,
    flags::SYN | flags::ACK,
    flags::ACK,
    flags::FIN,
    flags::FIN | flags::ACK,
    flags::DATA,
    flags::ERR,
];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Reasons a byte buffer fails to decode as a [`Packet`].
///
/// Callers at the socket layer drop these silently; a corrupted datagram is
/// indistinguishable from a lost one as far as the peer is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),
    #[error("checksum mismatch: expected {expected:#010x}, got {got:#010x}")]
    BadChecksum { expected: u32, got: u32 },
    #[error("declared payload length {declared} disagrees with datagram ({actual} bytes)")]
    BadLength { declared: u16, actual: usize },
    #[error("unknown flag combination {0:#06x}")]
    UnknownFlagCombination(u16),
}

// ---------------------------------------------------------------------------
// Header and Packet
// ---------------------------------------------------------------------------

/// Fixed-size protocol header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Data segment index, starting at 0 for the transfer's first DATA
    /// packet. Control packets use 0 unless stated otherwise.
    pub seq: u32,
    /// Segment being acknowledged. Meaningful only with the ACK flag set.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
    /// CRC-32 over the header (with this field zeroed) and the payload.
    pub checksum: u32,
    /// Length of the payload in bytes; validated against the datagram on
    /// decode.
    pub payload_len: u16,
}

impl Header {
    /// `true` when every bit of `flag` is set.
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }
}

/// A complete protocol datagram: header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    fn new(seq: u32, ack: u32, flags: u16, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self {
            header: Header {
                seq,
                ack,
                flags,
                checksum: 0, // filled in by encode
                payload_len: payload.len() as u16,
            },
            payload,
        }
    }

    /// A file-data segment.
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self::new(seq, 0, flags::DATA, payload)
    }

    /// An acknowledgement of segment `ack`.
    pub fn ack(ack: u32) -> Self {
        Self::new(0, ack, flags::ACK, Vec::new())
    }

    /// A connection request carrying the negotiation payload.
    pub fn syn(payload: Vec<u8>) -> Self {
        Self::new(0, 0, flags::SYN, payload)
    }

    /// The server's handshake response, sent from the session socket.
    pub fn syn_ack(payload: Vec<u8>) -> Self {
        Self::new(0, 0, flags::SYN | flags::ACK, payload)
    }

    /// End of the data stream. `seq` is the first unused segment index.
    pub fn fin(seq: u32) -> Self {
        Self::new(seq, 0, flags::FIN, Vec::new())
    }

    /// Response acknowledging a FIN with sequence `ack`.
    pub fn fin_ack(ack: u32) -> Self {
        Self::new(0, ack, flags::FIN | flags::ACK, Vec::new())
    }

    /// A fatal error report; `payload` is a UTF-8 `NN:reason` string.
    pub fn err(payload: Vec<u8>) -> Self {
        Self::new(0, 0, flags::ERR, payload)
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The checksum is computed with the checksum field zeroed, then patched
    /// into bytes 10..14.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.seq.to_be_bytes());
        buf.extend_from_slice(&self.header.ack.to_be_bytes());
        buf.extend_from_slice(&self.header.flags.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let sum = CHECKSUM.checksum(&buf);
        buf[10..14].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Rejects short buffers, length disagreements, flag combinations the
    /// protocol never produces, and checksum mismatches, in that order.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_LEN {
            return Err(PacketError::TooShort(data.len()));
        }

        let seq = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let ack = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let flag_bits = u16::from_be_bytes(data[8..10].try_into().unwrap());
        let checksum = u32::from_be_bytes(data[10..14].try_into().unwrap());
        let payload_len = u16::from_be_bytes(data[14..16].try_into().unwrap());

        let actual = data.len() - HEADER_LEN;
        if payload_len as usize != actual || actual > MAX_PAYLOAD {
            return Err(PacketError::BadLength {
                declared: payload_len,
                actual,
            });
        }

        if !VALID_FLAGS.contains(&flag_bits) {
            return Err(PacketError::UnknownFlagCombination(flag_bits));
        }
        // A payload is only legal on packets that define one.
        if actual > 0 && flag_bits & (flags::DATA | flags::SYN | flags::ERR) == 0 {
            return Err(PacketError::UnknownFlagCombination(flag_bits));
        }

        let mut zeroed = data.to_vec();
        zeroed[10..14].copy_from_slice(&[0; 4]);
        let expected = CHECKSUM.checksum(&zeroed);
        if expected != checksum {
            return Err(PacketError::BadChecksum {
                expected,
                got: checksum,
            });
        }

        Ok(Self {
            header: Header {
                seq,
                ack,
                flags: flag_bits,
                checksum,
                payload_len,
            },
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
