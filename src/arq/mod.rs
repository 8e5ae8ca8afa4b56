//! Automatic Repeat reQuest engines.
//!
//! Two interchangeable reliability strategies, negotiated per transfer:
//! - [`stop_and_wait`]: window of one, a single retransmit timer.
//! - [`selective_repeat`]: window of N, an independent timer per in-flight
//!   segment, selective acknowledgements, receive-side reordering buffer.
//!
//! Both are pure state machines: they build and interpret packets but never
//! touch a socket. The session layer owns all I/O and drives an engine
//! through the capability set on [`ArqSender`] and [`ArqReceiver`], which
//! wrap the concrete engines as tagged variants so none of their internal
//! state leaks into the session state machine.

pub mod selective_repeat;
pub mod stop_and_wait;

pub use selective_repeat::{SrReceiver, SrSender};
pub use stop_and_wait::{SawReceiver, SawSender};

use std::time::{Duration, Instant};

use crate::config;
use crate::packet::Packet;

/// Which ARQ strategy a transfer runs. Carried in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqKind {
    StopAndWait,
    SelectiveRepeat,
}

impl std::fmt::Display for ArqKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopAndWait => write!(f, "stop_and_wait"),
            Self::SelectiveRepeat => write!(f, "selective_repeat"),
        }
    }
}

/// Receive-side outcome of one inbound DATA segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The segment was in order; it and any contiguously buffered
    /// successors are ready for the sink, in sequence order.
    Delivered(Vec<Vec<u8>>),
    /// Out of order but inside the window; buffered for later delivery.
    Buffered,
    /// Already seen; the acknowledgement must be repeated, nothing else.
    Duplicate,
    /// Outside the receive window; dropped without acknowledgement.
    Ignored,
}

// ---------------------------------------------------------------------------
// Send side
// ---------------------------------------------------------------------------

/// Send half of an ARQ engine.
#[derive(Debug)]
pub enum ArqSender {
    StopAndWait(SawSender),
    SelectiveRepeat(SrSender),
}

impl ArqSender {
    /// Build the send half for `kind` with the default RTO and window.
    pub fn new(kind: ArqKind) -> Self {
        Self::with_rto(kind, config::SOCKET_TIMEOUT)
    }

    pub fn with_rto(kind: ArqKind, rto: Duration) -> Self {
        match kind {
            ArqKind::StopAndWait => Self::StopAndWait(SawSender::new(rto)),
            ArqKind::SelectiveRepeat => {
                Self::SelectiveRepeat(SrSender::new(config::SR_WINDOW, rto))
            }
        }
    }

    /// `true` when the window has room for another segment.
    pub fn can_send(&self) -> bool {
        match self {
            Self::StopAndWait(s) => s.can_send(),
            Self::SelectiveRepeat(s) => s.can_send(),
        }
    }

    /// Admit `chunk` into the send pipeline and return the DATA packet to
    /// transmit. Callers must check [`can_send`] first; the session
    /// suspends on a full window.
    ///
    /// [`can_send`]: Self::can_send
    pub fn offer_send(&mut self, chunk: Vec<u8>, now: Instant) -> Packet {
        match self {
            Self::StopAndWait(s) => s.offer_send(chunk, now),
            Self::SelectiveRepeat(s) => s.offer_send(chunk, now),
        }
    }

    /// Consume an acknowledgement for segment `ack`. Returns the number of
    /// newly acknowledged segments (0 for duplicates and strays).
    pub fn on_ack(&mut self, ack: u32) -> usize {
        match self {
            Self::StopAndWait(s) => s.on_ack(ack),
            Self::SelectiveRepeat(s) => s.on_ack(ack),
        }
    }

    /// Fire expired retransmit timers, returning the packets to resend.
    /// Each returned segment's timer is rescheduled a full RTO from `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<Packet> {
        match self {
            Self::StopAndWait(s) => s.tick(now),
            Self::SelectiveRepeat(s) => s.tick(now),
        }
    }

    /// Earliest pending retransmit deadline, if any segment is in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self {
            Self::StopAndWait(s) => s.next_deadline(),
            Self::SelectiveRepeat(s) => s.next_deadline(),
        }
    }

    /// `true` while at least one segment awaits acknowledgement.
    pub fn has_unacked(&self) -> bool {
        match self {
            Self::StopAndWait(s) => s.has_unacked(),
            Self::SelectiveRepeat(s) => s.has_unacked(),
        }
    }

    /// Number of segments currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        match self {
            Self::StopAndWait(s) => s.in_flight(),
            Self::SelectiveRepeat(s) => s.in_flight(),
        }
    }

    /// The sequence number the next offered chunk would take; after the
    /// last chunk is acknowledged this is the FIN sequence.
    pub fn next_seq(&self) -> u32 {
        match self {
            Self::StopAndWait(s) => s.next_seq(),
            Self::SelectiveRepeat(s) => s.next_seq(),
        }
    }
}

// ---------------------------------------------------------------------------
// Receive side
// ---------------------------------------------------------------------------

/// Receive half of an ARQ engine.
#[derive(Debug)]
pub enum ArqReceiver {
    StopAndWait(SawReceiver),
    SelectiveRepeat(SrReceiver),
}

impl ArqReceiver {
    /// Build the receive half for `kind` with the default window.
    pub fn new(kind: ArqKind) -> Self {
        match kind {
            ArqKind::StopAndWait => Self::StopAndWait(SawReceiver::new()),
            ArqKind::SelectiveRepeat => {
                Self::SelectiveRepeat(SrReceiver::new(config::SR_WINDOW))
            }
        }
    }

    /// Consume an inbound DATA segment.
    ///
    /// Returns the delivery outcome and, when the segment must be
    /// acknowledged, the ack number to send (the received segment itself;
    /// duplicate acknowledgements are idempotent). `None` means drop
    /// silently.
    pub fn on_data(&mut self, seq: u32, payload: &[u8]) -> (Delivery, Option<u32>) {
        match self {
            Self::StopAndWait(r) => r.on_data(seq, payload),
            Self::SelectiveRepeat(r) => r.on_data(seq, payload),
        }
    }

    /// Next in-order sequence number this receiver will deliver.
    pub fn expected(&self) -> u32 {
        match self {
            Self::StopAndWait(r) => r.expected(),
            Self::SelectiveRepeat(r) => r.expected(),
        }
    }

    /// `true` while out-of-order segments sit in the reorder buffer. A FIN
    /// arriving in this state means the peer closed over a hole.
    pub fn has_gaps(&self) -> bool {
        match self {
            Self::StopAndWait(_) => false,
            Self::SelectiveRepeat(r) => r.has_gaps(),
        }
    }
}
