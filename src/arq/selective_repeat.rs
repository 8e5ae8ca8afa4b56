//! Selective Repeat ARQ: window of N, per-segment timers.
//!
//! # Protocol contract
//!
//! - Up to `window_size` segments may be in flight simultaneously, each
//!   with its own retransmit timer; a timeout resends that segment only.
//! - Acknowledgements are selective: `ack == seq` of the received segment,
//!   never cumulative. Duplicate ACKs are idempotent.
//! - The send base slides past the longest contiguous acknowledged prefix,
//!   admitting new segments.
//! - The receiver buffers out-of-order segments inside its window and
//!   delivers only the in-order prefix; nothing ever reaches the sink out
//!   of order.
//!
//! # Sequence-number layout (send side)
//!
//! ```text
//!  base               next_seq
//!    │                    │
//!  ──┼────────────────────┼──────────────────▶ seq space
//!    │ ◀── in flight ──▶  │ ◀── sendable ──▶
//!    │    (≤ window_size, some may be acked but unslid)
//! ```
//!
//! These types only manage state; all socket I/O is the caller's
//! responsibility.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::packet::Packet;

use super::Delivery;

// ---------------------------------------------------------------------------
// Send side
// ---------------------------------------------------------------------------

/// One slot of the retransmit window.
#[derive(Debug, Clone)]
struct Slot {
    /// The segment, kept whole for retransmission.
    packet: Packet,
    /// When this segment's own timer fires next. Meaningless once acked.
    deadline: Instant,
    /// Acked segments stay in the window until the base slides past them.
    acked: bool,
    /// Total number of times this segment has been transmitted.
    tx_count: u32,
}

/// Selective Repeat send-side state for one transfer.
#[derive(Debug)]
pub struct SrSender {
    /// Sequence number of the oldest unslid segment (left window edge).
    base: u32,
    /// Sequence number the next offered chunk will take.
    next_seq: u32,
    window_size: usize,
    window: BTreeMap<u32, Slot>,
    rto: Duration,
}

impl SrSender {
    pub fn new(window_size: usize, rto: Duration) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            base: 0,
            next_seq: 0,
            window_size,
            window: BTreeMap::new(),
            rto,
        }
    }

    /// `true` when there is room for at least one more in-flight segment.
    pub fn can_send(&self) -> bool {
        ((self.next_seq - self.base) as usize) < self.window_size
    }

    /// Admit one chunk, returning the DATA packet to transmit and arming
    /// its timer.
    ///
    /// # Panics
    ///
    /// Panics in debug mode when the window is full. Check [`can_send`]
    /// first.
    ///
    /// [`can_send`]: Self::can_send
    pub fn offer_send(&mut self, chunk: Vec<u8>, now: Instant) -> Packet {
        debug_assert!(
            self.can_send(),
            "offer_send on a full window ({} / {})",
            self.next_seq - self.base,
            self.window_size
        );
        let packet = Packet::data(self.next_seq, chunk);
        self.window.insert(
            self.next_seq,
            Slot {
                packet: packet.clone(),
                deadline: now + self.rto,
                acked: false,
                tx_count: 1,
            },
        );
        self.next_seq += 1;
        packet
    }

    /// Process a selective acknowledgement for segment `ack`.
    ///
    /// Marks the segment acknowledged and cancels its timer; when the ack
    /// lands on the base, the base slides past every contiguous
    /// acknowledged segment. Returns 1 for a fresh ack, 0 for duplicates
    /// and strays.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        let Some(slot) = self.window.get_mut(&ack) else {
            return 0; // behind the base or never sent
        };
        if slot.acked {
            return 0;
        }
        slot.acked = true;

        while let Some(front) = self.window.get(&self.base) {
            if !front.acked {
                break;
            }
            self.window.remove(&self.base);
            self.base += 1;
        }
        1
    }

    /// Retransmit every unacked segment whose timer expired. Each one's
    /// timer restarts independently; nothing else is touched.
    pub fn tick(&mut self, now: Instant) -> Vec<Packet> {
        let mut due = Vec::new();
        for slot in self.window.values_mut() {
            if !slot.acked && slot.deadline <= now {
                slot.deadline = now + self.rto;
                slot.tx_count += 1;
                due.push(slot.packet.clone());
            }
        }
        due
    }

    /// Earliest timer among unacked segments.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.window
            .values()
            .filter(|s| !s.acked)
            .map(|s| s.deadline)
            .min()
    }

    pub fn has_unacked(&self) -> bool {
        self.window.values().any(|s| !s.acked)
    }

    pub fn in_flight(&self) -> usize {
        self.window.values().filter(|s| !s.acked).count()
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    #[cfg(test)]
    fn tx_count(&self, seq: u32) -> u32 {
        self.window.get(&seq).map_or(0, |s| s.tx_count)
    }
}

// ---------------------------------------------------------------------------
// Receive side
// ---------------------------------------------------------------------------

/// Selective Repeat receive-side state for one transfer.
#[derive(Debug)]
pub struct SrReceiver {
    /// Next in-order sequence number to deliver (left window edge).
    expected: u32,
    window_size: usize,
    /// Out-of-order segments keyed by sequence, all within
    /// `expected..expected + window_size`.
    buffer: BTreeMap<u32, Vec<u8>>,
}

impl SrReceiver {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            expected: 0,
            window_size,
            buffer: BTreeMap::new(),
        }
    }

    /// Process an inbound segment.
    ///
    /// - behind the window: duplicate of delivered data, re-ack;
    /// - in the window, on the base: deliver it plus the contiguous
    ///   buffered run, advance the base;
    /// - in the window, past the base: buffer (idempotently) and ack;
    /// - beyond the window: drop silently.
    pub fn on_data(&mut self, seq: u32, payload: &[u8]) -> (Delivery, Option<u32>) {
        if seq < self.expected {
            return (Delivery::Duplicate, Some(seq));
        }
        if seq >= self.expected + self.window_size as u32 {
            return (Delivery::Ignored, None);
        }

        if seq == self.expected {
            let mut chunks = vec![payload.to_vec()];
            self.expected += 1;
            while let Some(next) = self.buffer.remove(&self.expected) {
                chunks.push(next);
                self.expected += 1;
            }
            return (Delivery::Delivered(chunks), Some(seq));
        }

        if self.buffer.contains_key(&seq) {
            (Delivery::Duplicate, Some(seq))
        } else {
            self.buffer.insert(seq, payload.to_vec());
            (Delivery::Buffered, Some(seq))
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// `true` while buffered segments wait on a missing predecessor.
    pub fn has_gaps(&self) -> bool {
        !self.buffer.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
