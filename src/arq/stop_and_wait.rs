//! Stop-and-Wait ARQ: window of one.
//!
//! # Protocol contract
//!
//! - At most one DATA segment is unacknowledged at any instant.
//! - The acknowledgement names the segment it covers (`ack == seq`).
//! - On timeout the one in-flight segment is retransmitted; retransmission
//!   count is unbounded, the session's idle deadline bounds the transfer.
//! - Sequence numbers are plain 32-bit segment indices starting at 0; at
//!   one segment per kibibyte no practical file approaches wraparound.
//!
//! These types only manage state; all socket I/O is the caller's
//! responsibility.

use std::time::{Duration, Instant};

use crate::packet::Packet;

use super::Delivery;

// ---------------------------------------------------------------------------
// Send side
// ---------------------------------------------------------------------------

/// The single in-flight segment.
#[derive(Debug, Clone)]
struct InFlight {
    /// The segment, kept whole for retransmission.
    packet: Packet,
    /// When the retransmit timer fires next.
    deadline: Instant,
    /// Total number of times this segment has been transmitted.
    tx_count: u32,
}

/// Stop-and-Wait send-side state for one transfer.
#[derive(Debug)]
pub struct SawSender {
    next_seq: u32,
    in_flight: Option<InFlight>,
    rto: Duration,
}

impl SawSender {
    pub fn new(rto: Duration) -> Self {
        Self {
            next_seq: 0,
            in_flight: None,
            rto,
        }
    }

    /// `true` when nothing is awaiting acknowledgement.
    pub fn can_send(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Admit one chunk, returning the DATA packet to transmit and arming
    /// its timer.
    ///
    /// # Panics
    ///
    /// Panics in debug mode when a segment is already in flight. Check
    /// [`can_send`] first.
    ///
    /// [`can_send`]: Self::can_send
    pub fn offer_send(&mut self, chunk: Vec<u8>, now: Instant) -> Packet {
        debug_assert!(
            self.can_send(),
            "offer_send with segment {} still in flight",
            self.next_seq.wrapping_sub(1)
        );
        let packet = Packet::data(self.next_seq, chunk);
        self.in_flight = Some(InFlight {
            packet: packet.clone(),
            deadline: now + self.rto,
            tx_count: 1,
        });
        self.next_seq += 1;
        packet
    }

    /// Process an acknowledgement. Only an ack naming the in-flight
    /// segment clears the window; anything else is a stray or a duplicate
    /// and is ignored.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        match &self.in_flight {
            Some(f) if f.packet.header.seq == ack => {
                self.in_flight = None;
                1
            }
            _ => 0,
        }
    }

    /// Retransmit the in-flight segment if its timer expired, restarting
    /// the timer.
    pub fn tick(&mut self, now: Instant) -> Vec<Packet> {
        match &mut self.in_flight {
            Some(f) if f.deadline <= now => {
                f.deadline = now + self.rto;
                f.tx_count += 1;
                vec![f.packet.clone()]
            }
            _ => Vec::new(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|f| f.deadline)
    }

    pub fn has_unacked(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> usize {
        usize::from(self.in_flight.is_some())
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    #[cfg(test)]
    fn tx_count(&self) -> u32 {
        self.in_flight.as_ref().map_or(0, |f| f.tx_count)
    }
}

// ---------------------------------------------------------------------------
// Receive side
// ---------------------------------------------------------------------------

/// Stop-and-Wait receive-side state for one transfer.
///
/// Tracks only the next expected sequence number. Segments behind it are
/// duplicates of already delivered data and are re-acknowledged so the
/// sender recovers from a lost ACK; segments ahead of it are dropped
/// silently and left to the sender's retransmission.
#[derive(Debug, Default)]
pub struct SawReceiver {
    expected: u32,
}

impl SawReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data(&mut self, seq: u32, payload: &[u8]) -> (Delivery, Option<u32>) {
        if seq == self.expected {
            self.expected += 1;
            (Delivery::Delivered(vec![payload.to_vec()]), Some(seq))
        } else if seq < self.expected {
            (Delivery::Duplicate, Some(seq))
        } else {
            (Delivery::Ignored, None)
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const RTO: Duration = Duration::from_millis(80);

    #[test]
    fn initial_state() {
        let s = SawSender::new(RTO);
        assert!(s.can_send());
        assert!(!s.has_unacked());
        assert_eq!(s.in_flight(), 0);
        assert_eq!(s.next_seq(), 0);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn offer_send_fills_the_window() {
        let mut s = SawSender::new(RTO);
        let now = Instant::now();
        let pkt = s.offer_send(b"abc".to_vec(), now);

        assert_eq!(pkt.header.seq, 0);
        assert_eq!(pkt.payload, b"abc");
        assert!(!s.can_send());
        assert_eq!(s.in_flight(), 1);
        assert_eq!(s.next_seq(), 1);
        assert_eq!(s.next_deadline(), Some(now + RTO));
    }

    #[test]
    fn matching_ack_clears_the_window() {
        let mut s = SawSender::new(RTO);
        s.offer_send(b"abc".to_vec(), Instant::now());

        assert_eq!(s.on_ack(0), 1);
        assert!(s.can_send());
        assert!(!s.has_unacked());
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn stray_and_duplicate_acks_ignored() {
        let mut s = SawSender::new(RTO);
        s.offer_send(b"abc".to_vec(), Instant::now());

        assert_eq!(s.on_ack(5), 0); // never sent
        assert!(s.has_unacked());
        assert_eq!(s.on_ack(0), 1);
        assert_eq!(s.on_ack(0), 0); // duplicate after the window cleared
    }

    #[test]
    fn tick_before_deadline_is_quiet() {
        let mut s = SawSender::new(RTO);
        let t0 = Instant::now();
        s.offer_send(b"abc".to_vec(), t0);

        assert!(s.tick(t0 + RTO / 2).is_empty());
        assert_eq!(s.tx_count(), 1);
    }

    /// The retransmission is byte-identical to the original and the timer
    /// restarts a full RTO after the tick.
    #[test]
    fn expired_tick_retransmits_same_segment() {
        let mut s = SawSender::new(RTO);
        let t0 = Instant::now();
        let original = s.offer_send(vec![7; 100], t0);

        let due = s.tick(t0 + RTO);
        assert_eq!(due, vec![original]);
        assert_eq!(s.tx_count(), 2);
        assert_eq!(s.next_deadline(), Some(t0 + RTO + RTO));

        // Retransmissions keep going while the ACK never shows up.
        let due = s.tick(t0 + RTO * 3);
        assert_eq!(due.len(), 1);
        assert_eq!(s.tx_count(), 3);
    }

    #[test]
    fn sequence_advances_per_segment() {
        let mut s = SawSender::new(RTO);
        for seq in 0..4 {
            let pkt = s.offer_send(vec![0; 10], Instant::now());
            assert_eq!(pkt.header.seq, seq);
            assert_eq!(s.on_ack(seq), 1);
        }
        assert_eq!(s.next_seq(), 4);
    }

    #[test]
    fn receiver_delivers_in_order() {
        let mut r = SawReceiver::new();
        let (delivery, ack) = r.on_data(0, b"first");
        assert_eq!(delivery, Delivery::Delivered(vec![b"first".to_vec()]));
        assert_eq!(ack, Some(0));
        assert_eq!(r.expected(), 1);

        let (delivery, ack) = r.on_data(1, b"second");
        assert_eq!(delivery, Delivery::Delivered(vec![b"second".to_vec()]));
        assert_eq!(ack, Some(1));
    }

    /// A replayed segment must be re-acknowledged (the original ACK may
    /// have been lost) but never delivered twice.
    #[test]
    fn receiver_reacks_duplicates() {
        let mut r = SawReceiver::new();
        r.on_data(0, b"x");

        let (delivery, ack) = r.on_data(0, b"x");
        assert_eq!(delivery, Delivery::Duplicate);
        assert_eq!(ack, Some(0));
        assert_eq!(r.expected(), 1);
    }

    #[test]
    fn receiver_drops_ahead_of_window() {
        let mut r = SawReceiver::new();
        let (delivery, ack) = r.on_data(3, b"future");
        assert_eq!(delivery, Delivery::Ignored);
        assert_eq!(ack, None);
        assert_eq!(r.expected(), 0);
    }
}
