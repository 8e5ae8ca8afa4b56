//! Fault injection for deterministic testing.
//!
//! Real networks drop, duplicate, and corrupt datagrams. To exercise the
//! reliability mechanisms without depending on actual network conditions, a
//! [`FaultInjector`] can be attached to the outbound path of a
//! [`crate::socket::RdtSocket`], applying a configurable fault model:
//!
//! | Fault       | Description                                          |
//! |-------------|------------------------------------------------------|
//! | Loss        | Drop a datagram with probability `loss_rate`.        |
//! | Duplication | Deliver a datagram twice with `duplicate_rate`.      |
//! | Corruption  | Flip one bit with `corrupt_rate` (checksum catches). |
//! | Targeted    | Drop the *first* transmission of the DATA segments   |
//! |             | named in `drop_data_once`.                           |
//!
//! The RNG is seeded so failures reproduce exactly. Production code never
//! constructs an injector; sockets bound through [`RdtSocket::bind`] send
//! untouched.
//!
//! [`RdtSocket::bind`]: crate::socket::RdtSocket::bind

use std::collections::HashSet;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::{flags, Packet};

/// Configuration for the fault model. All probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Probability that one bit of the datagram is flipped in flight.
    pub corrupt_rate: f64,
    /// DATA sequence numbers whose first transmission is dropped, exactly
    /// once each. Retransmissions pass through.
    pub drop_data_once: Vec<u32>,
    /// RNG seed for reproducible runs.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // Transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            drop_data_once: Vec::new(),
            seed: 0,
        }
    }
}

/// What the injector decided to do with one outbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Drop,
    DeliverTwice,
    Corrupt,
}

/// Stateful fault decision-maker for one socket.
#[derive(Debug)]
pub struct FaultInjector {
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    pending_drops: Mutex<HashSet<u32>>,
}

impl FaultInjector {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let pending = config.drop_data_once.iter().copied().collect();
        Self {
            config,
            rng: Mutex::new(rng),
            pending_drops: Mutex::new(pending),
        }
    }

    /// Decide the fate of `packet`. Targeted drops take priority over the
    /// probabilistic faults so tests can script exact loss patterns.
    pub fn verdict(&self, packet: &Packet) -> Verdict {
        if packet.header.has(flags::DATA) {
            let mut pending = self.pending_drops.lock().unwrap();
            if pending.remove(&packet.header.seq) {
                return Verdict::Drop;
            }
        }

        let mut rng = self.rng.lock().unwrap();
        if self.config.loss_rate > 0.0 && rng.gen_bool(self.config.loss_rate) {
            return Verdict::Drop;
        }
        if self.config.corrupt_rate > 0.0 && rng.gen_bool(self.config.corrupt_rate) {
            return Verdict::Corrupt;
        }
        if self.config.duplicate_rate > 0.0 && rng.gen_bool(self.config.duplicate_rate) {
            return Verdict::DeliverTwice;
        }
        Verdict::Deliver
    }

    /// Flip one pseudo-random bit of an encoded datagram.
    pub fn corrupt(&self, bytes: &mut [u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut rng = self.rng.lock().unwrap();
        let byte = rng.gen_range(0..bytes.len());
        let bit = rng.gen_range(0..8);
        bytes[byte] ^= 1 << bit;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_by_default() {
        let inj = FaultInjector::new(SimulatorConfig::default());
        for seq in 0..100 {
            let pkt = Packet::data(seq, vec![0; 8]);
            assert_eq!(inj.verdict(&pkt), Verdict::Deliver);
        }
    }

    #[test]
    fn targeted_drop_fires_exactly_once() {
        let inj = FaultInjector::new(SimulatorConfig {
            drop_data_once: vec![2],
            ..Default::default()
        });
        let pkt = Packet::data(2, vec![0; 8]);
        assert_eq!(inj.verdict(&pkt), Verdict::Drop);
        // The retransmission of the same segment passes.
        assert_eq!(inj.verdict(&pkt), Verdict::Deliver);
        // Other segments are untouched.
        assert_eq!(inj.verdict(&Packet::data(3, vec![0; 8])), Verdict::Deliver);
    }

    #[test]
    fn targeted_drop_ignores_control_packets() {
        let inj = FaultInjector::new(SimulatorConfig {
            drop_data_once: vec![0],
            ..Default::default()
        });
        assert_eq!(inj.verdict(&Packet::ack(0)), Verdict::Deliver);
        assert_eq!(inj.verdict(&Packet::fin(0)), Verdict::Deliver);
        // The DATA packet with seq 0 is still dropped afterwards.
        assert_eq!(inj.verdict(&Packet::data(0, vec![1])), Verdict::Drop);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let cfg = SimulatorConfig {
            loss_rate: 0.3,
            duplicate_rate: 0.1,
            corrupt_rate: 0.1,
            seed: 42,
            ..Default::default()
        };
        let a = FaultInjector::new(cfg.clone());
        let b = FaultInjector::new(cfg);
        for seq in 0..200 {
            let pkt = Packet::data(seq, vec![0; 4]);
            assert_eq!(a.verdict(&pkt), b.verdict(&pkt));
        }
    }

    #[test]
    fn total_loss_drops_everything() {
        let inj = FaultInjector::new(SimulatorConfig {
            loss_rate: 1.0,
            seed: 7,
            ..Default::default()
        });
        for seq in 0..20 {
            assert_eq!(inj.verdict(&Packet::data(seq, vec![0])), Verdict::Drop);
        }
    }

    #[test]
    fn corrupt_flips_exactly_one_bit() {
        let inj = FaultInjector::new(SimulatorConfig {
            seed: 9,
            ..Default::default()
        });
        let original = Packet::data(0, vec![0xFF; 32]).encode();
        let mut mutated = original.clone();
        inj.corrupt(&mut mutated);
        let differing: u32 = original
            .iter()
            .zip(&mutated)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert_eq!(differing, 1);
    }
}
