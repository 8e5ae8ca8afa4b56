//! Session finite-state machine (FSM) types.
//!
//! This module defines every state one end of a transfer session can occupy.
//! Transitions are driven by [`crate::handshake`] (establishment), the
//! transfer loops in [`crate::transfer`] (data phase), and
//! [`crate::session`] (teardown). Keeping the state type in its own module
//! keeps the lifecycle visible in one place without dragging in any
//! connection plumbing.

/// All possible states of the session FSM.
///
/// ```text
///                 LISTEN (server listener socket only)
///                    │ SYN
///                    ▼
///  SYN_SENT ───▶ SYN_RCVD ───ACK/first DATA──▶ ESTABLISHED
///     │ SYN-ACK                                    │
///     └────────────▶ ESTABLISHED      data done    │
///                                                  ▼
///        CLOSED ◀── FIN_RCVD / FIN_SENT ◀──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Server listener awaiting SYNs on the well-known port. Never entered
    /// by a per-transfer session.
    Listen,
    /// Client sent SYN; waiting for SYN-ACK from a fresh server port.
    SynSent,
    /// Server allocated a session socket and sent SYN-ACK; waiting for the
    /// client's ACK (or, equivalently, its first DATA).
    SynRcvd,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN after draining all segments; waiting for FIN-ACK.
    FinSent,
    /// Peer's FIN received; FIN-ACK about to be sent.
    FinRcvd,
    /// FINs crossed on the wire; FIN-ACK sent, still waiting for the ack of
    /// our own FIN.
    Closing,
    /// Session over. Initial and terminal state.
    #[default]
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
