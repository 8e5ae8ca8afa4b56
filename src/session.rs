//! Per-transfer session endpoint.
//!
//! A [`Session`] owns one UDP socket, one remote peer, and the lifecycle
//! state for exactly one transfer. It provides the pieces shared by both
//! transfer directions: peer-filtered packet sending, activity tracking
//! against the idle bound, ERR reporting, and the FIN / FIN-ACK teardown.
//! The ARQ-governed data loops live in [`crate::transfer`] and drive a
//! session from outside; engines never appear here, so the state machine
//! stays independent of the reliability strategy.
//!
//! Each session runs inside its own tokio task (spawned by the server, or
//! the CLI's main task on the client side); a slow peer only ever stalls
//! its own session.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::time::timeout_at;

use crate::config::{MAX_FIN_RETRIES, MAX_IDLE, SOCKET_TIMEOUT};
use crate::error::{encode_err_payload, parse_err_payload, ErrorCode, TransferError};
use crate::packet::{flags, Packet};
use crate::socket::RdtSocket;
use crate::state::SessionState;

/// One end of one transfer.
#[derive(Debug)]
pub struct Session {
    socket: RdtSocket,
    peer: SocketAddr,
    state: SessionState,
    last_activity: Instant,
    idle_bound: Duration,
}

impl Session {
    /// Wrap an established channel to `peer`. The handshake has already
    /// completed on both sides.
    pub fn new(socket: RdtSocket, peer: SocketAddr) -> Self {
        let mut session = Self {
            socket,
            peer,
            state: SessionState::Closed,
            last_activity: Instant::now(),
            idle_bound: MAX_IDLE,
        };
        session.set_state(SessionState::Established);
        session
    }

    /// Wrap a server-side channel whose handshake is still in flight: the
    /// SYN was accepted but the client's ACK is outstanding. The caller
    /// moves the session to `Established` once the exchange completes.
    pub fn accepting(socket: RdtSocket, peer: SocketAddr) -> Self {
        let mut session = Self {
            socket,
            peer,
            state: SessionState::Closed,
            last_activity: Instant::now(),
            idle_bound: MAX_IDLE,
        };
        session.set_state(SessionState::SynRcvd);
        session
    }

    /// Override the idle bound, after which a silent peer is declared
    /// gone. Defaults to [`MAX_IDLE`].
    pub fn with_idle_bound(mut self, bound: Duration) -> Self {
        self.idle_bound = bound;
        self
    }

    /// How long this session tolerates peer silence.
    pub fn idle_bound(&self) -> Duration {
        self.idle_bound
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub(crate) fn socket(&self) -> &RdtSocket {
        &self.socket
    }

    pub(crate) fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            log::debug!("[session {}] {} -> {next}", self.peer, self.state);
            self.state = next;
        }
    }

    /// Record inbound traffic from the peer.
    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Instant at which the peer is declared gone.
    pub(crate) fn idle_deadline(&self) -> Instant {
        self.last_activity + self.idle_bound
    }

    pub(crate) fn idle_expired(&self, now: Instant) -> bool {
        now >= self.idle_deadline()
    }

    /// Send one packet to the peer.
    pub(crate) async fn send(&self, packet: &Packet) -> Result<(), TransferError> {
        self.socket
            .send_to(packet, self.peer)
            .await
            .map_err(TransferError::Network)
    }

    /// Report a fatal condition to the peer. Best effort: the session is
    /// going down either way, so send failures are only logged.
    pub async fn send_err(&self, code: ErrorCode, reason: &str) {
        let packet = Packet::err(encode_err_payload(code, reason));
        if let Err(e) = self.socket.send_to(&packet, self.peer).await {
            log::warn!("[session {}] could not send ERR {code}: {e}", self.peer);
        } else {
            log::debug!("[session {}] → ERR {code}: {reason}", self.peer);
        }
    }

    /// Data-sender teardown: FIN, retransmitted on RTO, until the peer's
    /// FIN-ACK arrives.
    ///
    /// `fin_seq` is the first unused segment index, so the receiver can
    /// tell the FIN apart from a stale control packet. Crossed FINs are
    /// acknowledged and the wait continues. If the peer never answers, the
    /// session force-closes after [`MAX_FIN_RETRIES`] attempts; by then
    /// every data segment has been acknowledged, so the transfer itself is
    /// already complete.
    pub(crate) async fn close_as_sender(&mut self, fin_seq: u32) -> Result<(), TransferError> {
        let fin = Packet::fin(fin_seq);
        self.set_state(SessionState::FinSent);

        for _attempt in 1..=MAX_FIN_RETRIES {
            self.send(&fin).await?;
            log::debug!("[session {}] → FIN seq={fin_seq}", self.peer);

            let deadline = tokio::time::Instant::now() + SOCKET_TIMEOUT;
            loop {
                let received = timeout_at(deadline, self.socket.recv_from()).await;
                let res = match received {
                    Ok(res) => res,
                    Err(_elapsed) => break, // RTO; retransmit the FIN
                };
                let (pkt, from) = res.map_err(TransferError::Network)?;
                if from != self.peer {
                    continue;
                }
                self.touch();

                let h = &pkt.header;
                if h.has(flags::ERR) {
                    let (code, reason) = parse_err_payload(&pkt.payload);
                    self.set_state(SessionState::Closed);
                    return Err(TransferError::Peer { code, reason });
                }
                if h.has(flags::FIN | flags::ACK) {
                    if h.ack == fin_seq {
                        log::debug!("[session {}] ← FIN-ACK; closed", self.peer);
                        self.set_state(SessionState::Closed);
                        return Ok(());
                    }
                    continue; // stale teardown ack
                }
                if h.has(flags::FIN) {
                    // FINs crossed on the wire: acknowledge theirs, keep
                    // waiting for the ack of ours.
                    self.send(&Packet::fin_ack(h.seq)).await?;
                    self.set_state(SessionState::Closing);
                    continue;
                }
                // Late duplicate ACKs of data segments; nothing to do.
            }
        }

        log::warn!(
            "[session {}] FIN unacknowledged after {MAX_FIN_RETRIES} attempts; force-closing",
            self.peer
        );
        self.set_state(SessionState::Closed);
        Ok(())
    }

    /// Data-receiver teardown: acknowledge the peer's FIN and close.
    pub(crate) async fn close_as_receiver(&mut self, fin_seq: u32) -> Result<(), TransferError> {
        self.set_state(SessionState::FinRcvd);
        self.send(&Packet::fin_ack(fin_seq)).await?;
        log::debug!("[session {}] ← FIN seq={fin_seq}; → FIN-ACK; closed", self.peer);
        self.set_state(SessionState::Closed);
        Ok(())
    }
}
