//! Async UDP socket abstraction.
//!
//! [`RdtSocket`] is a thin wrapper around `tokio::net::UdpSocket` that
//! speaks [`crate::packet::Packet`] instead of raw bytes. All protocol
//! logic lives elsewhere; this module owns byte I/O and one policy:
//! datagrams that fail to decode (truncated, corrupted, impossible flags)
//! are discarded silently, never acknowledged and never answered with ERR.
//! To the peer a corrupted datagram looks exactly like a lost one.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::packet::{Packet, MAX_DATAGRAM};
use crate::simulator::{FaultInjector, Verdict};

/// An async, packet-oriented UDP socket.
///
/// All methods take `&self` so the socket can be shared across tasks if
/// needed.
#[derive(Debug)]
pub struct RdtSocket {
    /// Address this socket is bound to (resolved after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    faults: Option<FaultInjector>,
}

impl RdtSocket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port; the resolved
    /// address is available in `local_addr`.
    pub async fn bind(local_addr: SocketAddr) -> std::io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            faults: None,
        })
    }

    /// Bind a socket whose outbound datagrams pass through a fault
    /// injector. Test harness only.
    pub async fn bind_with_faults(
        local_addr: SocketAddr,
        faults: FaultInjector,
    ) -> std::io::Result<Self> {
        let mut socket = Self::bind(local_addr).await?;
        socket.faults = Some(faults);
        Ok(socket)
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> std::io::Result<()> {
        let mut bytes = packet.encode();

        match self.faults.as_ref().map(|f| f.verdict(packet)) {
            None | Some(Verdict::Deliver) => {
                self.inner.send_to(&bytes, dest).await?;
            }
            Some(Verdict::Drop) => {
                log::trace!("[sim] dropping seq={} flags={:#06x}", packet.header.seq, packet.header.flags);
            }
            Some(Verdict::DeliverTwice) => {
                self.inner.send_to(&bytes, dest).await?;
                self.inner.send_to(&bytes, dest).await?;
            }
            Some(Verdict::Corrupt) => {
                // The injector is always present on this arm.
                if let Some(f) = self.faults.as_ref() {
                    f.corrupt(&mut bytes);
                }
                self.inner.send_to(&bytes, dest).await?;
            }
        }
        Ok(())
    }

    /// Receive the next decodable datagram as a [`Packet`].
    ///
    /// Returns `(packet, sender_address)`. Undecodable datagrams are logged
    /// at trace level and skipped; the call resolves only for a valid
    /// packet or a socket error.
    pub async fn recv_from(&self) -> std::io::Result<(Packet, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM + 64];
        loop {
            let (n, addr) = self.inner.recv_from(&mut buf).await?;
            match Packet::decode(&buf[..n]) {
                Ok(packet) => return Ok((packet, addr)),
                Err(e) => {
                    log::trace!("[socket] dropping undecodable datagram from {addr}: {e}");
                }
            }
        }
    }
}
