//! File transfer operations built atop an ARQ engine.
//!
//! Upload and download are the same two loops with the roles swapped: the
//! data sender pulls chunks from a [`FileSource`] and keeps the engine's
//! window full, the data receiver feeds in-order chunks into a
//! [`FileSink`]. Each loop multiplexes the session socket against the
//! nearest timer deadline (the engine's earliest retransmit, bounded by
//! the session idle deadline) with `tokio::select!`, the only suspension
//! points being socket receive, file I/O, and a full send window.

use std::net::SocketAddr;
use std::time::Instant;

use crate::arq::{ArqReceiver, ArqSender, Delivery};
use crate::error::{parse_err_payload, ErrorCode, TransferError};
use crate::handshake;
use crate::packet::{flags, Packet, MAX_PAYLOAD};
use crate::session::Session;
use crate::state::SessionState;
use crate::storage::{FileSink, FileSource};

/// What woke a transfer loop up.
enum Wake {
    Packet(Packet, SocketAddr),
    Timer,
}

/// Wait for the next packet or the given deadline, whichever comes first.
async fn wake_at(session: &Session, deadline: Instant) -> Result<Wake, TransferError> {
    let deadline = tokio::time::Instant::from_std(deadline);
    tokio::select! {
        res = session.socket().recv_from() => {
            let (packet, from) = res.map_err(TransferError::Network)?;
            Ok(Wake::Packet(packet, from))
        }
        _ = tokio::time::sleep_until(deadline) => Ok(Wake::Timer),
    }
}

// ---------------------------------------------------------------------------
// Sender side
// ---------------------------------------------------------------------------

/// Stream `source` to the peer, then run the FIN exchange.
///
/// Returns the number of bytes sent. Every segment has been acknowledged
/// by the receiver when this returns `Ok`.
pub async fn send_file<S: FileSource>(
    session: &mut Session,
    engine: &mut ArqSender,
    source: &mut S,
) -> Result<u64, TransferError> {
    let total = source.size();
    let mut offset: u64 = 0;
    let mut eof = false;

    loop {
        // Keep the window full.
        while !eof && engine.can_send() {
            let chunk = match source.read_at(offset, MAX_PAYLOAD).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    session.send_err(ErrorCode::LocalIo, "read failed").await;
                    session.set_state(SessionState::Closed);
                    return Err(TransferError::LocalIo(e));
                }
            };
            if chunk.is_empty() {
                eof = true;
                break;
            }
            offset += chunk.len() as u64;
            let packet = engine.offer_send(chunk, Instant::now());
            log::debug!(
                "[xfer {}] → DATA seq={} len={} in_flight={}",
                session.peer(),
                packet.header.seq,
                packet.header.payload_len,
                engine.in_flight()
            );
            session.send(&packet).await?;
        }

        if eof && !engine.has_unacked() {
            break; // drained
        }

        let now = Instant::now();
        if session.idle_expired(now) {
            return Err(TransferError::PeerGone(session.idle_bound()));
        }
        let deadline = engine
            .next_deadline()
            .map_or(session.idle_deadline(), |d| d.min(session.idle_deadline()));

        let wake = wake_at(session, deadline).await?;
        match wake {
            Wake::Timer => {
                let now = Instant::now();
                if session.idle_expired(now) {
                    return Err(TransferError::PeerGone(session.idle_bound()));
                }
                for packet in engine.tick(now) {
                    log::debug!(
                        "[xfer {}] timeout, retransmitting seq={}",
                        session.peer(),
                        packet.header.seq
                    );
                    session.send(&packet).await?;
                }
            }
            Wake::Packet(packet, from) => {
                if from != session.peer() {
                    log::trace!("[xfer] ignoring packet from unrelated peer {from}");
                    continue;
                }
                session.touch();
                let h = &packet.header;

                if h.has(flags::ERR) {
                    let (code, reason) = parse_err_payload(&packet.payload);
                    session.set_state(SessionState::Closed);
                    return Err(TransferError::Peer { code, reason });
                }
                if h.has(flags::SYN | flags::ACK) {
                    // The server missed our final handshake ACK; repeat it.
                    session.send(&handshake::reack()).await?;
                    continue;
                }
                if h.has(flags::ACK) {
                    if h.ack == handshake::HANDSHAKE_ACK {
                        // A repeat of the peer's handshake-completion ACK
                        // (its answer to a duplicated SYN-ACK). Not a data
                        // acknowledgement; feeding it to the engine would
                        // falsely retire an in-flight segment.
                        log::trace!("[xfer {}] ignoring repeated handshake ACK", session.peer());
                        continue;
                    }
                    let newly = engine.on_ack(h.ack);
                    if newly > 0 {
                        log::debug!(
                            "[xfer {}] ← ACK seq={} in_flight={}",
                            session.peer(),
                            h.ack,
                            engine.in_flight()
                        );
                    }
                    continue;
                }
                // DATA or FIN from the receiving side is impossible here.
                session
                    .send_err(ErrorCode::BadState, "unexpected packet while sending")
                    .await;
                session.set_state(SessionState::Closed);
                return Err(TransferError::ProtocolViolation(
                    "receiver sent DATA or FIN during the data phase",
                ));
            }
        }
    }

    log::info!(
        "[xfer {}] sent {offset} bytes in {} segments ({total} expected)",
        session.peer(),
        engine.next_seq()
    );
    session.close_as_sender(engine.next_seq()).await?;
    Ok(offset)
}

// ---------------------------------------------------------------------------
// Receiver side
// ---------------------------------------------------------------------------

/// Receive the peer's stream into `sink` until its FIN, then finalize.
///
/// `first` is a packet that arrived during establishment (the client's
/// first DATA often races its handshake ACK) and must be processed before
/// any socket read. Returns the number of bytes delivered in order.
pub async fn receive_file<K: FileSink>(
    session: &mut Session,
    engine: &mut ArqReceiver,
    sink: &mut K,
    first: Option<Packet>,
) -> Result<u64, TransferError> {
    let mut received: u64 = 0;
    let mut pending = first;

    loop {
        let (packet, from) = match pending.take() {
            Some(packet) => (packet, session.peer()),
            None => {
                let now = Instant::now();
                if session.idle_expired(now) {
                    sink.abort().await;
                    return Err(TransferError::PeerGone(session.idle_bound()));
                }
                let wake = wake_at(session, session.idle_deadline()).await;
                let wake = match wake {
                    Ok(wake) => wake,
                    Err(e) => {
                        sink.abort().await;
                        return Err(e);
                    }
                };
                match wake {
                    Wake::Timer => {
                        sink.abort().await;
                        return Err(TransferError::PeerGone(session.idle_bound()));
                    }
                    Wake::Packet(packet, from) => (packet, from),
                }
            }
        };

        if from != session.peer() {
            log::trace!("[xfer] ignoring packet from unrelated peer {from}");
            continue;
        }
        session.touch();
        let h = packet.header.clone();

        if h.has(flags::ERR) {
            let (code, reason) = parse_err_payload(&packet.payload);
            sink.abort().await;
            session.set_state(SessionState::Closed);
            return Err(TransferError::Peer { code, reason });
        }
        if h.has(flags::SYN | flags::ACK) {
            // The server missed our final handshake ACK; repeat it.
            if let Err(e) = session.send(&handshake::reack()).await {
                sink.abort().await;
                return Err(e);
            }
            continue;
        }
        if h.has(flags::FIN | flags::ACK) {
            continue; // stale teardown echo
        }
        if h.has(flags::FIN) {
            if engine.has_gaps() {
                // The sender may only FIN once everything is acked, so a
                // hole here means the peers disagree about the stream.
                session
                    .send_err(ErrorCode::BadState, "finish received over missing segments")
                    .await;
                sink.abort().await;
                session.set_state(SessionState::Closed);
                return Err(TransferError::ProtocolViolation(
                    "FIN received while segments are missing",
                ));
            }
            if let Err(e) = sink.finalize().await {
                session.send_err(ErrorCode::LocalIo, "finalize failed").await;
                sink.abort().await;
                session.set_state(SessionState::Closed);
                return Err(TransferError::LocalIo(e));
            }
            session.close_as_receiver(h.seq).await?;
            log::info!("[xfer {}] received {received} bytes", session.peer());
            return Ok(received);
        }
        if h.has(flags::DATA) {
            let (delivery, ack) = engine.on_data(h.seq, &packet.payload);
            if let Some(ack) = ack {
                if let Err(e) = session.send(&Packet::ack(ack)).await {
                    sink.abort().await;
                    return Err(e);
                }
            }
            match delivery {
                Delivery::Delivered(chunks) => {
                    for chunk in chunks {
                        received += chunk.len() as u64;
                        if let Err(e) = sink.append(&chunk).await {
                            session.send_err(ErrorCode::LocalIo, "write failed").await;
                            sink.abort().await;
                            session.set_state(SessionState::Closed);
                            return Err(TransferError::LocalIo(e));
                        }
                    }
                    log::debug!(
                        "[xfer {}] ← DATA seq={} delivered, expecting {}",
                        session.peer(),
                        h.seq,
                        engine.expected()
                    );
                }
                Delivery::Buffered => {
                    log::debug!(
                        "[xfer {}] ← DATA seq={} buffered (expecting {})",
                        session.peer(),
                        h.seq,
                        engine.expected()
                    );
                }
                Delivery::Duplicate => {
                    log::debug!("[xfer {}] ← DATA seq={} duplicate, re-acked", session.peer(), h.seq);
                }
                Delivery::Ignored => {
                    log::trace!("[xfer {}] ← DATA seq={} outside window, dropped", session.peer(), h.seq);
                }
            }
            continue;
        }
        // Pure ACKs and stray SYNs carry nothing for a receiver.
        log::trace!(
            "[xfer {}] ignoring packet with flags {:#06x}",
            session.peer(),
            h.flags
        );
    }
}
