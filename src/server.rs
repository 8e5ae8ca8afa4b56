//! Server demultiplexer and worker pool.
//!
//! One socket listens on the well-known port and accepts nothing but SYNs.
//! Each accepted transfer gets its own worker task and its own UDP socket
//! on an ephemeral port; the SYN-ACK sent from that socket tells the
//! client where to aim all further traffic, which keeps the listener free
//! for new arrivals. The listener owns the address-to-worker table
//! exclusively: workers announce termination over an mpsc channel that the
//! listener drains between datagrams, and a retransmitted SYN from a known
//! address is forwarded to its worker (as a nudge to resend the SYN-ACK)
//! instead of spawning a second session.
//!
//! The pool is bounded: a SYN from a new address while every worker slot
//! is taken is answered with ERR `03:server busy` and nothing is
//! allocated.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::arq::{ArqReceiver, ArqSender};
use crate::config::{MAX_SYN_RETRIES, SOCKET_TIMEOUT, WORKERS};
use crate::error::{encode_err_payload, parse_err_payload, ErrorCode, TransferError};
use crate::handshake::{encode_syn_ack_payload, HandshakeRequest, Operation};
use crate::packet::{flags, Packet};
use crate::session::Session;
use crate::simulator::{FaultInjector, SimulatorConfig};
use crate::socket::RdtSocket;
use crate::state::SessionState;
use crate::storage::{store_path, DiskSink, DiskSource, FileSink, FileSource};
use crate::transfer;

/// Startup parameters for [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listener bind address (well-known port).
    pub bind: SocketAddr,
    /// Directory backing the file store. Created if missing.
    pub storage_dir: PathBuf,
    /// Maximum concurrent transfer sessions.
    pub workers: usize,
    /// Fault model applied to the outbound path of every session socket,
    /// so tests can exercise handshake and transfer recovery end to end.
    /// Always `None` in production.
    pub session_faults: Option<SimulatorConfig>,
}

impl ServerConfig {
    pub fn new(bind: SocketAddr, storage_dir: PathBuf) -> Self {
        Self {
            bind,
            storage_dir,
            workers: WORKERS,
            session_faults: None,
        }
    }
}

/// The listener's view of one live worker.
struct WorkerHandle {
    /// Poked when the client retransmits its SYN, so the worker resends
    /// the SYN-ACK immediately instead of waiting out its RTO.
    nudge: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// File access prepared by the listener before a worker is spawned, so
/// invalid requests are rejected without allocating a session.
enum Job {
    Upload(DiskSink),
    Download(DiskSource, u64),
}

/// The demultiplexer. Bind with [`Server::bind`], then drive with
/// [`Server::run`].
pub struct Server {
    config: ServerConfig,
    listener: RdtSocket,
}

impl Server {
    /// Create the storage directory and bind the listener socket.
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&config.storage_dir).await?;
        let listener = RdtSocket::bind(config.bind).await?;
        log::info!(
            "[server] listening on {}, storing files in {}",
            listener.local_addr,
            config.storage_dir.display()
        );
        Ok(Self { config, listener })
    }

    /// The listener's resolved address (useful when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr
    }

    /// Accept transfers until ctrl-c.
    pub async fn run(self) -> std::io::Result<()> {
        let (done_tx, mut done_rx) = mpsc::channel::<SocketAddr>(32);
        let mut table: HashMap<SocketAddr, WorkerHandle> = HashMap::new();

        loop {
            // Prune between datagrams: workers that signalled completion,
            // then any that died without managing to.
            while let Ok(addr) = done_rx.try_recv() {
                if table.remove(&addr).is_some() {
                    log::debug!("[server] session for {addr} finished, slot freed");
                }
            }
            table.retain(|addr, handle| {
                if handle.task.is_finished() {
                    log::debug!("[server] reaping finished worker for {addr}");
                    false
                } else {
                    true
                }
            });

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::info!("[server] shutdown requested");
                    return Ok(());
                }
                res = self.listener.recv_from() => {
                    let (packet, from) = res?;
                    self.accept(packet, from, &mut table, &done_tx).await?;
                }
            }
        }
    }

    /// Handle one datagram on the listener socket.
    async fn accept(
        &self,
        packet: Packet,
        from: SocketAddr,
        table: &mut HashMap<SocketAddr, WorkerHandle>,
        done_tx: &mpsc::Sender<SocketAddr>,
    ) -> std::io::Result<()> {
        if packet.header.flags != flags::SYN {
            log::trace!(
                "[server] ignoring non-SYN datagram (flags {:#06x}) from {from}",
                packet.header.flags
            );
            return Ok(());
        }

        if let Some(handle) = table.get(&from) {
            // The client missed our SYN-ACK and retried; forward to the
            // live worker rather than spawning a duplicate session.
            let _ = handle.nudge.try_send(());
            log::debug!("[server] duplicate SYN from {from} forwarded to its worker");
            return Ok(());
        }

        if table.len() >= self.config.workers {
            log::warn!("[server] pool saturated ({} workers), rejecting {from}", table.len());
            return self.reject(from, ErrorCode::ServerBusy, "server busy").await;
        }

        let request = match HandshakeRequest::decode(&packet.payload) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("[server] bad SYN payload from {from}: {e}");
                return self
                    .reject(from, ErrorCode::MalformedRequest, &e.to_string())
                    .await;
            }
        };
        log::info!(
            "[server] {} {} via {} requested by {from}",
            request.operation,
            request.filename,
            request.protocol
        );

        let path = store_path(&self.config.storage_dir, &request.filename);
        let job = match request.operation {
            Operation::Download => match DiskSource::open(&path).await {
                Ok(source) => {
                    let size = source.size();
                    Job::Download(source, size)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return self
                        .reject(from, ErrorCode::FileNotFound, "no such file")
                        .await;
                }
                Err(e) => {
                    log::warn!("[server] cannot open {}: {e}", path.display());
                    return self.reject(from, ErrorCode::LocalIo, "cannot open file").await;
                }
            },
            Operation::Upload => match DiskSink::create(path).await {
                Ok(sink) => Job::Upload(sink),
                Err(e) => {
                    log::warn!("[server] cannot stage upload {}: {e}", request.filename);
                    return self
                        .reject(from, ErrorCode::CannotCreate, "cannot create file")
                        .await;
                }
            },
        };

        // The session lives on its own ephemeral port from here on.
        let session_addr = SocketAddr::new(self.listener.local_addr.ip(), 0);
        let bound = match &self.config.session_faults {
            Some(faults) => {
                RdtSocket::bind_with_faults(session_addr, FaultInjector::new(faults.clone())).await
            }
            None => RdtSocket::bind(session_addr).await,
        };
        let socket = match bound {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("[server] cannot bind session socket: {e}");
                return self
                    .reject(from, ErrorCode::LocalIo, "cannot allocate session")
                    .await;
            }
        };
        log::debug!(
            "[server] session for {from} on {}, {} slots in use",
            socket.local_addr,
            table.len() + 1
        );

        let (nudge_tx, nudge_rx) = mpsc::channel(4);
        let task = tokio::spawn(worker(socket, from, request, job, nudge_rx, done_tx.clone()));
        table.insert(from, WorkerHandle { nudge: nudge_tx, task });
        Ok(())
    }

    /// Refuse a request on the listener socket without allocating anything.
    async fn reject(&self, to: SocketAddr, code: ErrorCode, reason: &str) -> std::io::Result<()> {
        let packet = Packet::err(encode_err_payload(code, reason));
        self.listener.send_to(&packet, to).await
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Run one transfer session to completion and report the slot free.
async fn worker(
    socket: RdtSocket,
    peer: SocketAddr,
    request: HandshakeRequest,
    job: Job,
    mut nudge: mpsc::Receiver<()>,
    done: mpsc::Sender<SocketAddr>,
) {
    let label = format!("{} {}", request.operation, request.filename);
    match run_worker(socket, peer, &request, job, &mut nudge).await {
        Ok(bytes) => log::info!("[server] {label} for {peer} complete ({bytes} bytes)"),
        Err(e) => log::warn!("[server] {label} for {peer} failed: {e}"),
    }
    let _ = done.send(peer).await;
}

async fn run_worker(
    socket: RdtSocket,
    peer: SocketAddr,
    request: &HandshakeRequest,
    job: Job,
    nudge: &mut mpsc::Receiver<()>,
) -> Result<u64, TransferError> {
    let syn_ack = Packet::syn_ack(match &job {
        Job::Download(_, size) => encode_syn_ack_payload(Some(*size)),
        Job::Upload(_) => encode_syn_ack_payload(None),
    });

    let mut session = Session::accepting(socket, peer);
    let first = match establish(&mut session, &syn_ack, nudge).await {
        Ok(first) => first,
        Err(e) => {
            if let Job::Upload(mut sink) = job {
                sink.abort().await;
            }
            return Err(e);
        }
    };

    match job {
        Job::Upload(mut sink) => {
            let mut engine = ArqReceiver::new(request.protocol);
            transfer::receive_file(&mut session, &mut engine, &mut sink, first).await
        }
        Job::Download(mut source, _) => {
            let mut engine = ArqSender::new(request.protocol);
            transfer::send_file(&mut session, &mut engine, &mut source).await
        }
    }
}

/// What woke the establishment loop.
enum Establish {
    Packet(Packet, SocketAddr),
    Nudge,
    NudgeGone,
    Timeout,
}

/// Server half of the handshake: retransmit SYN-ACK from the session
/// socket until the client's ACK (or, just as good, its first DATA or FIN)
/// proves the exchange complete and the session leaves `SynRcvd`.
///
/// Returns a packet that must be processed by the transfer loop when the
/// establishment was completed by data rather than the ACK.
async fn establish(
    session: &mut Session,
    syn_ack: &Packet,
    nudge: &mut mpsc::Receiver<()>,
) -> Result<Option<Packet>, TransferError> {
    let peer = session.peer();
    let mut nudges_open = true;

    for attempt in 1..=MAX_SYN_RETRIES {
        session.send(syn_ack).await?;
        log::debug!("[server] → SYN-ACK to {peer} (attempt {attempt}/{MAX_SYN_RETRIES})");

        let deadline = tokio::time::Instant::now() + SOCKET_TIMEOUT;
        loop {
            let event = tokio::select! {
                res = session.socket().recv_from() => {
                    let (packet, from) = res.map_err(TransferError::Network)?;
                    Establish::Packet(packet, from)
                }
                poke = nudge.recv(), if nudges_open => match poke {
                    Some(()) => Establish::Nudge,
                    None => Establish::NudgeGone,
                },
                _ = tokio::time::sleep_until(deadline) => Establish::Timeout,
            };

            match event {
                Establish::Timeout => break, // outer loop retransmits
                Establish::NudgeGone => nudges_open = false,
                Establish::Nudge => {
                    session.send(syn_ack).await?;
                    log::debug!("[server] duplicate SYN; SYN-ACK resent to {peer}");
                }
                Establish::Packet(packet, from) => {
                    if from != peer {
                        continue;
                    }
                    session.touch();
                    let h = packet.header.clone();
                    if h.has(flags::ERR) {
                        let (code, reason) = parse_err_payload(&packet.payload);
                        session.set_state(SessionState::Closed);
                        return Err(TransferError::Peer { code, reason });
                    }
                    if h.has(flags::DATA) || h.has(flags::FIN) {
                        // The ACK was lost but the client moved on; the
                        // transfer loop must see this packet.
                        log::debug!("[server] establishment completed by first data from {peer}");
                        session.set_state(SessionState::Established);
                        return Ok(Some(packet));
                    }
                    if h.has(flags::ACK) {
                        log::debug!("[server] ← ACK from {peer}; established");
                        session.set_state(SessionState::Established);
                        return Ok(None);
                    }
                    log::trace!(
                        "[server] ignoring packet with flags {:#06x} during establishment",
                        h.flags
                    );
                }
            }
        }
    }

    log::warn!("[server] no ACK from {peer} after {MAX_SYN_RETRIES} SYN-ACKs");
    session.set_state(SessionState::Closed);
    Err(TransferError::HandshakeFailed(MAX_SYN_RETRIES))
}
