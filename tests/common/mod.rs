//! Shared loopback harness for the ARQ end-to-end tests.
//!
//! Two in-process endpoints exchange a real file over real UDP sockets,
//! each side optionally behind a seeded fault injector, so loss, duplication
//! and corruption patterns reproduce exactly across runs.

use std::net::SocketAddr;
use std::time::Duration;

use rdt_over_udp::arq::{ArqKind, ArqReceiver, ArqSender};
use rdt_over_udp::session::Session;
use rdt_over_udp::simulator::{FaultInjector, SimulatorConfig};
use rdt_over_udp::socket::RdtSocket;
use rdt_over_udp::storage::{DiskSink, DiskSource};
use rdt_over_udp::transfer;

pub struct PairOutcome {
    pub sent: u64,
    pub received: u64,
    pub dest_bytes: Vec<u8>,
}

/// Run one complete transfer between two loopback endpoints and return
/// what each side reported plus the bytes that landed on disk.
pub async fn run_pair(
    kind: ArqKind,
    payload: &[u8],
    sender_faults: SimulatorConfig,
    receiver_faults: SimulatorConfig,
) -> PairOutcome {
    let dir = tempfile::tempdir().expect("tempdir");
    let src_path = dir.path().join("src.bin");
    let dst_path = dir.path().join("dst.bin");
    std::fs::write(&src_path, payload).expect("write source");

    let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let sender_sock = RdtSocket::bind_with_faults(loopback, FaultInjector::new(sender_faults))
        .await
        .expect("bind sender");
    let receiver_sock = RdtSocket::bind_with_faults(loopback, FaultInjector::new(receiver_faults))
        .await
        .expect("bind receiver");
    let sender_addr = sender_sock.local_addr;
    let receiver_addr = receiver_sock.local_addr;

    let dst = dst_path.clone();
    let receiver = tokio::spawn(async move {
        let mut session = Session::new(receiver_sock, sender_addr);
        let mut engine = ArqReceiver::new(kind);
        let mut sink = DiskSink::create(dst).await.expect("create sink");
        transfer::receive_file(&mut session, &mut engine, &mut sink, None).await
    });

    let sender = tokio::spawn(async move {
        let mut session = Session::new(sender_sock, receiver_addr);
        let mut engine = ArqSender::new(kind);
        let mut source = DiskSource::open(&src_path).await.expect("open source");
        transfer::send_file(&mut session, &mut engine, &mut source).await
    });

    let (sent, received) = tokio::time::timeout(Duration::from_secs(30), async {
        let (s, r) = tokio::join!(sender, receiver);
        (
            s.expect("sender task").expect("send side"),
            r.expect("receiver task").expect("receive side"),
        )
    })
    .await
    .expect("transfer completed in time");

    let dest_bytes = std::fs::read(&dst_path).expect("destination exists");
    PairOutcome {
        sent,
        received,
        dest_bytes,
    }
}

/// Deterministic non-repeating test payload.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
