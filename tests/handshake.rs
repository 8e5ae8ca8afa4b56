//! Integration tests for connection establishment.
//!
//! Each test spins up a real server on a loopback ephemeral port and talks
//! to it either through the client connect path or through a raw
//! [`RdtSocket`] when the test needs to misbehave (withhold ACKs, repeat
//! SYNs) in ways the client never would.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::timeout;

use rdt_over_udp::arq::ArqKind;
use rdt_over_udp::error::ErrorCode;
use rdt_over_udp::error::TransferError;
use rdt_over_udp::handshake::{self, HandshakeRequest, Operation};
use rdt_over_udp::packet::{flags, Packet};
use rdt_over_udp::server::{Server, ServerConfig};
use rdt_over_udp::socket::RdtSocket;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Start a server on an ephemeral loopback port backed by a fresh temp
/// store. Returns its address and the store handle (kept alive by the
/// caller).
async fn spawn_server(workers: usize) -> (SocketAddr, tempfile::TempDir) {
    let store = tempfile::tempdir().expect("tempdir");
    let config = ServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        storage_dir: store.path().to_path_buf(),
        workers,
        session_faults: None,
    };
    let server = Server::bind(config).await.expect("bind server");
    let addr = server.local_addr();
    tokio::spawn(server.run());
    (addr, store)
}

async fn raw_client() -> RdtSocket {
    RdtSocket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind client socket")
}

fn upload_request(name: &str) -> HandshakeRequest {
    HandshakeRequest {
        operation: Operation::Upload,
        protocol: ArqKind::StopAndWait,
        filename: name.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// A clean handshake reseats the client onto a fresh server port and an
/// immediate FIN commits an empty upload.
#[tokio::test]
async fn handshake_migrates_to_session_port() {
    let (server_addr, store) = spawn_server(3).await;
    let socket = raw_client().await;

    let (peer, advertised) =
        handshake::connect(&socket, server_addr, &upload_request("empty.bin"))
            .await
            .expect("connect");
    assert_ne!(peer, server_addr, "session must not stay on the listener port");
    assert_eq!(peer.ip(), server_addr.ip());
    assert_eq!(advertised, None, "uploads advertise no size");

    // Zero-byte transfer: FIN right away.
    socket.send_to(&Packet::fin(0), peer).await.unwrap();
    let (reply, from) = timeout(Duration::from_secs(5), socket.recv_from())
        .await
        .expect("fin-ack in time")
        .expect("recv");
    assert_eq!(from, peer);
    assert!(reply.header.has(flags::FIN | flags::ACK));
    assert_eq!(reply.header.ack, 0);

    // The empty file was committed to the store.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let committed = std::fs::read(store.path().join("empty.bin")).expect("file exists");
    assert!(committed.is_empty());
}

/// The SYN-ACK for a download carries the file size.
#[tokio::test]
async fn download_syn_ack_advertises_size() {
    let (server_addr, store) = spawn_server(3).await;
    std::fs::write(store.path().join("sized.bin"), vec![7u8; 1000]).unwrap();

    let socket = raw_client().await;
    let request = HandshakeRequest {
        operation: Operation::Download,
        protocol: ArqKind::SelectiveRepeat,
        filename: "sized.bin".to_string(),
    };
    let (peer, advertised) = handshake::connect(&socket, server_addr, &request)
        .await
        .expect("connect");
    assert_eq!(advertised, Some(1000));

    // Abandon the session explicitly so the worker does not wait out its
    // retry budget.
    let err = Packet::err(b"02:client going away".to_vec());
    socket.send_to(&err, peer).await.unwrap();
}

/// Downloading a name the store has never seen is refused on the listener,
/// with no session allocated.
#[tokio::test]
async fn download_of_missing_file_is_rejected() {
    let (server_addr, _store) = spawn_server(3).await;
    let socket = raw_client().await;

    let request = HandshakeRequest {
        operation: Operation::Download,
        protocol: ArqKind::StopAndWait,
        filename: "no-such-file.bin".to_string(),
    };
    let err = handshake::connect(&socket, server_addr, &request)
        .await
        .expect_err("must fail");
    match err {
        TransferError::Peer { code, .. } => assert_eq!(code, ErrorCode::FileNotFound),
        other => panic!("expected peer error, got {other:?}"),
    }
}

/// A SYN whose negotiation payload does not parse gets ERR 04.
#[tokio::test]
async fn malformed_syn_payload_is_rejected() {
    let (server_addr, _store) = spawn_server(3).await;
    let socket = raw_client().await;

    socket
        .send_to(&Packet::syn(b"\xFF\xFF".to_vec()), server_addr)
        .await
        .unwrap();
    let (reply, _) = timeout(Duration::from_secs(5), socket.recv_from())
        .await
        .expect("reply in time")
        .expect("recv");
    assert!(reply.header.has(flags::ERR));
    let (code, _) = rdt_over_udp::error::parse_err_payload(&reply.payload);
    assert_eq!(code, ErrorCode::MalformedRequest);
}

/// With a single worker slot taken, a second client is turned away with
/// ERR 03 and no session.
#[tokio::test]
async fn saturated_pool_rejects_new_clients() {
    let (server_addr, _store) = spawn_server(1).await;

    // First client occupies the only slot and deliberately never ACKs, so
    // its worker sits in establishment for a while.
    let first = raw_client().await;
    first
        .send_to(&Packet::syn(upload_request("a.bin").encode()), server_addr)
        .await
        .unwrap();
    let (reply, _) = timeout(Duration::from_secs(5), first.recv_from())
        .await
        .expect("syn-ack in time")
        .expect("recv");
    assert!(reply.header.has(flags::SYN | flags::ACK));

    // Second client from a different port is refused.
    let second = raw_client().await;
    let err = handshake::connect(&second, server_addr, &upload_request("b.bin"))
        .await
        .expect_err("pool is full");
    match err {
        TransferError::Peer { code, .. } => assert_eq!(code, ErrorCode::ServerBusy),
        other => panic!("expected server busy, got {other:?}"),
    }
}

/// A retransmitted SYN from a connected address reaches the existing
/// worker, which answers with another SYN-ACK instead of a new session.
#[tokio::test]
async fn duplicate_syn_reuses_the_worker() {
    let (server_addr, _store) = spawn_server(3).await;
    let socket = raw_client().await;
    let syn = Packet::syn(upload_request("dup.bin").encode());

    socket.send_to(&syn, server_addr).await.unwrap();
    let (first, first_from) = timeout(Duration::from_secs(5), socket.recv_from())
        .await
        .expect("first syn-ack")
        .expect("recv");
    assert!(first.header.has(flags::SYN | flags::ACK));

    // Client pretends the SYN-ACK was lost and retries the SYN.
    socket.send_to(&syn, server_addr).await.unwrap();
    let (second, second_from) = timeout(Duration::from_secs(5), socket.recv_from())
        .await
        .expect("second syn-ack")
        .expect("recv");
    assert!(second.header.has(flags::SYN | flags::ACK));
    assert_eq!(
        first_from, second_from,
        "both SYN-ACKs must come from the same session socket"
    );

    // Finish the session cleanly.
    socket
        .send_to(&handshake::reack(), second_from)
        .await
        .unwrap();
    socket.send_to(&Packet::fin(0), second_from).await.unwrap();
}

/// The client's final ACK vanishes: the server must retransmit its
/// SYN-ACK on RTO, and answering the repeat completes the session.
#[tokio::test]
async fn lost_final_ack_heals_via_syn_ack_retransmission() {
    let (server_addr, store) = spawn_server(3).await;
    let socket = raw_client().await;

    socket
        .send_to(
            &Packet::syn(upload_request("healed.bin").encode()),
            server_addr,
        )
        .await
        .unwrap();
    let (first, session_port) = timeout(Duration::from_secs(5), socket.recv_from())
        .await
        .expect("syn-ack in time")
        .expect("recv");
    assert!(first.header.has(flags::SYN | flags::ACK));

    // Withhold the ACK, as if it had been lost. The server's own RTO must
    // produce another SYN-ACK from the same session socket.
    let (second, second_from) = timeout(Duration::from_secs(2), socket.recv_from())
        .await
        .expect("retransmitted syn-ack in time")
        .expect("recv");
    assert_eq!(second_from, session_port);
    assert!(second.header.has(flags::SYN | flags::ACK));

    // Answer the repeat the way the client would, then finish the empty
    // upload.
    socket
        .send_to(&handshake::reack(), session_port)
        .await
        .unwrap();
    socket.send_to(&Packet::fin(0), session_port).await.unwrap();
    loop {
        let (reply, _) = timeout(Duration::from_secs(5), socket.recv_from())
            .await
            .expect("fin-ack in time")
            .expect("recv");
        // Late SYN-ACK repeats may still be queued ahead of the FIN-ACK.
        if reply.header.has(flags::FIN | flags::ACK) {
            assert_eq!(reply.header.ack, 0);
            break;
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let committed = std::fs::read(store.path().join("healed.bin")).expect("file exists");
    assert!(committed.is_empty());
}

/// With the final ACK lost, the first DATA segment itself completes
/// establishment; the server must consume that very segment rather than
/// drop it.
#[tokio::test]
async fn first_data_completes_establishment() {
    let (server_addr, store) = spawn_server(3).await;
    let socket = raw_client().await;

    socket
        .send_to(
            &Packet::syn(upload_request("eager.bin").encode()),
            server_addr,
        )
        .await
        .unwrap();
    let (reply, session_port) = timeout(Duration::from_secs(5), socket.recv_from())
        .await
        .expect("syn-ack in time")
        .expect("recv");
    assert!(reply.header.has(flags::SYN | flags::ACK));

    // No ACK at all; go straight to data.
    let payload = b"settled by data".to_vec();
    socket
        .send_to(&Packet::data(0, payload.clone()), session_port)
        .await
        .unwrap();
    loop {
        let (reply, _) = timeout(Duration::from_secs(5), socket.recv_from())
            .await
            .expect("data ack in time")
            .expect("recv");
        if reply.header.flags == flags::ACK {
            assert_eq!(reply.header.ack, 0);
            break;
        }
    }

    socket.send_to(&Packet::fin(1), session_port).await.unwrap();
    loop {
        let (reply, _) = timeout(Duration::from_secs(5), socket.recv_from())
            .await
            .expect("fin-ack in time")
            .expect("recv");
        if reply.header.has(flags::FIN | flags::ACK) {
            assert_eq!(reply.header.ack, 1);
            break;
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let committed = std::fs::read(store.path().join("eager.bin")).expect("file exists");
    assert_eq!(committed, payload);
}

/// A client talking to a port where nothing answers gives up after its
/// retry budget.
#[tokio::test]
async fn connect_fails_against_a_silent_peer() {
    // Bind a socket that never responds.
    let silent = raw_client().await;
    let silent_addr = silent.local_addr;

    let socket = raw_client().await;
    let err = timeout(
        Duration::from_secs(5),
        handshake::connect(&socket, silent_addr, &upload_request("x.bin")),
    )
    .await
    .expect("must give up before the outer timeout")
    .expect_err("no one is listening");
    assert!(matches!(err, TransferError::HandshakeFailed(_)));
}
