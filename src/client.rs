//! Client-side operations: upload and download against a remote server.
//!
//! Both follow the same shape: handshake against the listener port, reseat
//! onto the per-session server port the SYN-ACK came from, run the
//! negotiated ARQ engine over the session, FIN exchange. The CLI in
//! `main.rs` maps the returned [`TransferError`] onto exit codes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use crate::arq::{ArqKind, ArqReceiver, ArqSender};
use crate::error::TransferError;
use crate::handshake::{self, HandshakeRequest, Operation};
use crate::session::Session;
use crate::socket::RdtSocket;
use crate::storage::{DiskSink, DiskSource};
use crate::transfer;

/// An ephemeral local bind address in the server's address family.
fn local_bind_addr(server: SocketAddr) -> SocketAddr {
    let ip: IpAddr = match server.ip() {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    SocketAddr::new(ip, 0)
}

/// Send a local file to the server store under `remote_name`.
///
/// Returns the number of bytes transferred and acknowledged.
pub async fn upload(
    server: SocketAddr,
    source_path: &Path,
    remote_name: &str,
    protocol: ArqKind,
) -> Result<u64, TransferError> {
    let mut source = DiskSource::open(source_path)
        .await
        .map_err(TransferError::LocalIo)?;

    let socket = RdtSocket::bind(local_bind_addr(server))
        .await
        .map_err(TransferError::Network)?;
    let request = HandshakeRequest {
        operation: Operation::Upload,
        protocol,
        filename: remote_name.to_string(),
    };
    let (peer, _) = handshake::connect(&socket, server, &request).await?;
    log::info!(
        "[client] uploading {} as {remote_name} via {protocol} to {peer}",
        source_path.display()
    );

    let mut session = Session::new(socket, peer);
    let mut engine = ArqSender::new(protocol);
    transfer::send_file(&mut session, &mut engine, &mut source).await
}

/// Fetch `remote_name` from the server store into `dest_path`.
///
/// Returns the number of bytes received and committed.
pub async fn download(
    server: SocketAddr,
    remote_name: &str,
    dest_path: &Path,
    protocol: ArqKind,
) -> Result<u64, TransferError> {
    let socket = RdtSocket::bind(local_bind_addr(server))
        .await
        .map_err(TransferError::Network)?;
    let request = HandshakeRequest {
        operation: Operation::Download,
        protocol,
        filename: remote_name.to_string(),
    };
    let (peer, advertised) = handshake::connect(&socket, server, &request).await?;
    log::info!(
        "[client] downloading {remote_name} via {protocol} from {peer}{}",
        match advertised {
            Some(n) => format!(" ({n} bytes)"),
            None => String::new(),
        }
    );

    let mut session = Session::new(socket, peer);
    let mut sink = match DiskSink::create(dest_path.to_path_buf()).await {
        Ok(sink) => sink,
        Err(e) => {
            // The server already allocated a session; tell it to stop
            // waiting instead of letting it idle out.
            session
                .send_err(crate::error::ErrorCode::LocalIo, "destination unwritable")
                .await;
            return Err(TransferError::LocalIo(e));
        }
    };

    let mut engine = ArqReceiver::new(protocol);
    let received = transfer::receive_file(&mut session, &mut engine, &mut sink, None).await?;
    if let Some(expected) = advertised {
        if expected != received {
            log::warn!(
                "[client] server advertised {expected} bytes but {received} arrived"
            );
        }
    }
    Ok(received)
}
