//! Process-level protocol constants.
//!
//! Everything here is fixed at startup; nothing in the crate mutates these.
//! The CLI can override the addressing defaults but not the protocol
//! parameters, which both peers must agree on.

use std::time::Duration;

/// Well-known listener port for the server.
pub const DEFAULT_PORT: u16 = 12000;

/// Default bind/connect host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server storage directory.
pub const DEFAULT_STORAGE_DIR: &str = "./server_files";

/// Base retransmission timeout. The initial RTO equals this value; there is
/// no RTT estimation.
pub const SOCKET_TIMEOUT: Duration = Duration::from_millis(80);

/// Selective Repeat window size N. Must stay well below half the sequence
/// space, which for 32-bit segment indices it trivially does.
pub const SR_WINDOW: usize = 32;

/// Maximum concurrent transfer sessions the server will run.
pub const WORKERS: usize = 3;

/// A session with no inbound traffic for this long is declared dead.
pub const MAX_IDLE: Duration = Duration::from_secs(30);

/// SYN (client) and SYN-ACK (server) retransmission bound before the
/// handshake is abandoned.
pub const MAX_SYN_RETRIES: u32 = 10;

/// FIN retransmission bound before the closing side gives up and
/// force-closes.
pub const MAX_FIN_RETRIES: u32 = 10;
