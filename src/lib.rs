//! `rdt-over-udp` — reliable, ordered file transfer over UDP.
//!
//! A server accepts concurrent clients and supports two operations: upload
//! (client to server store) and download (server store to client).
//! Reliability lives entirely in the application layer, provided by two
//! interchangeable ARQ protocols negotiated per transfer: Stop-and-Wait
//! and Selective Repeat.
//!
//! # Architecture
//!
//! ```text
//!             SYN (op, file, protocol)      ┌────────────────┐
//!  Client ───────────────────────────────▶  │    Server      │
//!     │                                     │  demultiplexer │ :12000
//!     │        SYN-ACK from new port        └───────┬────────┘
//!     │◀────────────────────────────────────────────┤ spawns
//!     │                                     ┌───────▼────────┐
//!     │   DATA / ACK / FIN on session port  │ worker Session │ :ephemeral
//!     │◀───────────────────────────────────▶│  + ARQ engine  │
//!     ▼                                     └───────┬────────┘
//!  FileSource / FileSink                  FileSink / FileSource
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]    — wire format (serialise / deserialise, checksum)
//! - [`socket`]    — packet-oriented async UDP socket
//! - [`arq`]       — the two reliability engines (pure state machines)
//! - [`handshake`] — negotiation codec and the client connect
//! - [`session`]   — per-transfer endpoint: state, idle bound, teardown
//! - [`transfer`]  — upload/download loops atop an ARQ engine
//! - [`server`]    — listener, address demultiplexing, worker pool
//! - [`client`]    — client-side upload and download operations
//! - [`storage`]   — FileSource / FileSink and their disk implementations
//! - [`state`]     — session finite-state-machine types
//! - [`simulator`] — fault injection for deterministic tests
//! - [`config`]    — process-level protocol constants
//! - [`error`]     — transfer error kinds and ERR payload convention

pub mod arq;
pub mod client;
pub mod config;
pub mod error;
pub mod handshake;
pub mod packet;
pub mod server;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod storage;
pub mod transfer;
