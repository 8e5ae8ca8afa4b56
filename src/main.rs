//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and dispatches into server, upload, or download
//! mode. All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing) and the mapping from
//! transfer outcomes to exit codes.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};

use rdt_over_udp::arq::ArqKind;
use rdt_over_udp::client;
use rdt_over_udp::config::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_STORAGE_DIR};
use rdt_over_udp::error::{ErrorCode, TransferError};
use rdt_over_udp::handshake::validate_filename;
use rdt_over_udp::server::{Server, ServerConfig};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(name = "rdt-over-udp", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// Increase verbosity (debug-level logging).
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    verbose: bool,

    /// Decrease verbosity (errors only).
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Server host.
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum ProtocolArg {
    StopAndWait,
    SelectiveRepeat,
}

impl From<ProtocolArg> for ArqKind {
    fn from(p: ProtocolArg) -> Self {
        match p {
            ProtocolArg::StopAndWait => ArqKind::StopAndWait,
            ProtocolArg::SelectiveRepeat => ArqKind::SelectiveRepeat,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the file server.
    StartServer {
        #[command(flatten)]
        common: CommonArgs,

        /// Directory backing the file store.
        #[arg(short = 's', long = "storage", default_value = DEFAULT_STORAGE_DIR)]
        dirpath: PathBuf,
    },
    /// Send a local file to the server store.
    Upload {
        #[command(flatten)]
        common: CommonArgs,

        /// Local file to send.
        #[arg(short = 's', long = "source")]
        srcpath: PathBuf,

        /// Name for the file in the server store.
        #[arg(short = 'n', long)]
        name: String,

        /// ARQ protocol to run.
        #[arg(short = 'r', long, value_enum)]
        protocol: ProtocolArg,
    },
    /// Fetch a file from the server store.
    Download {
        #[command(flatten)]
        common: CommonArgs,

        /// Destination path (defaults to the server-side name in the
        /// current directory).
        #[arg(short = 'd', long = "destination")]
        dstpath: Option<PathBuf>,

        /// Name of the file in the server store.
        #[arg(short = 'n', long)]
        name: String,

        /// ARQ protocol to run.
        #[arg(short = 'r', long, value_enum)]
        protocol: ProtocolArg,
    },
}

fn init_logging(common: &CommonArgs) {
    let default_level = if common.verbose {
        "debug"
    } else if common.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

/// Resolve `-H`/`-p` into a socket address. Failures are argument errors.
fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    (host, port).to_socket_addrs().ok()?.next()
}

/// Exit codes shared by upload and download: 1 network, 3 local file, 4
/// server-reported. Download narrows a remote `05` to its own exit 5.
fn exit_code(e: &TransferError, download: bool) -> u8 {
    match e {
        TransferError::LocalIo(_) => 3,
        TransferError::Peer { code, .. } => {
            if download && *code == ErrorCode::FileNotFound {
                5
            } else {
                4
            }
        }
        TransferError::HandshakeFailed(_)
        | TransferError::PeerGone(_)
        | TransferError::Network(_)
        | TransferError::ProtocolViolation(_) => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::StartServer { common, dirpath } => {
            init_logging(&common);
            let Some(bind) = resolve(&common.host, common.port) else {
                eprintln!("invalid bind address {}:{}", common.host, common.port);
                return ExitCode::from(2);
            };
            let server = match Server::bind(ServerConfig::new(bind, dirpath)).await {
                Ok(server) => server,
                Err(e) => {
                    eprintln!("cannot bind {bind}: {e}");
                    return ExitCode::from(1);
                }
            };
            match server.run().await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("server failed: {e}");
                    ExitCode::from(1)
                }
            }
        }

        Command::Upload {
            common,
            srcpath,
            name,
            protocol,
        } => {
            init_logging(&common);
            let Some(server) = resolve(&common.host, common.port) else {
                eprintln!("invalid server address {}:{}", common.host, common.port);
                return ExitCode::from(2);
            };
            if let Err(e) = validate_filename(&name) {
                eprintln!("invalid remote name {name:?}: {e}");
                return ExitCode::from(2);
            }
            match client::upload(server, &srcpath, &name, protocol.into()).await {
                Ok(bytes) => {
                    log::info!("[client] upload complete, {bytes} bytes");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("upload failed: {e}");
                    ExitCode::from(exit_code(&e, false))
                }
            }
        }

        Command::Download {
            common,
            dstpath,
            name,
            protocol,
        } => {
            init_logging(&common);
            let Some(server) = resolve(&common.host, common.port) else {
                eprintln!("invalid server address {}:{}", common.host, common.port);
                return ExitCode::from(2);
            };
            if let Err(e) = validate_filename(&name) {
                eprintln!("invalid remote name {name:?}: {e}");
                return ExitCode::from(2);
            }
            let dest = dstpath.unwrap_or_else(|| PathBuf::from(&name));
            match client::download(server, &name, &dest, protocol.into()).await {
                Ok(bytes) => {
                    log::info!("[client] download complete, {bytes} bytes into {}", dest.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("download failed: {e}");
                    ExitCode::from(exit_code(&e, true))
                }
            }
        }
    }
}
