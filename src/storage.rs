//! File access behind the transfer core.
//!
//! The ARQ machinery never touches the filesystem directly: senders pull
//! chunks from a [`FileSource`] and receivers push in-order chunks into a
//! [`FileSink`]. The disk implementations here cover the CLI and the
//! server store; tests are free to provide their own.
//!
//! Uploads land in a hidden per-session `.part` file that is atomically
//! renamed over the destination on finalize, so concurrent uploads of the
//! same name never interleave bytes and an aborted transfer never leaves a
//! half-written file under its real name.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

/// Where a sender's bytes come from.
#[allow(async_fn_in_trait)]
pub trait FileSource {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Read up to `max` bytes starting at `offset`. An empty vector means
    /// end of file. Transfers call this with strictly increasing offsets.
    async fn read_at(&mut self, offset: u64, max: usize) -> std::io::Result<Vec<u8>>;
}

/// Where a receiver's bytes go. Appends are strictly sequential.
#[allow(async_fn_in_trait)]
pub trait FileSink {
    async fn append(&mut self, chunk: &[u8]) -> std::io::Result<()>;

    /// Commit the received bytes under their final name.
    async fn finalize(&mut self) -> std::io::Result<()>;

    /// Discard everything written so far. Idempotent; also safe after
    /// `finalize`, where it does nothing.
    async fn abort(&mut self);
}

// ---------------------------------------------------------------------------
// Disk source
// ---------------------------------------------------------------------------

/// A readable file on disk.
#[derive(Debug)]
pub struct DiskSource {
    file: File,
    len: u64,
}

impl DiskSource {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self { file, len })
    }
}

impl FileSource for DiskSource {
    fn size(&self) -> u64 {
        self.len
    }

    async fn read_at(&mut self, offset: u64, max: usize) -> std::io::Result<Vec<u8>> {
        if offset >= self.len {
            return Ok(Vec::new());
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        let want = max.min((self.len - offset) as usize);
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break; // file shrank underneath us
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// Disk sink
// ---------------------------------------------------------------------------

/// Distinguishes temp files of concurrent sessions within one process.
static SINK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A writable file on disk, staged through a temporary path.
#[derive(Debug)]
pub struct DiskSink {
    final_path: PathBuf,
    tmp_path: PathBuf,
    file: Option<File>,
    done: bool,
}

impl DiskSink {
    /// Create the staging file next to `final_path`. The destination is
    /// not touched until [`FileSink::finalize`].
    pub async fn create(final_path: PathBuf) -> std::io::Result<Self> {
        let name = final_path
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no filename"))?
            .to_string_lossy()
            .into_owned();
        let unique = SINK_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(".{name}.{}.{unique}.part", std::process::id());
        let tmp_path = match final_path.parent() {
            Some(dir) if dir != Path::new("") => dir.join(tmp_name),
            _ => PathBuf::from(tmp_name),
        };
        let file = File::create(&tmp_path).await?;
        Ok(Self {
            final_path,
            tmp_path,
            file: Some(file),
            done: false,
        })
    }
}

impl FileSink for DiskSink {
    async fn append(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(chunk).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sink already closed",
            )),
        }
    }

    async fn finalize(&mut self) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&self.tmp_path, &self.final_path).await?;
            self.done = true;
        }
        Ok(())
    }

    async fn abort(&mut self) {
        self.file.take();
        if !self.done {
            self.done = true;
            if let Err(e) = fs::remove_file(&self.tmp_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("[storage] could not remove {}: {e}", self.tmp_path.display());
                }
            }
        }
    }
}

impl Drop for DiskSink {
    /// Last-resort cleanup for sessions cancelled without an explicit
    /// abort, so no `.part` file outlives its transfer.
    fn drop(&mut self) {
        if !self.done {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Resolve `name` inside the server store. `name` must already have passed
/// [`crate::handshake::validate_filename`].
pub fn store_path(storage_dir: &Path, name: &str) -> PathBuf {
    storage_dir.join(name)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
