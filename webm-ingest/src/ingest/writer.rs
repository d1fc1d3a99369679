//! Payload persistence.
//!
//! Append-mode uploads are buffered completely before the append, and
//! overwrite-mode uploads are streamed into a hidden `.part` file that is
//! renamed over the destination once it is synced. Either way a reader never
//! sees a partially written upload under its final name.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Cap on the up-front buffer allocation, independent of the declared length.
const MAX_PREALLOC_BYTES: usize = 1024 * 1024;

/// Slowest sustained upload rate tolerated before the whole body times out.
pub const MIN_BODY_BYTES_PER_SEC: u64 = 64 * 1024;

/// How the destination file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum WriteMode {
    Append,
    Truncate,
}

/// Successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub destination: PathBuf,
    pub bytes_written: u64,
}

/// Writes upload payloads into the output directory.
#[derive(Debug)]
pub struct IngestWriter {
    output_dir: PathBuf,
    read_timeout: Duration,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl IngestWriter {
    pub fn new(output_dir: impl Into<PathBuf>, read_timeout: Duration) -> Self {
        Self {
            output_dir: output_dir.into(),
            read_timeout,
            locks: DashMap::new(),
        }
    }

    /// Path of `file_name` inside the output directory.
    pub fn destination(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    /// Write exactly `declared_length` bytes of `body` to `destination`.
    pub async fn write<S, E>(
        &self,
        destination: &Path,
        mode: WriteMode,
        body: S,
        declared_length: u64,
    ) -> Result<IngestOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        match mode {
            WriteMode::Append => {
                let payload = self.read_body(body, declared_length).await?;
                self.append(destination, &payload).await
            }
            WriteMode::Truncate => self.overwrite(destination, body, declared_length).await,
        }
    }

    /// Collect exactly `declared_length` bytes from `body`.
    ///
    /// Data past the declared length is never read.
    pub async fn read_body<S, E>(&self, mut body: S, declared_length: u64) -> Result<Bytes>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let capacity = usize::try_from(declared_length)
            .unwrap_or(usize::MAX)
            .min(MAX_PREALLOC_BYTES);
        let mut buf = BytesMut::with_capacity(capacity);

        let deadline = self.body_deadline(declared_length);
        let mut remaining = declared_length;
        while remaining > 0 {
            let chunk = self
                .next_chunk(&mut body, deadline, declared_length, remaining)
                .await?;
            let take = chunk_len_within(&chunk, remaining);
            buf.extend_from_slice(&chunk[..take]);
            remaining -= take as u64;
        }
        Ok(buf.freeze())
    }

    /// Append `payload` to `destination`, creating it if needed.
    pub async fn append(&self, destination: &Path, payload: &[u8]) -> Result<IngestOutcome> {
        let lock = self.lock_for(destination);
        let guard = lock.lock().await;

        let result = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(destination)
                .await
                .map_err(|e| write_error("opening", destination, e))?;
            file.write_all(payload)
                .await
                .map_err(|e| write_error("appending to", destination, e))?;
            sync(&mut file, destination).await
        }
        .await;

        drop(guard);
        self.release_lock(destination, lock);
        result?;

        debug!(
            destination = %destination.display(),
            bytes = payload.len(),
            "Appended upload"
        );
        Ok(IngestOutcome {
            destination: destination.to_path_buf(),
            bytes_written: payload.len() as u64,
        })
    }

    async fn overwrite<S, E>(
        &self,
        destination: &Path,
        mut body: S,
        declared_length: u64,
    ) -> Result<IngestOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let lock = self.lock_for(destination);
        let guard = lock.lock().await;

        let mut part = PartFile::new(part_path(destination));
        let result = async {
            self.stream_to_file(&part.path, &mut body, declared_length)
                .await?;
            tokio::fs::rename(&part.path, destination)
                .await
                .map_err(|e| write_error("renaming into", destination, e))?;
            part.renamed = true;
            Ok::<_, Error>(())
        }
        .await;
        drop(part);

        drop(guard);
        self.release_lock(destination, lock);
        result?;

        debug!(
            destination = %destination.display(),
            bytes = declared_length,
            "Wrote upload"
        );
        Ok(IngestOutcome {
            destination: destination.to_path_buf(),
            bytes_written: declared_length,
        })
    }

    async fn stream_to_file<S, E>(
        &self,
        path: &Path,
        body: &mut S,
        declared_length: u64,
    ) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut file = File::create(path)
            .await
            .map_err(|e| write_error("creating", path, e))?;

        let deadline = self.body_deadline(declared_length);
        let mut remaining = declared_length;
        while remaining > 0 {
            let chunk = self
                .next_chunk(body, deadline, declared_length, remaining)
                .await?;
            let take = chunk_len_within(&chunk, remaining);
            file.write_all(&chunk[..take])
                .await
                .map_err(|e| write_error("writing", path, e))?;
            remaining -= take as u64;
        }
        sync(&mut file, path).await
    }

    /// Latest instant by which a body of `declared_length` bytes must be read.
    ///
    /// One read timeout plus the time the body takes at
    /// [`MIN_BODY_BYTES_PER_SEC`].
    pub fn body_deadline(&self, declared_length: u64) -> Instant {
        let transfer = Duration::from_secs(declared_length / MIN_BODY_BYTES_PER_SEC);
        Instant::now() + self.read_timeout + transfer
    }

    /// Next non-empty body chunk.
    ///
    /// Each read is bounded by the read timeout and never runs past `deadline`.
    async fn next_chunk<S, E>(
        &self,
        body: &mut S,
        deadline: Instant,
        declared: u64,
        remaining: u64,
    ) -> Result<Bytes>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        loop {
            let received = declared - remaining;
            let read_deadline = Instant::now() + self.read_timeout;
            match tokio::time::timeout_at(read_deadline.min(deadline), body.next()).await {
                Err(_) if deadline <= read_deadline => {
                    return Err(Error::write(format!(
                        "timeout: body too slow, received {received} of {declared} bytes before the deadline"
                    )));
                }
                Err(_) => {
                    return Err(Error::write(format!(
                        "timeout: no body data for {:?} after {received} of {declared} bytes",
                        self.read_timeout
                    )));
                }
                Ok(None) => {
                    return Err(Error::write(format!(
                        "truncated body: received {received} of {declared} bytes"
                    )));
                }
                Ok(Some(Err(e))) => {
                    return Err(Error::write(format!(
                        "truncated body: received {received} of {declared} bytes ({e})"
                    )));
                }
                Ok(Some(Ok(chunk))) if chunk.is_empty() => continue,
                Ok(Some(Ok(chunk))) => return Ok(chunk),
            }
        }
    }

    fn lock_for(&self, destination: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(destination.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock table entry once no other request holds it.
    fn release_lock(&self, destination: &Path, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(destination, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn chunk_len_within(chunk: &Bytes, remaining: u64) -> usize {
    usize::try_from(remaining).map_or(chunk.len(), |r| chunk.len().min(r))
}

/// In-flight overwrite target, removed on drop unless it was renamed.
///
/// Covers both write failures and the request future being dropped when
/// the client disconnects.
struct PartFile {
    path: PathBuf,
    renamed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            renamed: false,
        }
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.renamed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove partial upload");
        }
    }
}

/// Whether `name` has the shape of an in-flight overwrite file.
pub fn is_part_file_name(name: &str) -> bool {
    name.len() > ".part".len() && name.starts_with('.') && name.ends_with(".part")
}

/// Hidden sibling used while an overwrite is in flight.
fn part_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.part"))
}

async fn sync(file: &mut File, path: &Path) -> Result<()> {
    file.flush()
        .await
        .map_err(|e| write_error("flushing", path, e))?;
    file.sync_all()
        .await
        .map_err(|e| write_error("syncing", path, e))
}

fn write_error(op: &str, path: &Path, source: std::io::Error) -> Error {
    Error::write(format!("failed {op} {}: {source}", path.display()))
}
