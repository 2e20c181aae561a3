//! Sequential byte streams over the backend's chunk-aligned download primitive.

use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::backend::ChannelBackend;
use crate::error::{ChannelStoreError, Result};
use crate::range::ByteRange;
use crate::types::{FileLocation, FileResponse};

/// Chunk size served by the download primitive for documents (1 MiB).
pub const DEFAULT_CHUNK_SIZE: i64 = 1024 * 1024;

/// Part size used when downloading a whole photo.
pub const IMAGE_PART_SIZE: i64 = 512 * 1024;

/// One chunk to fetch, as handed out by [`PartCursor::next_part`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRequest {
    /// Absolute, chunk-aligned offset of the chunk
    pub offset: i64,
    pub index: i64,
}

/// Walks the aligned chunks covering an inclusive `[start, end]` window and
/// trims each fetched chunk down to the bytes inside the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartCursor {
    offset: i64,
    current_part: i64,
    part_count: i64,
    first_cut: i64,
    last_cut: i64,
    chunk_size: i64,
}

impl PartCursor {
    pub fn new(start: i64, end: i64, chunk_size: i64) -> Self {
        let offset = start - (start % chunk_size);
        Self {
            offset,
            current_part: 0,
            part_count: (end - offset + chunk_size) / chunk_size,
            first_cut: start - offset,
            last_cut: (end % chunk_size) + 1,
            chunk_size,
        }
    }

    pub fn part_count(&self) -> i64 {
        self.part_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_part >= self.part_count
    }

    pub fn next_part(&mut self) -> Option<PartRequest> {
        if self.is_exhausted() {
            return None;
        }

        let request = PartRequest {
            offset: self.offset,
            index: self.current_part,
        };
        self.offset += self.chunk_size;
        self.current_part += 1;
        Some(request)
    }

    /// Whether a chunk of `raw_len` bytes ends before the next part begins.
    ///
    /// Only parts before the last one can be short; the last part may stop at
    /// the end of the object.
    pub fn is_short(&self, part: &PartRequest, raw_len: usize) -> bool {
        part.index < self.part_count - 1 && (raw_len as i64) < self.chunk_size
    }

    /// Keeps the part of `chunk` that lies inside the window.
    ///
    /// Bytes past `chunk_size` are dropped first. Cut points are clamped to the
    /// chunk's actual length, so a short chunk never panics; it just yields
    /// fewer (possibly zero) bytes.
    pub fn cut(&self, part: &PartRequest, mut chunk: Vec<u8>) -> Vec<u8> {
        chunk.truncate(usize::try_from(self.chunk_size).unwrap_or(usize::MAX));
        let len = chunk.len();
        let first_cut = (self.first_cut as usize).min(len);
        let last_cut = (self.last_cut as usize).min(len);
        let is_first = part.index == 0;
        let is_last = part.index == self.part_count - 1;

        if self.part_count == 1 {
            if first_cut >= last_cut {
                return Vec::new();
            }
            chunk.truncate(last_cut);
            chunk.drain(..first_cut);
        } else if is_first {
            chunk.drain(..first_cut);
        } else if is_last {
            chunk.truncate(last_cut);
        }
        chunk
    }
}

/// Reads exactly the bytes `[start, end]` of a remote object.
pub struct ChunkedRangeReader {
    backend: Arc<dyn ChannelBackend>,
    location: FileLocation,
    start: i64,
    end: i64,
    chunk_size: i64,
    cursor: PartCursor,
    buffer: Vec<u8>,
    position: usize,
    delivered: i64,
}

impl ChunkedRangeReader {
    /// Creates a reader for the inclusive window `[start, end]` of an object of
    /// `total_size` bytes.
    ///
    /// # Arguments
    ///
    /// * `backend` - Session used for every chunk fetch
    /// * `location` - Remote handle of the object
    /// * `start`, `end` - Inclusive byte window
    /// * `total_size` - Addressable length of the object
    /// * `chunk_size` - Alignment and size of every chunk request
    ///
    /// # Returns
    ///
    /// * `Err(ChannelStoreError::RangeNotSatisfiable)` if the window does not fit the object
    pub fn new(
        backend: Arc<dyn ChannelBackend>,
        location: FileLocation,
        start: i64,
        end: i64,
        total_size: i64,
        chunk_size: i64,
    ) -> Result<Self> {
        let range = ByteRange::new(start, end, total_size)?;
        if chunk_size <= 0 {
            return Err(ChannelStoreError::Other(anyhow::anyhow!(
                "chunk size must be positive, got {}",
                chunk_size
            )));
        }

        Ok(Self {
            backend,
            location,
            start: range.start,
            end: range.end,
            chunk_size,
            cursor: PartCursor::new(range.start, range.end, chunk_size),
            buffer: Vec::new(),
            position: 0,
            delivered: 0,
        })
    }

    /// Total number of bytes this reader will produce.
    pub fn len(&self) -> i64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> i64 {
        self.len() - self.delivered
    }

    /// Fills `buf` with the next bytes of the window.
    ///
    /// Returns `Ok(0)` once the whole window has been delivered, and keeps
    /// returning `Ok(0)` on every later call.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.remaining() == 0 {
            return Ok(0);
        }

        if self.position >= self.buffer.len() {
            self.fill().await?;
        }

        let available = &self.buffer[self.position..];
        let n = available
            .len()
            .min(buf.len())
            .min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        self.delivered += n as i64;
        Ok(n)
    }

    /// Returns the next run of bytes, at most one chunk long. Empty once the
    /// window is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Vec<u8>> {
        if self.remaining() == 0 {
            return Ok(Vec::new());
        }

        if self.position >= self.buffer.len() {
            self.fill().await?;
        }

        let take = (self.buffer.len() - self.position)
            .min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));
        let chunk = self.buffer[self.position..self.position + take].to_vec();
        self.position += take;
        self.delivered += take as i64;
        Ok(chunk)
    }

    /// Drains the remaining window into `output`.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of bytes written
    pub async fn copy_to<W>(&mut self, output: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        loop {
            let chunk = self.next_chunk().await?;
            if chunk.is_empty() {
                break;
            }
            output.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        output.flush().await?;

        tracing::debug!(
            target: "channelstore::reader::copy_to",
            "Copied {} bytes of object {} ({}-{})",
            written,
            self.location.id(),
            self.start,
            self.end
        );
        Ok(written)
    }

    /// Turns the reader into a stream of byte runs, for body-streaming servers.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            let chunk = reader.next_chunk().await?;
            if chunk.is_empty() {
                Ok(None)
            } else {
                Ok(Some((chunk, reader)))
            }
        })
    }

    async fn fill(&mut self) -> Result<()> {
        let mut restarted = false;
        loop {
            let (chunk, short) = match self.cursor.next_part() {
                Some(part) => {
                    let bytes = fetch_chunk(
                        self.backend.as_ref(),
                        &self.location,
                        part.offset,
                        self.chunk_size,
                    )
                    .await?;
                    let short = self.cursor.is_short(&part, bytes.len());
                    (self.cursor.cut(&part, bytes), short)
                }
                None => (Vec::new(), false),
            };

            if !chunk.is_empty() {
                if short {
                    // Realign on the first byte the backend did not return
                    let next = self.start + self.delivered + chunk.len() as i64;
                    tracing::warn!(
                        target: "channelstore::reader::fill",
                        "Short chunk for object {}, resuming at offset {}",
                        self.location.id(),
                        next
                    );
                    self.cursor = PartCursor::new(next, self.end, self.chunk_size);
                }
                self.buffer = chunk;
                self.position = 0;
                return Ok(());
            }

            let position = self.start + self.delivered;
            if restarted {
                tracing::error!(
                    target: "channelstore::reader::fill",
                    "Object {} returned no data twice at offset {}",
                    self.location.id(),
                    position
                );
                return Err(ChannelStoreError::EmptyChunk { offset: position });
            }

            tracing::warn!(
                target: "channelstore::reader::fill",
                "Empty chunk for object {} at offset {}, restarting",
                self.location.id(),
                position
            );
            self.cursor = PartCursor::new(position, self.end, self.chunk_size);
            restarted = true;
        }
    }
}

impl std::fmt::Debug for ChunkedRangeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedRangeReader")
            .field("object", &self.location.id())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("chunk_size", &self.chunk_size)
            .field("delivered", &self.delivered)
            .finish()
    }
}

async fn fetch_chunk(
    backend: &dyn ChannelBackend,
    location: &FileLocation,
    offset: i64,
    limit: i64,
) -> Result<Vec<u8>> {
    match backend.get_file(location, offset, limit).await? {
        FileResponse::File(bytes) => Ok(bytes),
        FileResponse::CdnRedirect { dc_id } => Err(ChannelStoreError::UnexpectedResponse(
            format!("cdn redirect to dc {}", dc_id),
        )),
    }
}

/// Downloads a whole object of unknown size by requesting consecutive parts
/// until a short one comes back.
///
/// # Returns
///
/// * `Ok(u64)` - Number of bytes written to `output`
pub async fn download_object<W>(
    backend: &dyn ChannelBackend,
    location: &FileLocation,
    part_size: i64,
    output: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut offset = 0i64;
    let mut written = 0u64;
    loop {
        let part = fetch_chunk(backend, location, offset, part_size).await?;
        output.write_all(&part).await?;
        written += part.len() as u64;

        if (part.len() as i64) < part_size {
            break;
        }
        offset += part_size;
    }
    output.flush().await?;

    tracing::debug!(
        target: "channelstore::reader::download_object",
        "Downloaded object {} ({} bytes)",
        location.id(),
        written
    );
    Ok(written)
}
