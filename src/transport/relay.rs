use crate::storage::protocol::{CHUNK_SIZE, ERROR_PREFIX};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// A lazy, finite, non-restartable sequence of byte chunks.
pub type ChunkStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Which side of a relay failed.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("source failed: {0}")]
    Source(#[source] io::Error),

    #[error("sink failed: {0}")]
    Sink(#[source] io::Error),
}

/// Wraps a reader into a chunk stream that ends when the reader reports end-of-file.
pub fn chunks<'a, R>(reader: R) -> ChunkStream<'a>
where
    R: AsyncRead + Send + 'a,
{
    ReaderStream::with_capacity(reader, CHUNK_SIZE).boxed()
}

/// Prepends bytes that were already read (e.g. while peeking) to a chunk stream.
pub fn with_head<'a>(head: Bytes, rest: ChunkStream<'a>) -> ChunkStream<'a> {
    if head.is_empty() {
        return rest;
    }
    stream::once(async move { Ok(head) }).chain(rest).boxed()
}

/// Writes every chunk into `sink` and flushes it. Does not end the sink.
pub async fn forward<W>(mut source: ChunkStream<'_>, sink: &mut W) -> Result<u64, RelayError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0u64;

    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(RelayError::Source)?;
        sink.write_all(&chunk).await.map_err(RelayError::Sink)?;
        total += chunk.len() as u64;
        tracing::trace!("Relayed {} bytes ({} total)", chunk.len(), total);
    }

    sink.flush().await.map_err(RelayError::Sink)?;

    Ok(total)
}

/// Forwards `source` into `sink`, then signals end-of-stream on the sink.
///
/// The sink is ended even when the source fails midway, so the next hop sees a
/// truncated stream instead of waiting forever.
pub async fn relay_to_end<W>(source: ChunkStream<'_>, sink: &mut W) -> Result<u64, RelayError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let result = forward(source, sink).await;

    if let Err(RelayError::Sink(_)) = result {
        return result;
    }

    sink.shutdown().await.map_err(RelayError::Sink)?;

    result
}

/// Reads everything a chunk stream yields into memory.
pub async fn collect(mut source: ChunkStream<'_>) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = source.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// First bytes of a response that is either an error line or raw data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The error message, without the prefix and newline.
    Failed(String),
    /// Bytes consumed while peeking. They belong to the data and must be relayed first.
    Data(Bytes),
}

/// Peeks at most `ERROR_PREFIX.len()` bytes to tell an error line from data.
pub async fn read_response<R>(reader: &mut R) -> io::Result<Response>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let prefix = ERROR_PREFIX.as_bytes();
    let mut head = Vec::with_capacity(prefix.len());

    while head.len() < prefix.len() {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        let take = buf.len().min(prefix.len() - head.len());
        head.extend_from_slice(&buf[..take]);
        reader.consume(take);

        if !prefix.starts_with(&head) {
            break;
        }
    }

    if head != prefix {
        return Ok(Response::Data(Bytes::from(head)));
    }

    let mut message = String::new();
    reader.read_line(&mut message).await?;

    Ok(Response::Failed(message.trim_end().to_string()))
}
