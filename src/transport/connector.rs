//! Shard Connector
//!
//! Executes one forwarded operation against a shard node over a dedicated connection.
//! The connection never outlives the operation, whatever happens to the client session.

use super::relay::{self, ChunkStream, RelayError, Response};
use crate::error::{Error, StorageError, TransportError};
use crate::routing::types::{Category, ShardId};
use crate::storage::protocol::{self, Command};

use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub struct ShardConnector {
    shard: ShardId,
    addr: SocketAddr,
}

/// A shard's answer to a fetch. Owns the connection until the body is consumed or dropped.
pub struct ShardReply {
    pub response: Response,
    reader: BufReader<TcpStream>,
}

impl ShardReply {
    /// The full response body, including the bytes consumed while peeking.
    pub fn into_body(self) -> ChunkStream<'static> {
        match self.response {
            Response::Data(head) => relay::with_head(head, relay::chunks(self.reader)),
            Response::Failed(_) => relay::chunks(tokio::io::empty()),
        }
    }
}

impl ShardConnector {
    pub fn new(shard: ShardId, addr: SocketAddr) -> Self {
        Self { shard, addr }
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        tracing::debug!("Connecting to shard {} at {}", self.shard, self.addr);

        TcpStream::connect(self.addr)
            .await
            .map_err(|source| TransportError::Unavailable {
                peer: format!("Shard {}", self.shard),
                addr: self.addr,
                source,
            })
    }

    fn io_error(&self, source: std::io::Error) -> TransportError {
        TransportError::io(format!("shard {}", self.shard), source)
    }

    /// Sends a one-line request and half-closes, so the shard sees exactly one command.
    async fn request(&self, command: &Command) -> Result<BufReader<TcpStream>, TransportError> {
        let mut stream = self.connect().await?;

        stream
            .write_all(command.header().as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        stream.shutdown().await.map_err(|e| self.io_error(e))?;

        tracing::debug!("Forwarded '{}' to shard {}", command, self.shard);

        Ok(BufReader::new(stream))
    }

    /// Pushes an upload to the shard and returns the shard's status line.
    pub async fn store(
        &self,
        filename: &str,
        destination: &str,
        body: ChunkStream<'_>,
    ) -> Result<String, Error> {
        let stream = self.connect().await?;
        let (read_half, mut write_half) = stream.into_split();

        write_half
            .write_all(protocol::store_header(filename, destination).as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;

        let sent = match relay::relay_to_end(body, &mut write_half).await {
            Ok(sent) => sent,
            Err(RelayError::Source(source)) => {
                return Err(StorageError::Receive {
                    path: PathBuf::from(destination).join(filename),
                    source,
                }
                .into());
            }
            Err(RelayError::Sink(e)) => return Err(self.io_error(e).into()),
        };

        tracing::info!(
            "Forwarded {} bytes of {} to shard {}",
            sent,
            filename,
            self.shard
        );

        let mut status = String::new();
        BufReader::new(read_half)
            .read_line(&mut status)
            .await
            .map_err(|e| self.io_error(e))?;

        if status.is_empty() {
            return Err(self
                .io_error(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "shard closed without a status",
                ))
                .into());
        }

        Ok(status.trim_end().to_string())
    }

    /// Requests a file. The caller decides what to do with an error reply.
    pub async fn fetch(&self, path: &str) -> Result<ShardReply, TransportError> {
        let mut reader = self
            .request(&Command::Download(path.to_string()))
            .await?;
        let response = relay::read_response(&mut reader)
            .await
            .map_err(|e| self.io_error(e))?;

        Ok(ShardReply { response, reader })
    }

    /// Requests the shard's archive through the `<category>.tar` name.
    pub async fn archive(&self, category: Category) -> Result<ShardReply, TransportError> {
        self.fetch(&category.archive_name()).await
    }

    /// Forwards a delete and returns the shard's status line verbatim.
    pub async fn delete(&self, path: &str) -> Result<String, TransportError> {
        let mut reader = self.request(&Command::Delete(path.to_string())).await?;

        let mut status = String::new();
        reader
            .read_line(&mut status)
            .await
            .map_err(|e| self.io_error(e))?;

        if status.is_empty() {
            return Err(self.io_error(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "shard closed without a status",
            )));
        }

        Ok(status.trim_end().to_string())
    }

    /// Collects the shard's listing of `dir`.
    pub async fn list(&self, dir: &str) -> Result<Vec<String>, TransportError> {
        let mut reader = self.request(&Command::List(dir.to_string())).await?;

        match relay::read_response(&mut reader)
            .await
            .map_err(|e| self.io_error(e))?
        {
            Response::Failed(message) => Err(TransportError::Remote {
                peer: format!("shard {}", self.shard),
                message,
            }),
            Response::Data(head) => {
                let mut raw = head.to_vec();
                reader
                    .read_to_end(&mut raw)
                    .await
                    .map_err(|e| self.io_error(e))?;

                Ok(String::from_utf8_lossy(&raw)
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect())
            }
        }
    }
}
