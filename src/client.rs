//! Coordinator Client
//!
//! Speaks the client-facing protocol. Every call opens its own connection, sends one
//! command and reads the answer until the coordinator is done with it.

use crate::error::{Error, StorageError, TransportError};
use crate::storage::protocol::{self, Command};
use crate::transport::relay::{self, ChunkStream, RelayError, Response};

use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const PEER: &str = "Coordinator";

#[derive(Debug, Clone)]
pub struct Client {
    addr: SocketAddr,
}

impl Client {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        TcpStream::connect(self.addr)
            .await
            .map_err(|source| TransportError::Unavailable {
                peer: PEER.to_string(),
                addr: self.addr,
                source,
            })
    }

    /// Sends a one-line command and half-closes.
    async fn request(&self, command: &Command) -> Result<BufReader<TcpStream>, TransportError> {
        let mut stream = self.connect().await?;

        stream
            .write_all(command.header().as_bytes())
            .await
            .map_err(|e| TransportError::io(PEER, e))?;
        stream
            .shutdown()
            .await
            .map_err(|e| TransportError::io(PEER, e))?;

        Ok(BufReader::new(stream))
    }

    /// Uploads `body` as `filename` into the directory `destination`.
    pub async fn upload(
        &self,
        filename: &str,
        destination: &str,
        body: ChunkStream<'_>,
    ) -> Result<String, Error> {
        let stream = self.connect().await?;
        let (read_half, mut write_half) = stream.into_split();

        let header = Command::Upload {
            filename: filename.to_string(),
            destination: destination.to_string(),
        }
        .header();
        write_half
            .write_all(header.as_bytes())
            .await
            .map_err(|e| TransportError::io(PEER, e))?;

        match relay::relay_to_end(body, &mut write_half).await {
            Ok(bytes) => tracing::debug!("Sent {} bytes of {}", bytes, filename),
            Err(RelayError::Source(e)) => return Err(TransportError::Body(e).into()),
            Err(RelayError::Sink(e)) => return Err(TransportError::io(PEER, e).into()),
        }

        let mut status = String::new();
        BufReader::new(read_half)
            .read_line(&mut status)
            .await
            .map_err(|e| TransportError::io(PEER, e))?;

        status_to_result(status).map_err(Error::from)
    }

    /// Uploads a local file under its own name.
    pub async fn upload_file(&self, local: &Path, destination: &str) -> Result<String, Error> {
        let filename = local
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StorageError::InvalidPath(local.display().to_string()))?;

        let file = tokio::fs::File::open(local)
            .await
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => StorageError::NotFound(local.to_path_buf()),
                _ => StorageError::Read {
                    path: local.to_path_buf(),
                    source,
                },
            })?;

        self.upload(filename, destination, relay::chunks(file)).await
    }

    /// Streams a file into `sink` and returns the byte count.
    pub async fn download_to<W>(&self, path: &str, sink: &mut W) -> Result<u64, TransportError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.fetch_into(&Command::Download(path.to_string()), sink)
            .await
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        self.download_to(path, &mut out).await?;
        Ok(out)
    }

    /// Streams the archive of one category into `sink`.
    pub async fn archive_to<W>(&self, extension: &str, sink: &mut W) -> Result<u64, TransportError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.fetch_into(&Command::Archive(extension.to_string()), sink)
            .await
    }

    pub async fn archive(&self, extension: &str) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        self.archive_to(extension, &mut out).await?;
        Ok(out)
    }

    pub async fn delete(&self, path: &str) -> Result<String, TransportError> {
        let mut reader = self.request(&Command::Delete(path.to_string())).await?;

        let mut status = String::new();
        reader
            .read_line(&mut status)
            .await
            .map_err(|e| TransportError::io(PEER, e))?;

        status_to_result(status)
    }

    /// Lists every stored file below `dir`, across all categories.
    pub async fn display(&self, dir: &str) -> Result<Vec<String>, TransportError> {
        let listing = self.fetch_into_vec(&Command::List(dir.to_string())).await?;

        Ok(String::from_utf8_lossy(&listing)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn fetch_into_vec(&self, command: &Command) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        self.fetch_into(command, &mut out).await?;
        Ok(out)
    }

    /// Sends `command` and relays a data response into `sink`. An error line becomes
    /// `TransportError::Remote`; nothing is written to `sink` then.
    async fn fetch_into<W>(&self, command: &Command, sink: &mut W) -> Result<u64, TransportError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut reader = self.request(command).await?;

        let head = match relay::read_response(&mut reader)
            .await
            .map_err(|e| TransportError::io(PEER, e))?
        {
            Response::Failed(message) => {
                return Err(TransportError::Remote {
                    peer: PEER.to_string(),
                    message,
                });
            }
            Response::Data(head) => head,
        };

        let body = relay::with_head(head, relay::chunks(reader));
        relay::forward(body, sink).await.map_err(|e| match e {
            RelayError::Source(e) => TransportError::io(PEER, e),
            RelayError::Sink(e) => TransportError::io("local output", e),
        })
    }
}

/// Splits a status line into success and `Error:` failure.
fn status_to_result(status: String) -> Result<String, TransportError> {
    let status = status.trim_end();

    if status.is_empty() {
        return Err(TransportError::io(
            PEER,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed without a status",
            ),
        ));
    }

    match status.strip_prefix(protocol::ERROR_PREFIX) {
        Some(message) => Err(TransportError::Remote {
            peer: PEER.to_string(),
            message: message.to_string(),
        }),
        None => Ok(status.to_string()),
    }
}
